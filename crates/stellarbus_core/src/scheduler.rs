// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The timer / async scheduler (C7). Generalizes the server's single
//! fixed-interval ping timer into arbitrary named, per-device one-shot
//! timers with reschedule and synchronous cancellation, using the same
//! `tokio::select!`-between-sleep-and-control-channel shape.

use std::{
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::util::{async_manager, sleep};

/// Opaque handle to a scheduled timer, returned by [Scheduler::set_timer].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

enum TimerControl {
  Reschedule(Duration),
  Cancel(oneshot::Sender<()>),
}

struct TimerEntry {
  control: mpsc::Sender<TimerControl>,
}

/// Per-device one-shot timers plus fire-and-forget task launch. Timers run on
/// worker tasks associated loosely with the owning device id (used only for
/// bookkeeping/observability, not for pinning to an OS thread — there is no
/// such notion under tokio's cooperative scheduler).
#[derive(Default, Clone)]
pub struct Scheduler {
  next_id: Arc<AtomicU64>,
  timers: Arc<DashMap<TimerHandle, TimerEntry>>,
  // Guards reschedule-after-fire races: replacing a fired timer's entry must
  // not race with a concurrent reschedule that is still in flight.
  reschedule_lock: Arc<Mutex<()>>,
}

impl Scheduler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Schedules `callback` to run once after `delay`, on a worker task. The
  /// returned handle can be used with [reschedule_timer](Scheduler::reschedule_timer)
  /// or [cancel_timer](Scheduler::cancel_timer).
  pub fn set_timer<F>(&self, device: impl Into<String>, delay: Duration, callback: F) -> TimerHandle
  where
    F: FnOnce() + Send + 'static,
  {
    let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.spawn_timer_task(device.into(), handle, delay, callback);
    handle
  }

  fn spawn_timer_task<F>(&self, device: String, handle: TimerHandle, delay: Duration, callback: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let (control_tx, mut control_rx) = mpsc::channel(8);
    self.timers.insert(handle, TimerEntry { control: control_tx });
    let timers = self.timers.clone();
    let mut delay = delay;
    let mut callback = Some(callback);
    async_manager::spawn(async move {
      loop {
        tokio::select! {
          _ = sleep::sleep(delay) => {
            timers.remove(&handle);
            if let Some(cb) = callback.take() {
              tracing::trace!(device = %device, ?handle, "timer fired");
              cb();
            }
            return;
          }
          msg = control_rx.recv() => {
            match msg {
              Some(TimerControl::Reschedule(new_delay)) => {
                delay = new_delay;
                continue;
              }
              Some(TimerControl::Cancel(ack)) => {
                timers.remove(&handle);
                let _ = ack.send(());
                return;
              }
              None => return,
            }
          }
        }
      }
    });
  }

  /// Idempotent reschedule: if `handle` is still pending, its delay is reset
  /// to `delay`. If it has already fired, this is equivalent to a fresh
  /// `set_timer` reusing the same handle value.
  pub async fn reschedule_timer<F>(&self, device: impl Into<String>, handle: TimerHandle, delay: Duration, callback: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let _guard = self.reschedule_lock.lock().await;
    if let Some(entry) = self.timers.get(&handle) {
      if entry.control.send(TimerControl::Reschedule(delay)).await.is_ok() {
        return;
      }
    }
    self.spawn_timer_task(device.into(), handle, delay, callback);
  }

  /// Cancels `handle`. Returns once the timer task has observed the
  /// cancellation and will not invoke its callback; a handle that already
  /// fired or was already cancelled is a no-op.
  pub async fn cancel_timer(&self, handle: TimerHandle) {
    let Some(entry) = self.timers.get(&handle).map(|e| e.control.clone()) else {
      return;
    };
    let (ack_tx, ack_rx) = oneshot::channel();
    if entry.send(TimerControl::Cancel(ack_tx)).await.is_ok() {
      let _ = ack_rx.await;
    }
  }

  /// Fire-and-forget task launch.
  pub fn spawn_async<Fut>(&self, future: Fut)
  where
    Fut: std::future::Future<Output = ()> + Send + 'static,
  {
    async_manager::spawn(future);
  }
}

/// Per-device periodic reschedule loop, used by the CCD cooling loop (§4.4):
/// `poll` runs every `period` until cancelled.
pub struct PeriodicTimer {
  cancel: Arc<tokio_util::sync::CancellationToken>,
}

impl PeriodicTimer {
  pub fn start<F, Fut>(device: impl Into<String>, period: Duration, mut poll: F) -> Self
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
  {
    let cancel = Arc::new(tokio_util::sync::CancellationToken::new());
    let child = cancel.clone();
    let device = device.into();
    async_manager::spawn(async move {
      loop {
        tokio::select! {
          _ = sleep::sleep(period) => {
            tracing::trace!(device = %device, "periodic timer tick");
            poll().await;
          }
          _ = child.cancelled() => {
            tracing::debug!(device = %device, "periodic timer cancelled");
            return;
          }
        }
      }
    });
    Self { cancel }
  }

  pub fn cancel(&self) {
    self.cancel.cancel();
  }
}

impl Drop for PeriodicTimer {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;

  #[tokio::test]
  async fn set_timer_fires() {
    let scheduler = Scheduler::new();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = fired.clone();
    scheduler.set_timer("cam0", Duration::from_millis(10), move || {
      fired2.store(true, Ordering::SeqCst);
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fired.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn cancel_timer_prevents_fire() {
    let scheduler = Scheduler::new();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = fired.clone();
    let handle = scheduler.set_timer("cam0", Duration::from_millis(50), move || {
      fired2.store(true, Ordering::SeqCst);
    });
    scheduler.cancel_timer(handle).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!fired.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn reschedule_extends_delay() {
    let scheduler = Scheduler::new();
    let fired = Arc::new(AtomicBool::new(false));
    let fired2 = fired.clone();
    let handle = scheduler.set_timer("cam0", Duration::from_millis(20), move || {
      fired2.store(true, Ordering::SeqCst);
    });
    let fired3 = fired.clone();
    scheduler
      .reschedule_timer("cam0", handle, Duration::from_millis(80), move || {
        fired3.store(true, Ordering::SeqCst);
      })
      .await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!fired.load(Ordering::SeqCst), "should not have fired yet under extended delay");
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(fired.load(Ordering::SeqCst));
  }
}
