// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The CCD device class (§4.4 "CCD state machine"). Grounded in
//! `indigo_ccd_altair.c`: `ccd_temperature_callback` (cooling loop),
//! `pull_callback` (single-shot EXPOSING→TRANSFERRING), and the streaming
//! variant built on `Altaircam_StartPushModeV3`.

use std::{
  sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use tokio::sync::mpsc;

use stellarbus_core::{
  errors::{BusError, StellarbusResult},
  property::{Item, ItemValue, NumberValue, Perm, PropertyState, PropertyVector, SwitchRule},
  scheduler::{PeriodicTimer, Scheduler},
};

use crate::{
  bus::{Bus, Device},
  device_base::{ConnectionHooks, DeviceBase},
  driver::{CcdConfig, HardwareEvent, SharedHandle},
  image::{self, ImageSink},
};

pub const CCD_EXPOSURE: &str = "CCD_EXPOSURE";
pub const CCD_ABORT_EXPOSURE: &str = "CCD_ABORT_EXPOSURE";
pub const CCD_STREAM_EXPOSURE: &str = "CCD_STREAM_EXPOSURE";
pub const CCD_TEMPERATURE: &str = "CCD_TEMPERATURE";

const COOLING_THRESHOLD: f64 = 1.0;
const COOLING_POLL_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Idle,
  Configuring,
  Exposing,
  Transferring,
  Streaming,
}

/// Shared inner state, held behind an `Arc` so the async worker spawned for
/// an in-flight exposure can outlive the `change_property` call that started
/// it without the `Device` trait needing `self: Arc<Self>`.
struct Inner {
  base: DeviceBase,
  handle: Arc<SharedHandle>,
  sink: Arc<dyn ImageSink>,
  scheduler: Scheduler,
  phase: StdMutex<Phase>,
  abort_flag: AtomicBool,
  cooling_timer: StdMutex<Option<PeriodicTimer>>,
}

impl Inner {
  fn set_phase(&self, phase: Phase) {
    *self.phase.lock().unwrap() = phase;
  }

  fn phase(&self) -> Phase {
    *self.phase.lock().unwrap()
  }

  fn update_vector(&self, bus: &Bus, vector_name: &str, state: PropertyState, item_updates: &[(String, ItemValue)]) {
    if let Some(snapshot) = self.base.mutate(vector_name, |v| {
      let _ = v.copy_values(item_updates);
      v.set_state(state);
    }) {
      bus.update_property(self.base.id(), &snapshot);
    }
  }

  /// Polls current temperature against target and cooler state, updating
  /// `CCD_TEMPERATURE` (§4.4 "Cooling loop").
  fn poll_cooling(&self, bus: &Bus) {
    let Ok(value) = self.handle.driver().get_temperature(self.base.id()) else {
      return;
    };
    let target = self
      .base
      .get(CCD_TEMPERATURE)
      .and_then(|v| v.item("TEMPERATURE").map(|i| i.value().clone()))
      .and_then(|v| match v {
        ItemValue::Number(n) => Some(n.target()),
        _ => None,
      })
      .unwrap_or(value);
    let cooler_on = self.handle.driver().cooler_on(self.base.id());
    let state = if cooler_on && (target - value).abs() > COOLING_THRESHOLD {
      PropertyState::Busy
    } else {
      PropertyState::Ok
    };
    self.update_vector(
      bus,
      CCD_TEMPERATURE,
      state,
      &[("TEMPERATURE".into(), ItemValue::Number(NumberValue::new(value, -50.0, 50.0, 0.1)))],
    );
  }
}

/// One imaging role of a connected hardware unit.
pub struct CcdDevice {
  inner: Arc<Inner>,
}

impl CcdDevice {
  pub fn new(id: impl Into<String>, handle: Arc<SharedHandle>, sink: Arc<dyn ImageSink>, scheduler: Scheduler) -> Arc<Self> {
    let base = DeviceBase::new(id.into(), "CCD");
    base.define(PropertyVector::new(
      base.id(),
      CCD_EXPOSURE,
      "Main",
      "Exposure",
      Perm::ReadWrite,
      None,
      vec![Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(0.0, 0.0, 3600.0, 0.01)))],
    ));
    base.define(PropertyVector::new(
      base.id(),
      CCD_ABORT_EXPOSURE,
      "Main",
      "Abort exposure",
      Perm::WriteOnly,
      Some(SwitchRule::AtMostOne),
      vec![Item::new("ABORT", "Abort", ItemValue::Switch(false))],
    ));
    base.define(PropertyVector::new(
      base.id(),
      CCD_STREAM_EXPOSURE,
      "Main",
      "Streaming exposure",
      Perm::ReadWrite,
      None,
      vec![
        Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(0.0, 0.0, 3600.0, 0.01))),
        Item::new("FRAMES", "Frame count", ItemValue::Number(NumberValue::new(0.0, 0.0, 100000.0, 1.0))),
      ],
    ));
    base.define(PropertyVector::new(
      base.id(),
      CCD_TEMPERATURE,
      "Main",
      "Temperature",
      Perm::ReadWrite,
      None,
      vec![Item::new("TEMPERATURE", "Temperature", ItemValue::Number(NumberValue::new(20.0, -50.0, 50.0, 0.1)))],
    ));
    Arc::new(Self {
      inner: Arc::new(Inner {
        base,
        handle,
        sink,
        scheduler,
        phase: StdMutex::new(Phase::Idle),
        abort_flag: AtomicBool::new(false),
        cooling_timer: StdMutex::new(None),
      }),
    })
  }

  fn start_exposure(&self, bus: Bus, target_seconds: f64) -> StellarbusResult {
    let inner = &self.inner;
    if inner.phase() != Phase::Idle {
      return Err(BusError::ChangeRejected(inner.base.id().to_string(), "exposure already in progress".into()).into());
    }
    inner.abort_flag.store(false, Ordering::SeqCst);
    inner.set_phase(Phase::Configuring);
    inner.update_vector(&bus, CCD_EXPOSURE, PropertyState::Busy, &[]);

    let config = CcdConfig::full_frame(1, 1, 16, target_seconds);
    if let Err(e) = inner.handle.driver().configure(inner.base.id(), &config) {
      inner.set_phase(Phase::Idle);
      inner.update_vector(&bus, CCD_EXPOSURE, PropertyState::Alert, &[]);
      return Err(e);
    }

    inner.set_phase(Phase::Exposing);
    let (tx, mut rx) = mpsc::channel(1);
    if let Err(e) = inner.handle.driver().start_pull(inner.base.id(), tx) {
      inner.set_phase(Phase::Idle);
      inner.update_vector(&bus, CCD_EXPOSURE, PropertyState::Alert, &[]);
      return Err(e);
    }

    let worker = self.inner.clone();
    self.inner.scheduler.spawn_async(async move {
      let event = rx.recv().await;
      worker.set_phase(Phase::Transferring);
      let aborted = worker.abort_flag.load(Ordering::SeqCst);
      match event {
        Some(HardwareEvent::FrameReady { buffer, width, height, bits_per_pixel }) if !aborted => {
          image::process_image(worker.base.id(), buffer, width, height, bits_per_pixel, worker.sink.as_ref());
          worker.update_vector(
            &bus,
            CCD_EXPOSURE,
            PropertyState::Ok,
            &[("EXPOSURE".into(), ItemValue::Number(NumberValue::new(target_seconds, 0.0, 3600.0, 0.01)))],
          );
        }
        Some(HardwareEvent::FrameReady { .. }) => {
          // an abort raced the frame event; the frame is discarded, not delivered.
          worker.update_vector(&bus, CCD_EXPOSURE, PropertyState::Ok, &[]);
        }
        _ => {
          worker.update_vector(&bus, CCD_EXPOSURE, PropertyState::Alert, &[]);
        }
      }
      worker.set_phase(Phase::Idle);
    });
    Ok(())
  }

  fn start_streaming(&self, bus: Bus, target_seconds: f64, frame_count: u32) -> StellarbusResult {
    let inner = &self.inner;
    if inner.phase() != Phase::Idle {
      return Err(BusError::ChangeRejected(inner.base.id().to_string(), "exposure already in progress".into()).into());
    }
    inner.abort_flag.store(false, Ordering::SeqCst);
    inner.set_phase(Phase::Configuring);
    inner.update_vector(&bus, CCD_STREAM_EXPOSURE, PropertyState::Busy, &[]);

    let config = CcdConfig::full_frame(1, 1, 16, target_seconds);
    if let Err(e) = inner.handle.driver().configure(inner.base.id(), &config) {
      inner.set_phase(Phase::Idle);
      inner.update_vector(&bus, CCD_STREAM_EXPOSURE, PropertyState::Alert, &[]);
      return Err(e);
    }

    inner.set_phase(Phase::Streaming);
    let (tx, mut rx) = mpsc::channel(4);
    if let Err(e) = inner.handle.driver().start_push(inner.base.id(), frame_count, tx) {
      inner.set_phase(Phase::Idle);
      inner.update_vector(&bus, CCD_STREAM_EXPOSURE, PropertyState::Alert, &[]);
      return Err(e);
    }

    let worker = self.inner.clone();
    self.inner.scheduler.spawn_async(async move {
      loop {
        match rx.recv().await {
          Some(HardwareEvent::StreamFrameReady { buffer, width, height, bits_per_pixel, remaining }) => {
            if !worker.abort_flag.load(Ordering::SeqCst) {
              image::process_image(worker.base.id(), buffer, width, height, bits_per_pixel, worker.sink.as_ref());
            }
            if remaining == 0 || worker.abort_flag.load(Ordering::SeqCst) {
              break;
            }
          }
          _ => break,
        }
      }
      worker.update_vector(&bus, CCD_STREAM_EXPOSURE, PropertyState::Ok, &[]);
      worker.set_phase(Phase::Idle);
    });
    Ok(())
  }

  fn abort_exposure(&self, bus: &Bus) -> StellarbusResult {
    let inner = &self.inner;
    inner.abort_flag.store(true, Ordering::SeqCst);
    let result = inner.handle.driver().abort(inner.base.id());
    let state = if result.is_ok() { PropertyState::Ok } else { PropertyState::Alert };
    inner.update_vector(bus, CCD_ABORT_EXPOSURE, state, &[("ABORT".into(), ItemValue::Switch(false))]);
    result
  }

  /// Polls current temperature against target and cooler state, updating
  /// `CCD_TEMPERATURE` (§4.4 "Cooling loop"). Exposed directly for tests and
  /// callers that want an out-of-band poll; the connected lifetime of the
  /// device drives this itself via a [PeriodicTimer] started in `connect`.
  pub fn poll_cooling(&self, bus: &Bus) {
    self.inner.poll_cooling(bus);
  }
}

impl ConnectionHooks for CcdDevice {
  fn connect(&self, bus: &Bus) -> StellarbusResult {
    self.inner.handle.connect_role()?;
    let inner = self.inner.clone();
    let bus = bus.clone();
    let device_id = inner.base.id().to_string();
    let timer = PeriodicTimer::start(device_id, COOLING_POLL_PERIOD, move || {
      let inner = inner.clone();
      let bus = bus.clone();
      async move { inner.poll_cooling(&bus) }
    });
    *self.inner.cooling_timer.lock().unwrap() = Some(timer);
    Ok(())
  }

  fn disconnect(&self) {
    self.inner.cooling_timer.lock().unwrap().take();
    self.inner.handle.disconnect_role();
  }
}

impl Device for CcdDevice {
  fn id(&self) -> &str {
    self.inner.base.id()
  }

  fn enumerate_properties(&self) -> Vec<PropertyVector> {
    self.inner.base.enumerate()
  }

  fn change_property(&self, bus: &Bus, _client_id: &str, candidate: PropertyVector) -> StellarbusResult {
    if let Some(result) = self.inner.base.default_change_property(bus, self, &candidate) {
      return result;
    }
    match candidate.name().as_str() {
      CCD_EXPOSURE => {
        let target = candidate
          .item("EXPOSURE")
          .and_then(|i| match i.value() {
            ItemValue::Number(n) => Some(n.value()),
            _ => None,
          })
          .unwrap_or(0.0);
        self.start_exposure(bus.clone(), target)
      }
      CCD_STREAM_EXPOSURE => {
        let (target, frames) = candidate.items().iter().fold((0.0, 0u32), |(t, f), item| match (item.name().as_str(), item.value()) {
          ("EXPOSURE", ItemValue::Number(n)) => (n.value(), f),
          ("FRAMES", ItemValue::Number(n)) => (t, n.value() as u32),
          _ => (t, f),
        });
        self.start_streaming(bus.clone(), target, frames)
      }
      CCD_ABORT_EXPOSURE => self.abort_exposure(bus),
      CCD_TEMPERATURE => {
        let target = candidate
          .item("TEMPERATURE")
          .and_then(|i| match i.value() {
            ItemValue::Number(n) => Some(n.value()),
            _ => None,
          })
          .unwrap_or(20.0);
        let cooler_on = self.inner.handle.driver().cooler_on(self.inner.base.id());
        let result = self.inner.handle.driver().set_temperature(self.inner.base.id(), target, cooler_on);
        let state = if result.is_ok() { PropertyState::Busy } else { PropertyState::Alert };
        self.inner.update_vector(
          bus,
          CCD_TEMPERATURE,
          state,
          &[("TEMPERATURE".into(), ItemValue::Number(NumberValue::new(target, -50.0, 50.0, 0.1)))],
        );
        result
      }
      _ => Err(BusError::PropertyNotFound(self.inner.base.id().to_string(), candidate.name().clone()).into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::driver::sim::SimHardwareDriver;
  use crate::driver::{HardwareDriver, Role};
  use std::sync::Mutex as StdMutex2;
  use std::time::Duration;

  struct CollectingSink {
    frames: StdMutex2<Vec<(u32, u32)>>,
  }
  impl ImageSink for CollectingSink {
    fn accept(&self, _device: &str, image: image::FitsImage) {
      self.frames.lock().unwrap().push((image.width, image.height));
    }
  }

  fn make_ccd() -> (Arc<CcdDevice>, Arc<SimHardwareDriver>, Bus) {
    let driver = Arc::new(SimHardwareDriver::new());
    driver.plug("hw0", vec![Role::Camera]);
    let handle = Arc::new(SharedHandle::new("hw0", driver.clone() as Arc<dyn crate::driver::HardwareDriver>));
    let sink = Arc::new(CollectingSink { frames: StdMutex2::new(vec![]) });
    let ccd = CcdDevice::new("hw0.camera", handle, sink, Scheduler::new());
    let bus = Bus::default();
    bus.attach_device(ccd.clone()).unwrap();
    (ccd, driver, bus)
  }

  #[tokio::test]
  async fn abort_exposure_suppresses_pending_frame() {
    let (ccd, _driver, bus) = make_ccd();
    let candidate = PropertyVector::new(
      "hw0.camera",
      CCD_EXPOSURE,
      "Main",
      "Exposure",
      Perm::ReadWrite,
      None,
      vec![Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(5.0, 0.0, 3600.0, 0.01)))],
    );
    bus.change_property("c1", "hw0.camera", candidate).unwrap();

    let abort = PropertyVector::new(
      "hw0.camera",
      CCD_ABORT_EXPOSURE,
      "Main",
      "Abort",
      Perm::WriteOnly,
      Some(SwitchRule::AtMostOne),
      vec![Item::new("ABORT", "Abort", ItemValue::Switch(true))],
    );
    bus.change_property("c1", "hw0.camera", abort).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ccd.inner.phase(), Phase::Idle);
  }

  #[tokio::test]
  async fn connect_starts_cooling_timer_and_disconnect_cancels_it() {
    let (ccd, _driver, bus) = make_ccd();
    let connect = PropertyVector::new(
      "hw0.camera",
      crate::device_base::CONNECTION,
      "Main",
      "Connection",
      Perm::ReadWrite,
      Some(SwitchRule::OneOfMany),
      vec![Item::new("CONNECT", "Connect", ItemValue::Switch(true)), Item::new("DISCONNECT", "Disconnect", ItemValue::Switch(false))],
    );
    bus.change_property("c1", "hw0.camera", connect).unwrap();
    assert!(ccd.inner.handle.is_open());
    assert!(ccd.inner.cooling_timer.lock().unwrap().is_some());

    let disconnect = PropertyVector::new(
      "hw0.camera",
      crate::device_base::CONNECTION,
      "Main",
      "Connection",
      Perm::ReadWrite,
      Some(SwitchRule::OneOfMany),
      vec![Item::new("CONNECT", "Connect", ItemValue::Switch(false)), Item::new("DISCONNECT", "Disconnect", ItemValue::Switch(true))],
    );
    bus.change_property("c1", "hw0.camera", disconnect).unwrap();
    assert!(!ccd.inner.handle.is_open());
    assert!(ccd.inner.cooling_timer.lock().unwrap().is_none());
  }

  #[test]
  fn poll_cooling_reports_ok_within_threshold() {
    let (ccd, driver, bus) = make_ccd();
    driver.set_temperature("hw0", -10.0, true);
    ccd.poll_cooling(&bus);
    let snapshot = ccd.inner.base.get(CCD_TEMPERATURE).unwrap();
    assert_eq!(snapshot.state(), &PropertyState::Busy);
  }
}
