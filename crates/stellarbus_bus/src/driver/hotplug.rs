// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Hot-plug reconciliation (§5, SPEC_FULL §9). Grounded in
//! `indigo_ccd_altair.c`'s `hotplug_callback`, redesigned to key hardware by
//! a [DashMap] on its stable string id instead of a fixed-size array scanned
//! for the "first empty slot" by index, which is the source of the original
//! slot-reuse bug named in the redesign notes: a concurrent map keyed by id
//! makes "which slot is this hardware" a non-question.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;

use stellarbus_core::errors::{DriverError, StellarbusResult};
use stellarbus_core::scheduler::PeriodicTimer;

use crate::bus::{Bus, Device};
use crate::driver::{GlobalBusLock, HardwareDriver, Role, SharedHandle};

const DEFAULT_RECONCILIATION_INTERVAL: Duration = Duration::from_secs(5);

/// Configures how a [HotplugManager] is driven when the underlying
/// [HardwareDriver] has no native hot-plug callback and must be polled
/// instead (§6 "External interfaces").
pub struct HotplugConfig {
  rescan_on_startup: bool,
  reconciliation_interval: Duration,
}

impl Default for HotplugConfig {
  fn default() -> Self {
    Self { rescan_on_startup: true, reconciliation_interval: DEFAULT_RECONCILIATION_INTERVAL }
  }
}

impl HotplugConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether a reconcile pass runs immediately when polling starts, rather
  /// than waiting one full interval for the first scan.
  pub fn rescan_on_startup(mut self, rescan: bool) -> Self {
    self.rescan_on_startup = rescan;
    self
  }

  pub fn reconciliation_interval(mut self, interval: Duration) -> Self {
    self.reconciliation_interval = interval;
    self
  }
}

struct Slot {
  handle: Arc<SharedHandle>,
  present: bool,
}

/// A factory turning one newly-discovered hardware id + role into an
/// attachable device. Supplied by the integration wiring up a concrete
/// vendor driver to concrete device classes.
pub trait DeviceFactory: Send + Sync {
  fn make_device(&self, hardware_id: &str, role: Role, handle: Arc<SharedHandle>) -> Arc<dyn Device>;
}

/// Walks a [HardwareDriver]'s enumeration results against the previously
/// known set, attaching devices for newly-seen hardware and detaching
/// devices whose hardware vanished. A single [reconcile](HotplugManager::reconcile)
/// call is atomic with respect to other reconcile calls via `scan_lock`, a
/// reentrancy guard distinct from the process-wide `bus_lock` every
/// [SharedHandle] this manager creates shares (§5 "Shared resources") —
/// `scan_lock` only protects one scan against an overlapping one, while
/// `bus_lock` is held by a handle across its whole connected lifetime. A
/// reconcile already in flight on another thread rejects the overlapping
/// call instead of queuing behind it, since a hotplug scan that is already
/// running will pick up whatever prompted the second call anyway.
pub struct HotplugManager {
  driver: Arc<dyn HardwareDriver>,
  factory: Arc<dyn DeviceFactory>,
  slots: DashMap<String, Slot>,
  attached_device_ids: DashMap<String, Vec<String>>,
  scan_lock: Mutex<()>,
  /// Shared across every [SharedHandle] this manager creates, so two
  /// hardware units discovered by the same driver instance serialize their
  /// first-connect/last-disconnect against each other (§5 "Shared resources").
  bus_lock: Arc<GlobalBusLock>,
}

impl HotplugManager {
  pub fn new(driver: Arc<dyn HardwareDriver>, factory: Arc<dyn DeviceFactory>) -> Self {
    Self {
      driver,
      factory,
      slots: DashMap::new(),
      attached_device_ids: DashMap::new(),
      scan_lock: Mutex::new(()),
      bus_lock: Arc::new(GlobalBusLock::new()),
    }
  }

  /// Runs one mark-sweep reconciliation pass against `bus`.
  pub fn reconcile(&self, bus: &Bus) -> StellarbusResult {
    let _guard = self.scan_lock.try_lock().map_err(|_| DriverError::LockContended)?;

    for mut slot in self.slots.iter_mut() {
      slot.present = false;
    }

    for id in self.driver.enumerate() {
      if let Some(mut slot) = self.slots.get_mut(&id) {
        slot.present = true;
        continue;
      }
      let handle = Arc::new(SharedHandle::with_lock(id.clone(), self.driver.clone(), self.bus_lock.clone()));
      let roles = self.driver.roles(&id);
      let mut device_ids = Vec::with_capacity(roles.len());
      for role in roles {
        let device = self.factory.make_device(&id, role, handle.clone());
        device_ids.push(device.id().to_string());
        bus.attach_device(device)?;
      }
      self.attached_device_ids.insert(id.clone(), device_ids);
      self.slots.insert(id, Slot { handle, present: true });
    }

    let gone: Vec<String> = self
      .slots
      .iter()
      .filter(|entry| !entry.value().present)
      .map(|entry| entry.key().clone())
      .collect();
    for id in gone {
      if let Some((_, device_ids)) = self.attached_device_ids.remove(&id) {
        for device_id in device_ids {
          bus.detach_device(&device_id);
        }
      }
      self.slots.remove(&id);
    }

    Ok(())
  }

  pub fn known_hardware_ids(&self) -> Vec<String> {
    self.slots.iter().map(|e| e.key().clone()).collect()
  }

  pub fn handle_for(&self, hardware_id: &str) -> Option<Arc<SharedHandle>> {
    self.slots.get(hardware_id).map(|s| s.handle.clone())
  }

  /// Drives [reconcile](Self::reconcile) on a fixed interval, for drivers
  /// with no native hot-plug callback of their own. Returns a [PeriodicTimer]
  /// whose `Drop` stops the polling loop.
  pub fn run_periodic(self: &Arc<Self>, bus: Bus, config: HotplugConfig) -> PeriodicTimer {
    if config.rescan_on_startup {
      if let Err(e) = self.reconcile(&bus) {
        tracing::warn!(error = %e, "startup hot-plug scan failed");
      }
    }
    let manager = self.clone();
    PeriodicTimer::start("hotplug", config.reconciliation_interval, move || {
      let manager = manager.clone();
      let bus = bus.clone();
      async move {
        if let Err(e) = manager.reconcile(&bus) {
          tracing::warn!(error = %e, "periodic hot-plug scan failed");
        }
      }
    })
  }
}
