// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Shared-handle discipline (§4.4, §5): when one hardware unit exposes
//! multiple logical devices, they share a single opened hardware handle,
//! lazily opened on first role-connect and closed only when the last
//! connected role disconnects. Grounded in `indigo_ccd_altair.c`'s
//! `altair_private_data`, which the redesign notes call out for replacement
//! by "a reference-counted shared record with explicit role-connection
//! count gating `close`" rather than a raw shared pointer nulled on close.

use std::sync::{Arc, Mutex};

use stellarbus_core::errors::StellarbusResult;

use super::global_lock::GlobalBusLock;
use super::HardwareDriver;

struct State {
  open: bool,
  connected_roles: u32,
}

/// One opened-or-closed hardware unit, shared by every [Device](crate::bus::Device)
/// role instantiated against it. `global_lock` is the process-wide exclusive
/// permit (§5 "Shared resources") acquired on the 0-to-1 role-connect
/// transition and released on the last-role-disconnect transition, so a
/// second driver probing the same physical bus gets `DriverError::LockContended`
/// back from [connect_role](Self::connect_role) instead of racing the first.
pub struct SharedHandle {
  id: String,
  driver: Arc<dyn HardwareDriver>,
  state: Mutex<State>,
  global_lock: Arc<GlobalBusLock>,
}

impl SharedHandle {
  pub fn new(id: impl Into<String>, driver: Arc<dyn HardwareDriver>) -> Self {
    Self::with_lock(id, driver, Arc::new(GlobalBusLock::new()))
  }

  /// As [Self::new], sharing `lock` with every other handle that must be
  /// serialized against this one's first-connect/last-disconnect (e.g. the
  /// handles one [super::hotplug::HotplugManager] creates for one driver
  /// instance).
  pub fn with_lock(id: impl Into<String>, driver: Arc<dyn HardwareDriver>, lock: Arc<GlobalBusLock>) -> Self {
    Self { id: id.into(), driver, state: Mutex::new(State { open: false, connected_roles: 0 }), global_lock: lock }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn driver(&self) -> &Arc<dyn HardwareDriver> {
    &self.driver
  }

  /// Registers one more connected role. Opens the hardware handle iff this
  /// is the 0-to-1 transition (P7), after claiming the process-wide lock; a
  /// contending driver's connect is rejected here rather than racing
  /// `open_hardware`.
  pub fn connect_role(&self) -> StellarbusResult {
    let mut state = self.state.lock().unwrap();
    if !state.open {
      self.global_lock.acquire()?;
      if let Err(e) = self.driver.open_hardware(&self.id) {
        self.global_lock.release();
        return Err(e);
      }
      state.open = true;
    }
    state.connected_roles += 1;
    Ok(())
  }

  /// Unregisters one connected role. Closes the hardware handle and releases
  /// the process-wide lock iff this was the last connected role (P7).
  pub fn disconnect_role(&self) {
    let mut state = self.state.lock().unwrap();
    state.connected_roles = state.connected_roles.saturating_sub(1);
    if state.connected_roles == 0 && state.open {
      self.driver.close_hardware(&self.id);
      state.open = false;
      self.global_lock.release();
    }
  }

  pub fn connected_roles(&self) -> u32 {
    self.state.lock().unwrap().connected_roles
  }

  pub fn is_open(&self) -> bool {
    self.state.lock().unwrap().open
  }
}
