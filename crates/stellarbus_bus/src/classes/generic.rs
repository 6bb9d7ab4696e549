// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! A minimal device class for roles the design notes name but do not give a
//! concrete mandatory vector set for (focuser, mount, AO — §4.3 only
//! spells out CCD, guider, and filter wheel). Exposes only the universal
//! `CONNECTION`/`DEBUG`/`INFO` trio via [DeviceBase]; a concrete driver for
//! one of these roles defines its own mandatory vectors with
//! [DeviceBase::define] and layers its own `change_property` in front of
//! this one the same way [GenericDevice] itself does — see the decision
//! recorded in DESIGN.md.

use std::sync::Arc;

use stellarbus_core::errors::StellarbusResult;
use stellarbus_core::property::PropertyVector;

use crate::{
  bus::{Bus, Device},
  device_base::{ConnectionHooks, DeviceBase},
  driver::SharedHandle,
};

/// A connected hardware role with no class-specific mandatory vectors of its
/// own yet.
pub struct GenericDevice {
  base: DeviceBase,
  handle: Arc<SharedHandle>,
}

impl GenericDevice {
  pub fn new(id: impl Into<String>, display_name: &str, handle: Arc<SharedHandle>) -> Arc<Self> {
    Arc::new(Self { base: DeviceBase::new(id.into(), display_name), handle })
  }

  pub fn base(&self) -> &DeviceBase {
    &self.base
  }
}

impl ConnectionHooks for GenericDevice {
  fn connect(&self, _bus: &Bus) -> StellarbusResult {
    self.handle.connect_role()
  }

  fn disconnect(&self) {
    self.handle.disconnect_role();
  }
}

impl Device for GenericDevice {
  fn id(&self) -> &str {
    self.base.id()
  }

  fn enumerate_properties(&self) -> Vec<PropertyVector> {
    self.base.enumerate()
  }

  fn change_property(&self, bus: &Bus, _client_id: &str, candidate: PropertyVector) -> StellarbusResult {
    self
      .base
      .default_change_property(bus, self, &candidate)
      .unwrap_or_else(|| Err(stellarbus_core::errors::BusError::PropertyNotFound(self.base.id().to_string(), candidate.name().clone()).into()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::driver::sim::SimHardwareDriver;
  use crate::driver::Role;

  #[test]
  fn attaches_and_exposes_universal_vectors() {
    let driver = Arc::new(SimHardwareDriver::new());
    driver.plug("hw0", vec![Role::Camera]);
    let handle = Arc::new(SharedHandle::new("hw0", driver as Arc<dyn crate::driver::HardwareDriver>));
    let device = GenericDevice::new("hw0.focuser", "Focuser", handle);
    let bus = Bus::default();
    bus.attach_device(device.clone()).unwrap();
    let names: Vec<_> = device.enumerate_properties().iter().map(|v| v.name().clone()).collect();
    assert!(names.contains(&"CONNECTION".to_string()));
    assert!(names.contains(&"INFO".to_string()));
  }
}
