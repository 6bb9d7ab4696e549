// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The filter wheel device class. Grounded directly in the mandatory-vector
//! example spelled out in the property model design: `WHEEL_SLOT` (NUMBER,
//! one item, target = desired position, value = actual position) and
//! `WHEEL_SLOT_NAME` (TEXT, one item per slot), and in `indigo_wheel_driver.h`.

use std::sync::Arc;

use stellarbus_core::{
  errors::{BusError, StellarbusResult},
  property::{Item, ItemValue, NumberValue, Perm, PropertyState, PropertyVector},
};

use crate::{
  bus::{Bus, Device},
  device_base::{ConnectionHooks, DeviceBase},
  driver::SharedHandle,
};

pub const WHEEL_SLOT: &str = "WHEEL_SLOT";
pub const WHEEL_SLOT_NAME: &str = "WHEEL_SLOT_NAME";

/// The filter-wheel role of a connected hardware unit.
pub struct WheelDevice {
  base: DeviceBase,
  handle: Arc<SharedHandle>,
}

impl WheelDevice {
  pub fn new(id: impl Into<String>, handle: Arc<SharedHandle>, slot_count: u32) -> Arc<Self> {
    let base = DeviceBase::new(id.into(), "Filter wheel");
    base.define(PropertyVector::new(
      base.id(),
      WHEEL_SLOT,
      "Main",
      "Slot",
      Perm::ReadWrite,
      None,
      vec![Item::new("SLOT", "Slot", ItemValue::Number(NumberValue::new(1.0, 1.0, slot_count as f64, 1.0)))],
    ));
    let slot_items = (1..=slot_count)
      .map(|n| Item::new(format!("SLOT_NAME_{n}"), format!("Slot {n}"), ItemValue::Text(format!("Filter {n}"))))
      .collect();
    base.define(PropertyVector::new(base.id(), WHEEL_SLOT_NAME, "Main", "Slot names", Perm::ReadWrite, None, slot_items));
    Arc::new(Self { base, handle })
  }
}

impl ConnectionHooks for WheelDevice {
  fn connect(&self, _bus: &Bus) -> StellarbusResult {
    self.handle.connect_role()
  }

  fn disconnect(&self) {
    self.handle.disconnect_role();
  }
}

impl Device for WheelDevice {
  fn id(&self) -> &str {
    self.base.id()
  }

  fn enumerate_properties(&self) -> Vec<PropertyVector> {
    self.base.enumerate()
  }

  fn change_property(&self, bus: &Bus, _client_id: &str, candidate: PropertyVector) -> StellarbusResult {
    if let Some(result) = self.base.default_change_property(bus, self, &candidate) {
      return result;
    }
    match candidate.name().as_str() {
      WHEEL_SLOT => {
        let target = candidate
          .item("SLOT")
          .and_then(|i| match i.value() {
            ItemValue::Number(n) => Some(n.value()),
            _ => None,
          })
          .unwrap_or(1.0);
        let busy_snapshot = self.base.mutate(WHEEL_SLOT, |v| v.set_state(PropertyState::Busy));
        if let Some(snapshot) = busy_snapshot {
          bus.update_property(self.base.id(), &snapshot);
        }

        let move_result = self.handle.driver().move_to_slot(self.handle.id(), target as u32);

        let final_snapshot = self.base.mutate(WHEEL_SLOT, |v| {
          if move_result.is_ok() {
            let _ = v.copy_values(&[("SLOT".into(), ItemValue::Number(NumberValue::new(target, 1.0, target.max(1.0), 1.0)))]);
            v.set_state(PropertyState::Ok);
          } else {
            v.set_state(PropertyState::Alert);
          }
        });
        if let Some(snapshot) = final_snapshot {
          bus.update_property(self.base.id(), &snapshot);
        }
        move_result
      }
      WHEEL_SLOT_NAME => {
        let updates: Vec<_> = candidate.items().iter().map(|i| (i.name().clone(), i.value().clone())).collect();
        let snapshot = self.base.mutate(WHEEL_SLOT_NAME, |v| {
          if v.copy_values(&updates).is_ok() {
            v.set_state(PropertyState::Ok);
          } else {
            v.set_state(PropertyState::Alert);
          }
        });
        if let Some(snapshot) = snapshot {
          bus.update_property(self.base.id(), &snapshot);
        }
        Ok(())
      }
      _ => Err(BusError::PropertyNotFound(self.base.id().to_string(), candidate.name().clone()).into()),
    }
  }
}
