// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The guider device class (§4.4 "Guider ST-4 port"). No state machine:
//! each write translates directly into a pulse-direction + duration call
//! against the shared handle.

use std::sync::Arc;

use stellarbus_core::{
  errors::{BusError, DriverError, StellarbusResult},
  property::{Item, ItemValue, NumberValue, Perm, PropertyState, PropertyVector},
};

use crate::{
  bus::{Bus, Device},
  device_base::{ConnectionHooks, DeviceBase},
  driver::{GuideDirection, SharedHandle},
};

pub const GUIDER_GUIDE_DEC: &str = "GUIDER_GUIDE_DEC";
pub const GUIDER_GUIDE_RA: &str = "GUIDER_GUIDE_RA";

fn dec_vector(device: &str) -> PropertyVector {
  PropertyVector::new(
    device,
    GUIDER_GUIDE_DEC,
    "Guider",
    "Guide DEC",
    Perm::ReadWrite,
    None,
    vec![
      Item::new("NORTH", "North", ItemValue::Number(NumberValue::new(0.0, 0.0, 10000.0, 1.0))),
      Item::new("SOUTH", "South", ItemValue::Number(NumberValue::new(0.0, 0.0, 10000.0, 1.0))),
    ],
  )
}

fn ra_vector(device: &str) -> PropertyVector {
  PropertyVector::new(
    device,
    GUIDER_GUIDE_RA,
    "Guider",
    "Guide RA",
    Perm::ReadWrite,
    None,
    vec![
      Item::new("EAST", "East", ItemValue::Number(NumberValue::new(0.0, 0.0, 10000.0, 1.0))),
      Item::new("WEST", "West", ItemValue::Number(NumberValue::new(0.0, 0.0, 10000.0, 1.0))),
    ],
  )
}

/// The ST-4 guide role of a connected hardware unit.
pub struct GuiderDevice {
  base: DeviceBase,
  handle: Arc<SharedHandle>,
}

impl GuiderDevice {
  pub fn new(id: impl Into<String>, handle: Arc<SharedHandle>) -> Arc<Self> {
    let base = DeviceBase::new(id.into(), "Guider");
    base.define(dec_vector(base.id()));
    base.define(ra_vector(base.id()));
    Arc::new(Self { base, handle })
  }

  fn pulse(&self, bus: &Bus, name: &str, north_east: (&str, GuideDirection), south_west: (&str, GuideDirection), candidate: &PropertyVector) -> StellarbusResult {
    if !self.handle.is_open() {
      return Err(DriverError::HandleNotOpen(self.base.id().to_string()).into());
    }
    let duration_of = |item_name: &str| {
      candidate
        .item(item_name)
        .and_then(|i| match i.value() {
          ItemValue::Number(n) => Some(n.value()),
          _ => None,
        })
        .unwrap_or(0.0)
    };
    let (pos_name, pos_dir) = north_east;
    let (neg_name, neg_dir) = south_west;
    let pos_ms = duration_of(pos_name) as u32;
    let neg_ms = duration_of(neg_name) as u32;

    let mut result = Ok(());
    if pos_ms > 0 {
      result = self.handle.driver().pulse_guide(self.base.id(), pos_dir, pos_ms);
    }
    if result.is_ok() && neg_ms > 0 {
      result = self.handle.driver().pulse_guide(self.base.id(), neg_dir, neg_ms);
    }

    let state = if result.is_ok() { PropertyState::Ok } else { PropertyState::Alert };
    if let Some(snapshot) = self.base.mutate(name, |v| v.set_state(state)) {
      bus.update_property(self.base.id(), &snapshot);
    }
    result
  }
}

impl ConnectionHooks for GuiderDevice {
  fn connect(&self, _bus: &Bus) -> StellarbusResult {
    self.handle.connect_role()
  }

  fn disconnect(&self) {
    self.handle.disconnect_role();
  }
}

impl Device for GuiderDevice {
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
      GUIDER_GUIDE_DEC => self.pulse(bus, GUIDER_GUIDE_DEC, ("NORTH", GuideDirection::North), ("SOUTH", GuideDirection::South), &candidate),
      GUIDER_GUIDE_RA => self.pulse(bus, GUIDER_GUIDE_RA, ("EAST", GuideDirection::East), ("WEST", GuideDirection::West), &candidate),
      _ => Err(BusError::PropertyNotFound(self.base.id().to_string(), candidate.name().clone()).into()),
    }
  }
}
