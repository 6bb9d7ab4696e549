// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Common device lifecycle and mandatory property scaffolding (C3). Every
//! device class embeds a [DeviceBase] and delegates the universal vectors
//! (`CONNECTION`, `DEBUG`, `INFO`) to it, overriding only the class-specific
//! ones.

use std::{
  collections::HashMap,
  sync::Mutex,
};

use stellarbus_core::{
  errors::{BusError, StellarbusResult},
  property::{Item, ItemValue, NumberValue, Perm, PropertyState, PropertyVector, SwitchRule},
};

use crate::bus::Bus;
use crate::config_store::ConfigStore;
use std::sync::Arc;

pub const CONNECTION: &str = "CONNECTION";
pub const DEBUG: &str = "DEBUG";
pub const INFO: &str = "INFO";
pub const CONFIG: &str = "CONFIG";

/// Hooks a device class provides so [DeviceBase] can drive the universal
/// `CONNECTION` transition without knowing anything about the underlying
/// hardware.
pub trait ConnectionHooks: Send + Sync {
  fn connect(&self, bus: &Bus) -> StellarbusResult;
  fn disconnect(&self);
}

fn connection_vector(device: &str) -> PropertyVector {
  PropertyVector::new(
    device,
    CONNECTION,
    "Main",
    "Connection",
    Perm::ReadWrite,
    Some(SwitchRule::OneOfMany),
    vec![
      Item::new("CONNECT", "Connect", ItemValue::Switch(false)),
      Item::new("DISCONNECT", "Disconnect", ItemValue::Switch(true)),
    ],
  )
}

fn debug_vector(device: &str) -> PropertyVector {
  PropertyVector::new(
    device,
    DEBUG,
    "Options",
    "Debug",
    Perm::ReadWrite,
    Some(SwitchRule::OneOfMany),
    vec![
      Item::new("ENABLE", "Enable", ItemValue::Switch(false)),
      Item::new("DISABLE", "Disable", ItemValue::Switch(true)),
    ],
  )
}

fn config_vector(device: &str) -> PropertyVector {
  PropertyVector::new(
    device,
    CONFIG,
    "Options",
    "Configuration",
    Perm::ReadWrite,
    Some(SwitchRule::AtMostOne),
    vec![
      Item::new("SAVE", "Save", ItemValue::Switch(false)),
      Item::new("LOAD", "Load", ItemValue::Switch(false)),
    ],
  )
}

fn info_vector(device: &str, label: &str) -> PropertyVector {
  PropertyVector::new(
    device,
    INFO,
    "Main",
    "Info",
    Perm::ReadOnly,
    None,
    vec![Item::new("NAME", "Device name", ItemValue::Text(label.to_string()))],
  )
}

/// Owns the set of property vectors for one device and the universal
/// `CONNECTION`/`DEBUG`/`INFO` handling shared by every class.
pub struct DeviceBase {
  id: String,
  vectors: Mutex<HashMap<String, PropertyVector>>,
  config_store: Mutex<Option<Arc<dyn ConfigStore>>>,
}

impl DeviceBase {
  pub fn new(id: impl Into<String>, display_name: &str) -> Self {
    let id = id.into();
    let mut vectors = HashMap::new();
    vectors.insert(CONNECTION.to_string(), connection_vector(&id));
    vectors.insert(DEBUG.to_string(), debug_vector(&id));
    vectors.insert(INFO.to_string(), info_vector(&id, display_name));
    vectors.insert(CONFIG.to_string(), config_vector(&id));
    Self { id, vectors: Mutex::new(vectors), config_store: Mutex::new(None) }
  }

  /// Enables `SAVE`/`LOAD` on the `CONFIG` vector against `store` (§6
  /// "Persisted state"). Without a store, `CONFIG` writes report
  /// `unsupported` rather than silently succeeding.
  pub fn enable_config_persistence(&self, store: Arc<dyn ConfigStore>) {
    *self.config_store.lock().unwrap() = Some(store);
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  /// Registers a class-specific mandatory vector (e.g. `CCD_EXPOSURE`,
  /// `WHEEL_SLOT`).
  pub fn define(&self, vector: PropertyVector) {
    self.vectors.lock().unwrap().insert(vector.name().clone(), vector);
  }

  pub fn get(&self, name: &str) -> Option<PropertyVector> {
    self.vectors.lock().unwrap().get(name).cloned()
  }

  pub fn enumerate(&self) -> Vec<PropertyVector> {
    self.vectors.lock().unwrap().values().cloned().collect()
  }

  /// Applies `mutate` to the stored vector named `name` and returns the
  /// resulting snapshot, or `None` if no such vector exists.
  pub fn mutate(&self, name: &str, mutate: impl FnOnce(&mut PropertyVector)) -> Option<PropertyVector> {
    let mut guard = self.vectors.lock().unwrap();
    let vector = guard.get_mut(name)?;
    mutate(vector);
    Some(vector.clone())
  }

  fn is_connected(&self) -> bool {
    self
      .get(CONNECTION)
      .and_then(|v| v.item("CONNECT").map(|i| matches!(i.value(), ItemValue::Switch(true))))
      .unwrap_or(false)
  }

  /// Handles `CONNECTION`/`DEBUG`/`INFO` writes; returns `None` if `candidate`
  /// names a vector this device base does not own (the caller should try its
  /// own class-specific handling next).
  pub fn default_change_property(
    &self,
    bus: &Bus,
    hooks: &dyn ConnectionHooks,
    candidate: &PropertyVector,
  ) -> Option<StellarbusResult> {
    match candidate.name().as_str() {
      CONNECTION => Some(self.handle_connection(bus, hooks, candidate)),
      DEBUG => Some(self.handle_simple_switch(bus, DEBUG, candidate)),
      INFO => Some(Err(BusError::ChangeRejected(self.id.clone(), "INFO is read-only".into()).into())),
      CONFIG => Some(self.handle_config(bus, candidate)),
      _ => None,
    }
  }

  fn handle_config(&self, bus: &Bus, candidate: &PropertyVector) -> StellarbusResult {
    let wants_save = candidate.item("SAVE").map(|i| matches!(i.value(), ItemValue::Switch(true))).unwrap_or(false);
    let wants_load = candidate.item("LOAD").map(|i| matches!(i.value(), ItemValue::Switch(true))).unwrap_or(false);

    let result: StellarbusResult = (|| {
      let store = self
        .config_store
        .lock()
        .unwrap()
        .clone()
        .ok_or_else(|| stellarbus_core::errors::DriverError::Unsupported("CONFIG: no persistence store configured".into()))?;
      if wants_save {
        let snapshot: Vec<_> = self.vectors.lock().unwrap().values().filter(|v| v.name() != CONFIG).cloned().collect();
        store.save(&self.id, snapshot);
      } else if wants_load {
        let Some(saved) = store.load(&self.id) else {
          return Err(BusError::PropertyNotFound(self.id.clone(), "no saved configuration".into()).into());
        };
        let mut vectors = self.vectors.lock().unwrap();
        for saved_vector in saved {
          if let Some(existing) = vectors.get_mut(saved_vector.name()) {
            let updates: Vec<_> = saved_vector.items().iter().map(|i| (i.name().clone(), i.value().clone())).collect();
            let _ = existing.copy_values(&updates);
            existing.set_state(PropertyState::Ok);
          }
        }
        let snapshots: Vec<_> = vectors.values().cloned().collect();
        drop(vectors);
        for snapshot in snapshots {
          bus.update_property(&self.id, &snapshot);
        }
      }
      Ok(())
    })();

    let final_snapshot = self.mutate(CONFIG, |v| {
      let _ = v.copy_values(&[("SAVE".into(), ItemValue::Switch(false)), ("LOAD".into(), ItemValue::Switch(false))]);
      v.set_state(if result.is_ok() { PropertyState::Ok } else { PropertyState::Alert });
    });
    if let Some(snapshot) = final_snapshot {
      bus.update_property(&self.id, &snapshot);
    }
    result
  }

  fn handle_simple_switch(&self, bus: &Bus, name: &str, candidate: &PropertyVector) -> StellarbusResult {
    let updates: Vec<_> = candidate
      .items()
      .iter()
      .map(|i| (i.name().clone(), i.value().clone()))
      .collect();
    let snapshot = self
      .mutate(name, |v| {
        if v.copy_values(&updates).is_ok() {
          v.set_state(PropertyState::Ok);
        } else {
          v.set_state(PropertyState::Alert);
        }
      })
      .ok_or_else(|| BusError::PropertyNotFound(self.id.clone(), name.to_string()))?;
    bus.update_property(&self.id, &snapshot);
    Ok(())
  }

  fn handle_connection(&self, bus: &Bus, hooks: &dyn ConnectionHooks, candidate: &PropertyVector) -> StellarbusResult {
    let wants_connect = candidate
      .item("CONNECT")
      .map(|i| matches!(i.value(), ItemValue::Switch(true)))
      .unwrap_or(false);

    let busy_snapshot = self.mutate(CONNECTION, |v| v.set_state(PropertyState::Busy));
    if let Some(snapshot) = busy_snapshot {
      bus.update_property(&self.id, &snapshot);
    }

    let already_connected = self.is_connected();
    let result = if wants_connect && !already_connected {
      hooks.connect(bus)
    } else if !wants_connect && already_connected {
      hooks.disconnect();
      Ok(())
    } else {
      Ok(())
    };

    let final_snapshot = self.mutate(CONNECTION, |v| {
      if result.is_ok() {
        let _ = v.copy_values(&[
          ("CONNECT".into(), ItemValue::Switch(wants_connect)),
          ("DISCONNECT".into(), ItemValue::Switch(!wants_connect)),
        ]);
        v.set_state(PropertyState::Ok);
      } else {
        v.set_state(PropertyState::Alert);
      }
    });
    if let Some(snapshot) = final_snapshot {
      bus.update_property(&self.id, &snapshot);
    }
    result
  }
}

pub(crate) fn number_item(name: &str, label: &str, value: NumberValue) -> Item {
  Item::new(name, label, ItemValue::Number(value))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bus::{Client, Device};
  use std::sync::{Arc, atomic::{AtomicBool, Ordering}};

  struct NoopHooks {
    connect_ok: AtomicBool,
  }
  impl ConnectionHooks for NoopHooks {
    fn connect(&self, _bus: &Bus) -> StellarbusResult {
      if self.connect_ok.load(Ordering::SeqCst) {
        Ok(())
      } else {
        Err(BusError::ChangeRejected("t".into(), "nope".into()).into())
      }
    }
    fn disconnect(&self) {}
  }

  struct TestDevice {
    base: DeviceBase,
    hooks: NoopHooks,
  }
  impl Device for TestDevice {
    fn id(&self) -> &str {
      self.base.id()
    }
    fn enumerate_properties(&self) -> Vec<PropertyVector> {
      self.base.enumerate()
    }
    fn change_property(&self, bus: &Bus, _client_id: &str, candidate: PropertyVector) -> StellarbusResult {
      self.base.default_change_property(bus, &self.hooks, &candidate).unwrap_or(Ok(()))
    }
  }

  struct Recorder {
    id: String,
    seen: Mutex<Vec<(String, String)>>,
  }
  impl Client for Recorder {
    fn id(&self) -> &str {
      &self.id
    }
    fn define_property(&self, _d: &str, _v: &PropertyVector) -> StellarbusResult {
      Ok(())
    }
    fn update_property(&self, device: &str, vector: &PropertyVector) -> StellarbusResult {
      self.seen.lock().unwrap().push((device.to_string(), format!("{:?}", vector.state())));
      Ok(())
    }
    fn delete_property(&self, _d: &str, _n: &str) -> StellarbusResult {
      Ok(())
    }
  }

  #[test]
  fn connection_accept_emits_ok() {
    let bus = Bus::default();
    let recorder = Arc::new(Recorder { id: "c".into(), seen: Mutex::new(vec![]) });
    bus.attach_client(recorder.clone());
    let device = Arc::new(TestDevice { base: DeviceBase::new("dev0", "Test"), hooks: NoopHooks { connect_ok: AtomicBool::new(true) } });
    bus.attach_device(device.clone()).unwrap();
    let candidate = PropertyVector::new(
      "dev0",
      CONNECTION,
      "Main",
      "Connection",
      Perm::ReadWrite,
      Some(SwitchRule::OneOfMany),
      vec![Item::new("CONNECT", "Connect", ItemValue::Switch(true)), Item::new("DISCONNECT", "Disconnect", ItemValue::Switch(false))],
    );
    bus.change_property("c", "dev0", candidate).unwrap();
    let seen = recorder.seen.lock().unwrap();
    assert!(seen.iter().any(|(_, s)| s == "Busy"));
    assert!(seen.iter().any(|(_, s)| s == "Ok"));
  }

  #[test]
  fn connection_reject_emits_alert() {
    let bus = Bus::default();
    let recorder = Arc::new(Recorder { id: "c".into(), seen: Mutex::new(vec![]) });
    bus.attach_client(recorder.clone());
    let device = Arc::new(TestDevice { base: DeviceBase::new("dev0", "Test"), hooks: NoopHooks { connect_ok: AtomicBool::new(false) } });
    bus.attach_device(device.clone()).unwrap();
    let candidate = PropertyVector::new(
      "dev0",
      CONNECTION,
      "Main",
      "Connection",
      Perm::ReadWrite,
      Some(SwitchRule::OneOfMany),
      vec![Item::new("CONNECT", "Connect", ItemValue::Switch(true)), Item::new("DISCONNECT", "Disconnect", ItemValue::Switch(false))],
    );
    let err = bus.change_property("c", "dev0", candidate);
    assert!(err.is_err());
    let seen = recorder.seen.lock().unwrap();
    assert!(seen.iter().any(|(_, s)| s == "Alert"));
  }

  #[test]
  fn config_save_then_load_restores_debug_vector() {
    use crate::config_store::InMemoryConfigStore;

    let bus = Bus::default();
    let base = DeviceBase::new("dev0", "Test");
    base.enable_config_persistence(Arc::new(InMemoryConfigStore::new()));
    let device = Arc::new(TestDevice { base, hooks: NoopHooks { connect_ok: AtomicBool::new(true) } });
    bus.attach_device(device.clone()).unwrap();

    let enable_debug = PropertyVector::new(
      "dev0",
      DEBUG,
      "Options",
      "Debug",
      Perm::ReadWrite,
      Some(SwitchRule::OneOfMany),
      vec![Item::new("ENABLE", "Enable", ItemValue::Switch(true)), Item::new("DISABLE", "Disable", ItemValue::Switch(false))],
    );
    bus.change_property("c", "dev0", enable_debug).unwrap();

    let save = PropertyVector::new(
      "dev0",
      CONFIG,
      "Options",
      "Configuration",
      Perm::ReadWrite,
      Some(SwitchRule::AtMostOne),
      vec![Item::new("SAVE", "Save", ItemValue::Switch(true)), Item::new("LOAD", "Load", ItemValue::Switch(false))],
    );
    bus.change_property("c", "dev0", save).unwrap();

    let disable_debug = PropertyVector::new(
      "dev0",
      DEBUG,
      "Options",
      "Debug",
      Perm::ReadWrite,
      Some(SwitchRule::OneOfMany),
      vec![Item::new("ENABLE", "Enable", ItemValue::Switch(false)), Item::new("DISABLE", "Disable", ItemValue::Switch(true))],
    );
    bus.change_property("c", "dev0", disable_debug).unwrap();
    assert!(matches!(device.base.get(DEBUG).unwrap().item("ENABLE").unwrap().value(), ItemValue::Switch(false)));

    let load = PropertyVector::new(
      "dev0",
      CONFIG,
      "Options",
      "Configuration",
      Perm::ReadWrite,
      Some(SwitchRule::AtMostOne),
      vec![Item::new("SAVE", "Save", ItemValue::Switch(false)), Item::new("LOAD", "Load", ItemValue::Switch(true))],
    );
    bus.change_property("c", "dev0", load).unwrap();
    assert!(matches!(device.base.get(DEBUG).unwrap().item("ENABLE").unwrap().value(), ItemValue::Switch(true)));
  }

  #[test]
  fn config_load_without_prior_save_is_rejected() {
    use crate::config_store::InMemoryConfigStore;

    let bus = Bus::default();
    let base = DeviceBase::new("dev0", "Test");
    base.enable_config_persistence(Arc::new(InMemoryConfigStore::new()));
    let device = Arc::new(TestDevice { base, hooks: NoopHooks { connect_ok: AtomicBool::new(true) } });
    bus.attach_device(device).unwrap();

    let load = PropertyVector::new(
      "dev0",
      CONFIG,
      "Options",
      "Configuration",
      Perm::ReadWrite,
      Some(SwitchRule::AtMostOne),
      vec![Item::new("SAVE", "Save", ItemValue::Switch(false)), Item::new("LOAD", "Load", ItemValue::Switch(true))],
    );
    assert!(bus.change_property("c", "dev0", load).is_err());
  }

  #[test]
  fn config_write_without_store_is_unsupported() {
    let bus = Bus::default();
    let device = Arc::new(TestDevice { base: DeviceBase::new("dev0", "Test"), hooks: NoopHooks { connect_ok: AtomicBool::new(true) } });
    bus.attach_device(device).unwrap();

    let save = PropertyVector::new(
      "dev0",
      CONFIG,
      "Options",
      "Configuration",
      Perm::ReadWrite,
      Some(SwitchRule::AtMostOne),
      vec![Item::new("SAVE", "Save", ItemValue::Switch(true)), Item::new("LOAD", "Load", ItemValue::Switch(false))],
    );
    assert!(bus.change_property("c", "dev0", save).is_err());
  }
}
