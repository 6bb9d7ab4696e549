// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The bus core (C2): registries of devices and clients, and the
//! publish/subscribe dispatch between them. Mirrors the reference server's
//! `Arc<DashMap<...>>` registry shape, but holds no registry-wide lock while
//! calling into a device or client (§5 "Suspension points").

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use stellarbus_core::{
  errors::{BusError, StellarbusResult},
  property::PropertyVector,
};

/// A logical producer of property vectors representing one role of one
/// hardware unit (§4.3, §4.4).
pub trait Device: Send + Sync {
  fn id(&self) -> &str;

  /// Called once, synchronously, when the device is inserted into the bus.
  fn attach(&self) -> StellarbusResult {
    Ok(())
  }

  /// Called once, synchronously, right before the device is removed from the
  /// bus registry.
  fn detach(&self) {}

  /// Snapshot of every vector this device currently owns.
  fn enumerate_properties(&self) -> Vec<PropertyVector>;

  /// Routes a client-originated write. The device is responsible for
  /// validating, mutating, and emitting an `update_property` on `bus`
  /// reflecting the new state (§4.2) — the bus itself does not fan this call
  /// out, only the resulting `update_property` is fanned out.
  fn change_property(&self, bus: &Bus, client_id: &str, candidate: PropertyVector) -> StellarbusResult;
}

/// A consumer of property notifications; may originate writes (§4.2).
pub trait Client: Send + Sync {
  fn id(&self) -> &str;

  fn attach(&self) {}
  fn detach(&self) {}

  fn define_property(&self, device: &str, vector: &PropertyVector) -> StellarbusResult;
  fn update_property(&self, device: &str, vector: &PropertyVector) -> StellarbusResult;
  fn delete_property(&self, device: &str, name: &str) -> StellarbusResult;
}

/// Registry of devices and clients plus the dispatch operations between them.
#[derive(Clone)]
pub struct Bus {
  devices: Arc<DashMap<String, Arc<dyn Device>>>,
  clients: Arc<DashMap<String, Arc<dyn Client>>>,
  // Per-device notification-ordering lock. Serializing at device granularity
  // (rather than per-vector) is a strict superset of the required ordering:
  // §4.2 only promises FIFO per (device, vector), and over-serializing
  // different vectors of the same device never violates that promise.
  notify_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
  max_devices: usize,
}

impl Default for Bus {
  fn default() -> Self {
    Self::new(usize::MAX)
  }
}

impl Bus {
  pub fn new(max_devices: usize) -> Self {
    Self {
      devices: Arc::new(DashMap::new()),
      clients: Arc::new(DashMap::new()),
      notify_locks: Arc::new(DashMap::new()),
      max_devices,
    }
  }

  fn notify_lock(&self, device_id: &str) -> Arc<Mutex<()>> {
    self
      .notify_locks
      .entry(device_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(())))
      .clone()
  }

  fn clients_snapshot(&self) -> Vec<Arc<dyn Client>> {
    self.clients.iter().map(|e| e.value().clone()).collect()
  }

  /// Inserts `device`, attaches it, then defines each of its current
  /// vectors to every registered client.
  pub fn attach_device(&self, device: Arc<dyn Device>) -> StellarbusResult {
    if self.devices.len() >= self.max_devices {
      return Err(BusError::TooManyElements(device.id().to_string()).into());
    }
    let id = device.id().to_string();
    self.devices.insert(id.clone(), device.clone());
    device.attach()?;
    let lock = self.notify_lock(&id);
    let _guard = lock.lock().unwrap();
    for vector in device.enumerate_properties() {
      for client in self.clients_snapshot() {
        if let Err(e) = client.define_property(&id, &vector) {
          tracing::warn!(client = client.id(), device = %id, error = %e, "client rejected define_property, continuing dispatch");
        }
      }
    }
    Ok(())
  }

  /// Emits a `delProperty` for every vector owned by `device_id` to every
  /// client, then removes the device and calls its `detach` hook.
  pub fn detach_device(&self, device_id: &str) -> StellarbusResult {
    let Some((_, device)) = self.devices.remove(device_id) else {
      return Err(BusError::DeviceNotFound(device_id.to_string()).into());
    };
    let lock = self.notify_lock(device_id);
    let _guard = lock.lock().unwrap();
    for vector in device.enumerate_properties() {
      for client in self.clients_snapshot() {
        if let Err(e) = client.delete_property(device_id, vector.name()) {
          tracing::warn!(client = client.id(), device = device_id, error = %e, "client rejected delete_property, continuing dispatch");
        }
      }
    }
    device.detach();
    self.notify_locks.remove(device_id);
    Ok(())
  }

  /// Inserts `client`, attaches it, then defines every vector of every
  /// currently-attached device to it (the "getProperties at startup"
  /// behavior §4.5 relies on).
  pub fn attach_client(&self, client: Arc<dyn Client>) {
    let id = client.id().to_string();
    self.clients.insert(id.clone(), client.clone());
    client.attach();
    for device in self.devices.iter().map(|e| e.value().clone()) {
      for vector in device.enumerate_properties() {
        if let Err(e) = client.define_property(device.id(), &vector) {
          tracing::warn!(client = %id, device = device.id(), error = %e, "client rejected define_property on attach");
        }
      }
    }
  }

  pub fn detach_client(&self, client_id: &str) {
    if let Some((_, client)) = self.clients.remove(client_id) {
      client.detach();
    }
  }

  /// Fans `vector` out to every client as a `define_property` notification.
  pub fn define_property(&self, device_id: &str, vector: &PropertyVector) {
    let lock = self.notify_lock(device_id);
    let _guard = lock.lock().unwrap();
    for client in self.clients_snapshot() {
      if let Err(e) = client.define_property(device_id, vector) {
        tracing::warn!(client = client.id(), device = device_id, error = %e, "client rejected define_property");
      }
    }
  }

  /// Fans `vector` out to every client as an `update_property` notification.
  /// This is the call a [Device::change_property] implementation makes after
  /// mutating its own state.
  pub fn update_property(&self, device_id: &str, vector: &PropertyVector) {
    let lock = self.notify_lock(device_id);
    let _guard = lock.lock().unwrap();
    for client in self.clients_snapshot() {
      if let Err(e) = client.update_property(device_id, vector) {
        tracing::warn!(client = client.id(), device = device_id, error = %e, "client rejected update_property");
      }
    }
  }

  /// Fans a single-vector deletion out to every client.
  pub fn delete_property(&self, device_id: &str, name: &str) {
    let lock = self.notify_lock(device_id);
    let _guard = lock.lock().unwrap();
    for client in self.clients_snapshot() {
      if let Err(e) = client.delete_property(device_id, name) {
        tracing::warn!(client = client.id(), device = device_id, error = %e, "client rejected delete_property");
      }
    }
  }

  /// Routes a client-originated write to the owning device. Errors from the
  /// device are returned only to `src_client_id`'s caller, never fanned out
  /// (§4.2 error policy).
  pub fn change_property(&self, src_client_id: &str, device_id: &str, candidate: PropertyVector) -> StellarbusResult {
    let device = self
      .devices
      .get(device_id)
      .map(|e| e.value().clone())
      .ok_or_else(|| BusError::DeviceNotFound(device_id.to_string()))?;
    device.change_property(self, src_client_id, candidate)
  }

  pub fn device(&self, device_id: &str) -> Option<Arc<dyn Device>> {
    self.devices.get(device_id).map(|e| e.value().clone())
  }

  pub fn device_ids(&self) -> Vec<String> {
    self.devices.iter().map(|e| e.key().clone()).collect()
  }
}
