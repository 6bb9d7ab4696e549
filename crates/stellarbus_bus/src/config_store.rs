// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Named property-state snapshots (§6 "Persisted state"): a device's
//! `SAVE_CONFIG`/`LOAD_CONFIG` request round-trips its current vectors
//! through a [ConfigStore]. The wire-level encoding of a snapshot (the same
//! XML dialect wrapped in `newXXXVector` elements) is a transport detail the
//! store is free to apply on top of this in-memory shape; the bus only
//! needs the property vectors themselves.

use dashmap::DashMap;

use stellarbus_core::property::PropertyVector;

/// Persists and restores one device's property vectors by device id.
pub trait ConfigStore: Send + Sync {
  fn save(&self, device_id: &str, vectors: Vec<PropertyVector>);
  fn load(&self, device_id: &str) -> Option<Vec<PropertyVector>>;
}

/// A process-lifetime [ConfigStore] backed by a concurrent map. Suitable as
/// a default for tests and for drivers that have nowhere durable to persist
/// to; a real deployment swaps in a store that writes the XML-wrapped
/// snapshot to disk.
#[derive(Default)]
pub struct InMemoryConfigStore {
  snapshots: DashMap<String, Vec<PropertyVector>>,
}

impl InMemoryConfigStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ConfigStore for InMemoryConfigStore {
  fn save(&self, device_id: &str, vectors: Vec<PropertyVector>) {
    self.snapshots.insert(device_id.to_string(), vectors);
  }

  fn load(&self, device_id: &str) -> Option<Vec<PropertyVector>> {
    self.snapshots.get(device_id).map(|v| v.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use stellarbus_core::property::{Item, ItemValue, NumberValue, Perm};

  #[test]
  fn save_then_load_roundtrips() {
    let store = InMemoryConfigStore::new();
    let vector = PropertyVector::new(
      "ccd0",
      "CCD_EXPOSURE",
      "Main",
      "Exposure",
      Perm::ReadWrite,
      None,
      vec![Item::new("EXPOSURE", "Exposure", ItemValue::Number(NumberValue::new(5.0, 0.0, 3600.0, 0.01)))],
    );
    store.save("ccd0", vec![vector.clone()]);
    let loaded = store.load("ccd0").unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].name(), vector.name());
  }

  #[test]
  fn load_missing_device_returns_none() {
    let store = InMemoryConfigStore::new();
    assert!(store.load("nope").is_none());
  }
}
