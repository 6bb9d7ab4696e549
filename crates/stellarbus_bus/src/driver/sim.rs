// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! An in-process [HardwareDriver] test double with an injectable, mutable
//! enumeration list, grounded in the reference server's
//! `TestDeviceCommunicationManager`/`TestHardwareCreator` pair: tests push
//! and pop entries from a shared list and the manager reports exactly that
//! list back on the next scan, rather than touching any real bus or SDK.

use std::sync::Mutex;

use tokio::sync::mpsc;

use stellarbus_core::errors::{StellarbusError, StellarbusResult};

use super::{CcdConfig, GuideDirection, HardwareDriver, HardwareEvent, Role};

#[derive(Debug, Clone)]
struct SimState {
  open: bool,
  temperature: f64,
  cooler_on: bool,
  configured: Option<CcdConfig>,
  slot: u32,
}

impl Default for SimState {
  fn default() -> Self {
    Self { open: false, temperature: 20.0, cooler_on: false, configured: None, slot: 1 }
  }
}

/// A driver double whose present hardware ids and per-unit roles are set by
/// the test via [SimHardwareDriver::set_present] / [SimHardwareDriver::unplug],
/// and whose per-unit state ([SimHardwareDriver::get_temperature],
/// [SimHardwareDriver::cooler_on]) is observable for assertions.
pub struct SimHardwareDriver {
  present: Mutex<Vec<(String, Vec<Role>)>>,
  state: Mutex<std::collections::HashMap<String, SimState>>,
}

impl Default for SimHardwareDriver {
  fn default() -> Self {
    Self { present: Mutex::new(Vec::new()), state: Mutex::new(std::collections::HashMap::new()) }
  }
}

impl SimHardwareDriver {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replaces the currently-enumerated hardware, as if a hot-plug scan ran
  /// against a different set of connected units.
  pub fn set_present(&self, units: Vec<(String, Vec<Role>)>) {
    *self.present.lock().unwrap() = units;
  }

  pub fn plug(&self, id: impl Into<String>, roles: Vec<Role>) {
    self.present.lock().unwrap().push((id.into(), roles));
  }

  pub fn unplug(&self, id: &str) {
    self.present.lock().unwrap().retain(|(present_id, _)| present_id != id);
  }

  pub fn is_open(&self, id: &str) -> bool {
    self.state.lock().unwrap().get(id).map(|s| s.open).unwrap_or(false)
  }

  pub fn current_slot(&self, id: &str) -> u32 {
    self.state.lock().unwrap().get(id).map(|s| s.slot).unwrap_or(1)
  }

  /// Delivers `event` synchronously to whoever is listening on `events`, as
  /// a test stand-in for the vendor SDK's callback thread.
  pub fn deliver(&self, events: &mpsc::Sender<HardwareEvent>, event: HardwareEvent) {
    let _ = events.try_send(event);
  }
}

impl HardwareDriver for SimHardwareDriver {
  fn enumerate(&self) -> Vec<String> {
    self.present.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
  }

  fn roles(&self, id: &str) -> Vec<Role> {
    self
      .present
      .lock()
      .unwrap()
      .iter()
      .find(|(present_id, _)| present_id == id)
      .map(|(_, roles)| roles.clone())
      .unwrap_or_default()
  }

  fn open_hardware(&self, id: &str) -> StellarbusResult {
    self.state.lock().unwrap().entry(id.to_string()).or_default().open = true;
    Ok(())
  }

  fn close_hardware(&self, id: &str) {
    if let Some(s) = self.state.lock().unwrap().get_mut(id) {
      s.open = false;
    }
  }

  fn configure(&self, id: &str, config: &CcdConfig) -> StellarbusResult {
    self.state.lock().unwrap().entry(id.to_string()).or_default().configured = Some(*config);
    Ok(())
  }

  fn start_pull(&self, _id: &str, _events: mpsc::Sender<HardwareEvent>) -> StellarbusResult {
    Ok(())
  }

  fn start_push(&self, _id: &str, _frame_count: u32, _events: mpsc::Sender<HardwareEvent>) -> StellarbusResult {
    Ok(())
  }

  fn abort(&self, _id: &str) -> StellarbusResult {
    Ok(())
  }

  fn pulse_guide(&self, _id: &str, _direction: GuideDirection, _duration_ms: u32) -> StellarbusResult {
    Ok(())
  }

  fn get_temperature(&self, id: &str) -> Result<f64, StellarbusError> {
    self
      .state
      .lock()
      .unwrap()
      .get(id)
      .map(|s| s.temperature)
      .ok_or_else(|| super::unsupported("get_temperature: unknown unit"))
  }

  fn set_temperature(&self, id: &str, target: f64, cooler_on: bool) -> StellarbusResult {
    let mut state = self.state.lock().unwrap();
    let entry = state.entry(id.to_string()).or_default();
    entry.temperature = target;
    entry.cooler_on = cooler_on;
    Ok(())
  }

  fn cooler_on(&self, id: &str) -> bool {
    self.state.lock().unwrap().get(id).map(|s| s.cooler_on).unwrap_or(false)
  }

  fn move_to_slot(&self, id: &str, slot: u32) -> StellarbusResult {
    self.state.lock().unwrap().entry(id.to_string()).or_default().slot = slot;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn enumerate_reflects_plug_unplug() {
    let sim = SimHardwareDriver::new();
    assert!(sim.enumerate().is_empty());
    sim.plug("hw0", vec![Role::Camera]);
    assert_eq!(sim.enumerate(), vec!["hw0".to_string()]);
    sim.unplug("hw0");
    assert!(sim.enumerate().is_empty());
  }

  #[test]
  fn open_close_tracks_state() {
    let sim = SimHardwareDriver::new();
    sim.plug("hw0", vec![Role::Camera]);
    assert!(!sim.is_open("hw0"));
    sim.open_hardware("hw0").unwrap();
    assert!(sim.is_open("hw0"));
    sim.close_hardware("hw0");
    assert!(!sim.is_open("hw0"));
  }

  #[test]
  fn set_temperature_and_cooler_roundtrip() {
    let sim = SimHardwareDriver::new();
    sim.plug("hw0", vec![Role::Camera]);
    sim.set_temperature("hw0", -10.0, true).unwrap();
    assert_eq!(sim.get_temperature("hw0").unwrap(), -10.0);
    assert!(sim.cooler_on("hw0"));
  }
}
