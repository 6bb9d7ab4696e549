// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The driver skeleton (C4): the capability contract a vendor-SDK wrapper
//! must satisfy, shared-handle discipline, and hot-plug reconciliation.
//! Grounded directly in `indigo_ccd_altair.c`'s `altair_private_data`
//! (shared handle + role back-pointers), `pull_callback`/`push_callback`
//! (the `HardwareEvent` variants below), and `hotplug_callback` (see
//! [hotplug]), redesigned per SPEC_FULL §9 to use a concurrent map keyed by
//! hardware id instead of a fixed-size array walked by a confused loop
//! index.

pub mod ccd_config;
pub mod global_lock;
pub mod hotplug;
pub mod shared_handle;
pub mod sim;

use tokio::sync::mpsc;

use stellarbus_core::errors::{DriverError, StellarbusError, StellarbusResult};

/// One logical personality a hardware unit can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
  Camera,
  Guider,
}

/// ST-4 pulse-guide direction, matching `Altaircam_ST4PlusGuide`'s
/// 0=N,1=S,2=E,3=W convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideDirection {
  North,
  South,
  East,
  West,
}

/// Events a vendor SDK callback thread reports back through the per-device
/// worker channel (§9 "Callback-driven lifecycle"). `FrameReady` carries a
/// buffer already laid out with the FITS header reservation at its front
/// (C6).
#[derive(Debug)]
pub enum HardwareEvent {
  FrameReady { buffer: Vec<u8>, width: u32, height: u32, bits_per_pixel: u8 },
  StreamFrameReady { buffer: Vec<u8>, width: u32, height: u32, bits_per_pixel: u8, remaining: u32 },
  Timeout,
  Disconnected,
  Error(String),
}

pub use ccd_config::CcdConfig;

/// The capability contract a vendor-SDK wrapper provides to the skeleton
/// (§4.4, §6 "Driver contract"). Hardware is addressed by a stable string id
/// returned from [enumerate](HardwareDriver::enumerate); callers never see
/// raw SDK handles.
pub trait HardwareDriver: Send + Sync {
  /// Currently-present hardware instances.
  fn enumerate(&self) -> Vec<String>;

  /// The roles one hardware unit exposes (e.g. `[Camera]`, or
  /// `[Camera, Guider]` when the unit has an ST-4 port).
  fn roles(&self, id: &str) -> Vec<Role>;

  /// Opens the underlying hardware handle. Called by [SharedHandle] only on
  /// the 0-to-1 role-connection transition.
  fn open_hardware(&self, id: &str) -> StellarbusResult;

  /// Closes the underlying hardware handle. Called by [SharedHandle] only on
  /// the last-role-disconnect transition.
  fn close_hardware(&self, id: &str);

  fn configure(&self, id: &str, config: &CcdConfig) -> StellarbusResult;

  /// Arms the pull callback; exactly one [HardwareEvent] is expected on
  /// `events` per call.
  fn start_pull(&self, id: &str, events: mpsc::Sender<HardwareEvent>) -> StellarbusResult;

  /// Arms the push (streaming) callback; one [HardwareEvent::StreamFrameReady]
  /// is expected per frame until `frame_count` is reached or `abort` is
  /// called.
  fn start_push(&self, id: &str, frame_count: u32, events: mpsc::Sender<HardwareEvent>) -> StellarbusResult;

  /// Cancels any in-flight pull/push and stops the sensor.
  fn abort(&self, id: &str) -> StellarbusResult;

  fn pulse_guide(&self, id: &str, direction: GuideDirection, duration_ms: u32) -> StellarbusResult;

  fn get_temperature(&self, id: &str) -> Result<f64, StellarbusError>;

  fn set_temperature(&self, id: &str, target: f64, cooler_on: bool) -> StellarbusResult;

  fn cooler_on(&self, id: &str) -> bool;

  /// Physically rotates a filter wheel to `slot`, blocking until the vendor
  /// SDK reports the move complete.
  fn move_to_slot(&self, id: &str, slot: u32) -> StellarbusResult;
}

pub(crate) fn unsupported(op: &str) -> StellarbusError {
  DriverError::Unsupported(op.to_string()).into()
}

pub use global_lock::GlobalBusLock;
pub use hotplug::{HotplugConfig, HotplugManager};
pub use shared_handle::SharedHandle;
