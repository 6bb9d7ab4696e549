// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The instrument-control bus: device/client registries and dispatch (C2),
//! the shared device lifecycle scaffolding (C3), the hardware driver
//! contract with hot-plug reconciliation and shared-handle discipline (C4),
//! concrete device classes, and FITS image framing (C6).

pub mod bus;
pub mod classes;
pub mod config_store;
pub mod device_base;
pub mod driver;
pub mod image;

pub use bus::{Bus, Client, Device};
pub use classes::{CcdDevice, GenericDevice, GuiderDevice, WheelDevice};
pub use config_store::{ConfigStore, InMemoryConfigStore};
pub use device_base::DeviceBase;
pub use driver::{HardwareDriver, HotplugConfig, HotplugManager, Role, SharedHandle};
pub use image::{FITS_HEADER_SIZE, FitsImage, ImageSink};
