// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Concrete device classes built on [DeviceBase](crate::device_base::DeviceBase).
//! Each class pre-populates its domain's mandatory vectors and implements
//! the class-specific half of `change_property`, falling back to the base
//! for the universal `CONNECTION`/`DEBUG`/`INFO` trio.

pub mod ccd;
pub mod generic;
pub mod guider;
pub mod wheel;

pub use ccd::CcdDevice;
pub use generic::GenericDevice;
pub use guider::GuiderDevice;
pub use wheel::WheelDevice;
