// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Core data model and runtime primitives for the instrument-control bus:
//! the typed property vector model (C1), the aggregated error taxonomy, the
//! per-device timer/async scheduler (C7), and small async-runtime utilities
//! shared by the bus and wire-adapter crates.

pub mod errors;
pub mod property;
pub mod scheduler;
pub mod util;

pub use errors::{StellarbusError, StellarbusResult};
pub use property::{BlobValue, Item, ItemValue, NumberValue, Perm, PropertyState, PropertyVector, SwitchRule};
pub use scheduler::{PeriodicTimer, Scheduler, TimerHandle};
