// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

pub mod async_manager;
pub mod sleep;

pub use sleep::sleep;
