// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Error taxonomy for the instrument-control bus, mirroring the error kinds in
//! the protocol's error handling design: `failed`, `too_many_elements`,
//! `lock_error`, `not_found`, `unsupported`. `ok` is represented by
//! `Result::Ok` rather than a variant.

use displaydoc::Display;
use thiserror::Error;

pub type StellarbusResult<T = ()> = Result<T, StellarbusError>;

/// Errors raised while constructing or mutating a property vector.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum PropertyError {
  /// item `{0}` not found in vector `{1}`
  ItemNotFound(String, String),
  /// write to vector `{0}` would leave {1} SWITCH items true, violating rule {2}
  SwitchRuleViolation(String, usize, String),
  /// vector `{0}` is read-only
  ReadOnly(String),
  /// candidate item count ({0}) does not match vector `{1}` item count ({2})
  ItemCountMismatch(usize, String, usize),
}

/// Errors raised by bus registry/dispatch operations (C2).
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum BusError {
  /// device registry is full, cannot attach `{0}`
  TooManyElements(String),
  /// no device registered with id `{0}`
  DeviceNotFound(String),
  /// device `{0}` has no property named `{1}`
  PropertyNotFound(String, String),
  /// device `{0}` rejected the write: {1}
  ChangeRejected(String, String),
  /// property error: {0}
  #[error(transparent)]
  Property(#[from] PropertyError),
}

/// Errors raised by the hot-plug driver skeleton and shared-handle discipline (C4).
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum DriverError {
  /// global hardware lock contended, connect rejected
  LockContended,
  /// hardware `{0}` reported no open handle to operate on
  HandleNotOpen(String),
  /// operation `{0}` is not supported by this driver
  Unsupported(String),
  /// driver-level failure: {0}
  Failed(String),
}

/// Errors raised by the XML wire adapter (C5).
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum WireError {
  /// malformed element discarded: {0}
  MalformedElement(String),
  /// unknown property type tag `{0}`
  UnknownType(String),
  /// base64 payload length ({0}) is not a multiple of 4
  InvalidBase64Length(usize),
  /// invalid base64 byte {0:#x} at offset {1}
  InvalidBase64Byte(u8, usize),
}

/// Aggregated error type surfaced at crate boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StellarbusError {
  #[error(transparent)]
  Property(#[from] PropertyError),
  #[error(transparent)]
  Bus(#[from] BusError),
  #[error(transparent)]
  Driver(#[from] DriverError),
  #[error(transparent)]
  Wire(#[from] WireError),
}

impl StellarbusError {
  /// `true` if this error should downgrade a property's permission instead of
  /// failing the operation outright (§7 `unsupported` policy).
  pub fn is_unsupported(&self) -> bool {
    matches!(self, StellarbusError::Driver(DriverError::Unsupported(_)))
  }

  /// `true` if this error corresponds to the `not_found` error kind.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      StellarbusError::Bus(BusError::DeviceNotFound(_))
        | StellarbusError::Bus(BusError::PropertyNotFound(_, _))
    )
  }
}
