// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The process-wide hardware-bus lock (§5 "Shared resources"): "an exclusive
//! mutex acquired by a driver at first-connect and released at
//! last-disconnect", preventing two drivers from probing a shared physical
//! bus concurrently. Distinct from [hotplug](super::hotplug)'s `scan_lock`,
//! which only guards one reconciliation pass against another, not a hardware
//! handle's whole connected lifetime.

use std::sync::atomic::{AtomicBool, Ordering};

use stellarbus_core::errors::{DriverError, StellarbusResult};

/// A single exclusive permit held across a hardware handle's entire
/// connected lifetime, not just one critical section.
#[derive(Default)]
pub struct GlobalBusLock {
  held: AtomicBool,
}

impl GlobalBusLock {
  pub fn new() -> Self {
    Self::default()
  }

  /// Claims the lock. Fails with `DriverError::LockContended` if another
  /// handle's connect already holds it.
  pub fn acquire(&self) -> StellarbusResult {
    self
      .held
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .map(|_| ())
      .map_err(|_| DriverError::LockContended.into())
  }

  pub fn release(&self) {
    self.held.store(false, Ordering::SeqCst);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_acquire_is_rejected_until_release() {
    let lock = GlobalBusLock::new();
    lock.acquire().unwrap();
    assert!(lock.acquire().is_err());
    lock.release();
    lock.acquire().unwrap();
  }
}
