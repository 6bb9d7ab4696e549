// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

/// Installs a process-wide `tracing` subscriber so a failing end-to-end
/// scenario carries its wire-frame spans instead of a bare panic message.
#[allow(dead_code)]
pub fn setup_logging() {
  let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
}
