// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use std::time::Duration;

/// Thin wrapper over `tokio::time::sleep`, kept as its own seam so the
/// scheduler doesn't depend on `tokio::time` directly.
pub async fn sleep(duration: Duration) {
  tokio::time::sleep(duration).await;
}
