// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

/// Imaging configuration applied during the `IDLE --exposure_request-->
/// CONFIGURING` transition (§4.4): mode, ROI, bit depth, exposure time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcdConfig {
  pub roi_x: u32,
  pub roi_y: u32,
  pub roi_width: u32,
  pub roi_height: u32,
  pub bits_per_pixel: u8,
  pub exposure_seconds: f64,
}

impl CcdConfig {
  pub fn full_frame(width: u32, height: u32, bits_per_pixel: u8, exposure_seconds: f64) -> Self {
    Self { roi_x: 0, roi_y: 0, roi_width: width, roi_height: height, bits_per_pixel, exposure_seconds }
  }
}
