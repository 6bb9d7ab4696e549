// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! FITS framing and the image sink hook (C6). Grounded in
//! `indigo_ccd_altair.c`'s `pull_callback`, which places raw pixels at a
//! fixed header offset within a single allocation so the FITS primary header
//! can be written in place with no copy.

/// Smallest multiple of 2880 (one FITS logical record) that fits the
/// mandatory primary-header keyword set (`SIMPLE`, `BITPIX`, `NAXIS`,
/// `NAXIS1`, `NAXIS2`, `END`, padding) for every bit depth this driver
/// skeleton supports.
pub const FITS_HEADER_SIZE: usize = 2880;

/// A frame ready for delivery to a client's image pipeline: pixel bytes
/// begin at [FITS_HEADER_SIZE] within `buffer`; the bytes before that are
/// the FITS primary header written by [process_image].
#[derive(Debug, Clone)]
pub struct FitsImage {
  pub buffer: Vec<u8>,
  pub width: u32,
  pub height: u32,
  pub bits_per_pixel: u8,
}

/// Receives frames dispatched by [process_image]. Implemented by whatever
/// sits downstream of a device (the XML wire adapter's BLOB framing, a test
/// harness, ...).
pub trait ImageSink: Send + Sync {
  fn accept(&self, device: &str, image: FitsImage);
}

fn bitpix(bits_per_pixel: u8) -> i32 {
  match bits_per_pixel {
    8 => 8,
    16 => 16,
    32 => 32,
    _ => 16,
  }
}

fn write_card(header: &mut [u8], offset: usize, card: &str) {
  let bytes = card.as_bytes();
  let end = (offset + 80).min(header.len());
  let n = bytes.len().min(end - offset);
  header[offset..offset + n].copy_from_slice(&bytes[..n]);
  for b in header.iter_mut().take(end).skip(offset + n) {
    *b = b' ';
  }
}

/// Writes the FITS primary header into `buffer[0..FITS_HEADER_SIZE]` in
/// place, then hands the whole buffer to `sink`. `buffer.len()` must already
/// be `FITS_HEADER_SIZE + pixel_byte_count`; the pixel bytes starting at
/// [FITS_HEADER_SIZE] are left untouched.
pub fn process_image(
  device: &str,
  mut buffer: Vec<u8>,
  width: u32,
  height: u32,
  bits_per_pixel: u8,
  sink: &dyn ImageSink,
) {
  assert!(buffer.len() >= FITS_HEADER_SIZE, "buffer must reserve the FITS header offset");
  let header = &mut buffer[..FITS_HEADER_SIZE];
  for chunk in header.chunks_mut(80) {
    chunk.fill(b' ');
  }
  write_card(header, 0, &format!("SIMPLE  = {:>20}", "T"));
  write_card(header, 80, &format!("BITPIX  = {:>20}", bitpix(bits_per_pixel)));
  write_card(header, 160, &format!("NAXIS   = {:>20}", 2));
  write_card(header, 240, &format!("NAXIS1  = {:>20}", width));
  write_card(header, 320, &format!("NAXIS2  = {:>20}", height));
  write_card(header, 400, "END");

  sink.accept(device, FitsImage { buffer, width, height, bits_per_pixel });
}
