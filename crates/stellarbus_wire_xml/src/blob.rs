// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! BLOB base64 framing (§4.5 "BLOB framing"). Padding follows the standard
//! base64 rule `(3 - L mod 3) mod 3`; output is wrapped to exactly 18
//! quartets (72 encoded characters) per line with a trailing newline after
//! every line, including the final one. Raw byte writes only — never a
//! format string over attacker-controlled bytes, the BLOB-injection bug
//! named in the redesign notes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const QUARTETS_PER_LINE: usize = 18;
const CHARS_PER_LINE: usize = QUARTETS_PER_LINE * 4;

/// Encodes `bytes` as standard-alphabet base64, wrapped to 72 characters per
/// line, and appends the result (including each line's trailing newline) to
/// `out`.
pub fn encode_wrapped(bytes: &[u8], out: &mut Vec<u8>) {
  let encoded = STANDARD.encode(bytes);
  for chunk in encoded.as_bytes().chunks(CHARS_PER_LINE) {
    out.extend_from_slice(chunk);
    out.push(b'\n');
  }
}

/// Decodes a base64 payload that may span multiple wrapped lines (newlines
/// are stripped before decoding).
pub fn decode_wrapped(payload: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
  let stripped: Vec<u8> = payload.iter().copied().filter(|b| *b != b'\n' && *b != b'\r').collect();
  STANDARD.decode(stripped)
}
