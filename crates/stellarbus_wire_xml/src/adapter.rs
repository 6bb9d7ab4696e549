// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Ties the outbound [Client](stellarbus_bus::Client) implementation and
//! the inbound parser together under one stream (§4.5): frames pulled off
//! the byte stream are routed either to `bus.change_property` or to the
//! BLOB-enable/getProperties bookkeeping, using the shared `(device, name)`
//! filter convention from §4.1.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;

use stellarbus_core::errors::StellarbusResult;
use stellarbus_core::property::PropertyVector;
use stellarbus_bus::{Bus, Client};

use crate::inbound::{BlobPolicy, InboundRequest, parse_enable_blob, parse_get_properties, parse_new_vector};
use crate::outbound::XmlOutbound;

const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 4096;

/// Constructs an [XmlAdapter] for an environment-dependent stream: the BLOB
/// policy newly attached clients start with before their first
/// `<enableBLOB>`, and the initial capacity reserved for the frame splitter
/// and outbound buffers (§6 "Configuration").
pub struct WireAdapterConfig {
  default_blob_policy: BlobPolicy,
  buffer_capacity: usize,
}

impl Default for WireAdapterConfig {
  fn default() -> Self {
    Self { default_blob_policy: BlobPolicy::Never, buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY }
  }
}

impl WireAdapterConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn default_blob_policy(mut self, policy: BlobPolicy) -> Self {
    self.default_blob_policy = policy;
    self
  }

  pub fn buffer_capacity(mut self, capacity: usize) -> Self {
    self.buffer_capacity = capacity;
    self
  }
}

/// Splits a byte stream into candidate top-level element fragments by
/// tracking `<tag ...>`/`</tag>` and self-closing `/>` boundaries, tolerant
/// of the legacy (non-self-closing) `delProperty` form.
pub struct FrameSplitter {
  buffer: String,
}

impl Default for FrameSplitter {
  fn default() -> Self {
    Self { buffer: String::new() }
  }
}

impl FrameSplitter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Self { buffer: String::with_capacity(capacity) }
  }

  pub fn push(&mut self, chunk: &str) {
    self.buffer.push_str(chunk);
  }

  /// Pops the next complete top-level element out of the buffer, if one is
  /// available.
  pub fn next_frame(&mut self) -> Option<String> {
    let start = self.buffer.find('<')?;
    let tag_name_end = self.buffer[start + 1..].find(|c: char| c.is_whitespace() || c == '>' || c == '/')? + start + 1;
    let tag_name = &self.buffer[start + 1..tag_name_end];
    if tag_name.is_empty() {
      return None;
    }
    let close_marker = format!("</{tag_name}>");
    let self_close_marker = "/>";

    let close_idx = self.buffer[start..].find(&close_marker);
    let self_close_idx = self.buffer[start..].find(self_close_marker);

    let end = match (close_idx, self_close_idx) {
      (Some(c), Some(s)) => {
        if s < c {
          start + s + self_close_marker.len()
        } else {
          start + c + close_marker.len()
        }
      }
      (Some(c), None) => start + c + close_marker.len(),
      (None, Some(s)) => start + s + self_close_marker.len(),
      (None, None) => return None,
    };
    let frame = self.buffer[start..end].to_string();
    self.buffer.drain(..end);
    Some(frame)
  }
}

/// One connected client's BLOB delivery filters, keyed as `"device"` or
/// `"device.name"` (empty name = wildcard, §4.1).
struct BlobFilters {
  default_policy: BlobPolicy,
  policies: std::collections::HashMap<String, BlobPolicy>,
}

impl BlobFilters {
  fn new(default_policy: BlobPolicy) -> Self {
    Self { default_policy, policies: std::collections::HashMap::new() }
  }

  fn set(&mut self, device: &str, name: &str, policy: BlobPolicy) {
    self.policies.insert(format!("{device}.{name}"), policy);
  }

  fn allows(&self, device: &str, name: &str) -> bool {
    let specific = self.policies.get(&format!("{device}.{name}"));
    let wildcard = self.policies.get(&format!("{device}."));
    match specific.or(wildcard).copied().unwrap_or(self.default_policy) {
      BlobPolicy::Never => false,
      BlobPolicy::Also | BlobPolicy::Only => true,
    }
  }
}

/// Couples an [XmlOutbound] stream with inbound-request handling against a
/// [Bus]. `subscribed` mirrors which devices this client has already been
/// sent `getProperties` definitions for, so a later wildcard request does
/// not re-define everything twice.
pub struct XmlAdapter<W: Write + Send> {
  client_id: String,
  bus: Bus,
  outbound: XmlOutbound<W>,
  splitter: Mutex<FrameSplitter>,
  blob_filters: Mutex<BlobFilters>,
  subscribed: Mutex<HashSet<String>>,
}

impl<W: Write + Send> XmlAdapter<W> {
  pub fn new(client_id: impl Into<String>, bus: Bus, writer: W) -> Self {
    Self::with_config(client_id, bus, writer, WireAdapterConfig::default())
  }

  pub fn with_config(client_id: impl Into<String>, bus: Bus, writer: W, config: WireAdapterConfig) -> Self {
    let client_id = client_id.into();
    Self {
      outbound: XmlOutbound::new(client_id.clone(), writer),
      client_id,
      bus,
      splitter: Mutex::new(FrameSplitter::with_capacity(config.buffer_capacity)),
      blob_filters: Mutex::new(BlobFilters::new(config.default_blob_policy)),
      subscribed: Mutex::new(HashSet::new()),
    }
  }

  pub fn outbound(&self) -> &XmlOutbound<W> {
    &self.outbound
  }

  /// Unwraps the adapter, returning the underlying writer. Intended for
  /// tests inspecting an in-memory buffer after a run.
  pub fn into_writer(self) -> W {
    self.outbound.into_writer()
  }

  /// `true` if a BLOB item belonging to `(device, name)` should be
  /// transmitted to this client (§4.5 `enableBLOB`).
  pub fn blob_allowed(&self, device: &str, name: &str) -> bool {
    self.blob_filters.lock().unwrap().allows(device, name)
  }

  /// Feeds a chunk of bytes read off the stream, processing every complete
  /// element it yields. A malformed or rejected element is logged and
  /// discarded rather than propagated: per §7, a bad element never tears
  /// down the stream or stops the remaining frames in this batch.
  pub fn feed(&self, chunk: &str) {
    let frames: Vec<String> = {
      let mut splitter = self.splitter.lock().unwrap();
      splitter.push(chunk);
      let mut frames = Vec::new();
      while let Some(frame) = splitter.next_frame() {
        frames.push(frame);
      }
      frames
    };
    for frame in frames {
      if let Err(e) = self.process_frame(&frame) {
        tracing::warn!(client = %self.client_id, error = %e, "discarding malformed or rejected inbound element");
      }
    }
  }

  fn process_frame(&self, frame: &str) -> StellarbusResult {
    if frame.starts_with("<new") {
      let (device, vector) = parse_new_vector(frame)?;
      self.bus.change_property(&self.client_id, &device, vector)?;
    } else if frame.starts_with("<enableBLOB") {
      if let InboundRequest::EnableBlob { device, name, policy } = parse_enable_blob(frame)? {
        self.blob_filters.lock().unwrap().set(&device, &name, policy);
      }
    } else if frame.starts_with("<getProperties") {
      if let InboundRequest::GetProperties { device, name } = parse_get_properties(frame)? {
        self.dispatch_get_properties(device.as_deref(), name.as_deref());
      }
    }
    Ok(())
  }

  fn dispatch_get_properties(&self, device: Option<&str>, name: Option<&str>) {
    let device_ids = match device {
      Some(d) => vec![d.to_string()],
      None => self.bus.device_ids(),
    };
    for device_id in device_ids {
      let Some(dev) = self.bus.device(&device_id) else { continue };
      self.subscribed.lock().unwrap().insert(device_id.clone());
      for vector in dev.enumerate_properties() {
        if name.is_none_or(|n| n == vector.name()) {
          let blob_ok = self.blob_allowed(&device_id, vector.name());
          let _ = self.outbound.define_property_filtered(&vector, blob_ok);
        }
      }
    }
  }
}

impl<W: Write + Send> Client for XmlAdapter<W> {
  fn id(&self) -> &str {
    &self.client_id
  }

  fn define_property(&self, device: &str, vector: &PropertyVector) -> StellarbusResult {
    let blob_ok = self.blob_allowed(device, vector.name());
    self.outbound.define_property_filtered(vector, blob_ok)
  }

  fn update_property(&self, device: &str, vector: &PropertyVector) -> StellarbusResult {
    let blob_ok = self.blob_allowed(device, vector.name());
    self.outbound.update_property_filtered(vector, blob_ok)
  }

  fn delete_property(&self, device: &str, name: &str) -> StellarbusResult {
    self.outbound.delete_property(device, name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use stellarbus_bus::Bus;

  #[test]
  fn blob_filters_fall_back_to_configured_default() {
    let never = BlobFilters::new(BlobPolicy::Never);
    assert!(!never.allows("ccd0", "CCD_IMAGE"));

    let also = BlobFilters::new(BlobPolicy::Also);
    assert!(also.allows("ccd0", "CCD_IMAGE"));
  }

  #[test]
  fn explicit_enable_blob_overrides_the_configured_default() {
    let mut filters = BlobFilters::new(BlobPolicy::Also);
    filters.set("ccd0", "CCD_IMAGE", BlobPolicy::Never);
    assert!(!filters.allows("ccd0", "CCD_IMAGE"));
    assert!(filters.allows("ccd1", "CCD_IMAGE"));
  }

  #[test]
  fn adapter_honors_configured_default_blob_policy() {
    let bus = Bus::default();
    let config = WireAdapterConfig::new().default_blob_policy(BlobPolicy::Also).buffer_capacity(256);
    let adapter = XmlAdapter::with_config("c1", bus, Vec::<u8>::new(), config);
    assert!(adapter.blob_allowed("ccd0", "CCD_IMAGE"));
  }

  #[test]
  fn malformed_frame_is_discarded_and_subsequent_frames_still_process() {
    let bus = Bus::default();
    let adapter = XmlAdapter::new("c1", bus, Vec::<u8>::new());
    // a malformed enableBLOB with an unrecognized policy, followed by a
    // well-formed one; the first must not stop the second from applying.
    adapter.feed("<enableBLOB device='ccd0' name='CCD_IMAGE'>Bogus</enableBLOB>");
    assert!(!adapter.blob_allowed("ccd0", "CCD_IMAGE"));
    adapter.feed("<enableBLOB device='ccd0' name='CCD_IMAGE'>Also</enableBLOB>");
    assert!(adapter.blob_allowed("ccd0", "CCD_IMAGE"));
  }
}
