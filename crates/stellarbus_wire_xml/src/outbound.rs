// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Outbound serialization (§4.5 "Outbound"): one [Client](stellarbus_bus::Client)
//! implementation per stream, writing raw bytes under a single per-stream
//! mutex. Attribute text is escaped; BLOB payloads are written through
//! [crate::blob::encode_wrapped] as raw bytes, never interpolated into a
//! format string, which is what made the original C implementation's
//! `xprintf`-based BLOB path injectable.

use std::io::Write;
use std::sync::Mutex;

use stellarbus_core::{
  errors::StellarbusResult,
  property::{ItemValue, PropertyState, PropertyVector},
};
use stellarbus_bus::Client;

use crate::blob;

fn escape_attr(value: &str, out: &mut String) {
  for c in value.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '\'' => out.push_str("&apos;"),
      '"' => out.push_str("&quot;"),
      other => out.push(other),
    }
  }
}

fn type_tag(value: &ItemValue) -> &'static str {
  match value {
    ItemValue::Text(_) => "Text",
    ItemValue::Number(_) => "Number",
    ItemValue::Switch(_) => "Switch",
    ItemValue::Light(_) => "Light",
    ItemValue::Blob(_) => "BLOB",
  }
}

fn vector_type_tag(vector: &PropertyVector) -> &'static str {
  vector.items().first().map(|item| type_tag(item.value())).unwrap_or("Text")
}

/// Serializes a client-facing XML stream over `W`, guarded by a single
/// mutex so writes from any thread interleave as whole elements (§5
/// "Concurrency").
pub struct XmlOutbound<W: Write + Send> {
  id: String,
  writer: Mutex<W>,
}

impl<W: Write + Send> XmlOutbound<W> {
  pub fn new(id: impl Into<String>, writer: W) -> Self {
    Self { id: id.into(), writer: Mutex::new(writer) }
  }

  /// Unwraps the adapter, returning the underlying writer. Intended for
  /// tests inspecting an in-memory buffer after a run.
  pub fn into_writer(self) -> W {
    self.writer.into_inner().unwrap()
  }

  fn write_item(out: &mut Vec<u8>, tag_prefix: &str, item: &stellarbus_core::property::Item, vector_state: PropertyState, blob_ok: bool) {
    let tag = type_tag(item.value());
    let mut name_esc = String::new();
    escape_attr(item.name(), &mut name_esc);
    let mut label_esc = String::new();
    escape_attr(item.label(), &mut label_esc);

    match item.value() {
      ItemValue::Blob(blob_value) => {
        if vector_state != PropertyState::Ok || !blob_ok {
          return;
        }
        out.extend_from_slice(format!("<{tag_prefix}{tag} name='{name_esc}' label='{label_esc}' format='{}'>", blob_value.format()).as_bytes());
        blob::encode_wrapped(blob_value.bytes(), out);
        out.extend_from_slice(format!("</{tag_prefix}{tag}>\n").as_bytes());
      }
      ItemValue::Text(s) => {
        let mut value_esc = String::new();
        escape_attr(s, &mut value_esc);
        out.extend_from_slice(format!("<{tag_prefix}{tag} name='{name_esc}' label='{label_esc}'>{value_esc}</{tag_prefix}{tag}>\n").as_bytes());
      }
      ItemValue::Number(n) => {
        out.extend_from_slice(format!("<{tag_prefix}{tag} name='{name_esc}' label='{label_esc}'>{}</{tag_prefix}{tag}>\n", n.value()).as_bytes());
      }
      ItemValue::Switch(s) => {
        let v = if *s { "On" } else { "Off" };
        out.extend_from_slice(format!("<{tag_prefix}{tag} name='{name_esc}' label='{label_esc}'>{v}</{tag_prefix}{tag}>\n").as_bytes());
      }
      ItemValue::Light(state) => {
        out.extend_from_slice(format!("<{tag_prefix}{tag} name='{name_esc}' label='{label_esc}'>{state}</{tag_prefix}{tag}>\n").as_bytes());
      }
    }
  }

  fn serialize_define(vector: &PropertyVector, blob_ok: bool) -> Vec<u8> {
    let tag = vector_type_tag(vector);
    let mut device_esc = String::new();
    escape_attr(vector.device(), &mut device_esc);
    let mut name_esc = String::new();
    escape_attr(vector.name(), &mut name_esc);
    let mut group_esc = String::new();
    escape_attr(vector.group(), &mut group_esc);
    let mut label_esc = String::new();
    escape_attr(vector.label(), &mut label_esc);

    let mut out = format!(
      "<def{tag}Vector device='{device_esc}' name='{name_esc}' group='{group_esc}' label='{label_esc}' perm='{}' state='{}'",
      vector.perm(),
      vector.state()
    )
    .into_bytes();
    if let Some(rule) = vector.rule() {
      out.extend_from_slice(format!(" rule='{rule}'").as_bytes());
    }
    out.extend_from_slice(b">\n");

    for item in vector.items() {
      Self::write_item(&mut out, "def", item, *vector.state(), blob_ok);
    }
    out.extend_from_slice(format!("</def{tag}Vector>\n").as_bytes());
    out
  }

  fn serialize_update(vector: &PropertyVector, blob_ok: bool) -> Vec<u8> {
    let tag = vector_type_tag(vector);
    let mut device_esc = String::new();
    escape_attr(vector.device(), &mut device_esc);
    let mut name_esc = String::new();
    escape_attr(vector.name(), &mut name_esc);

    let mut out = format!("<set{tag}Vector device='{device_esc}' name='{name_esc}' state='{}'>\n", vector.state()).into_bytes();
    for item in vector.items() {
      Self::write_item(&mut out, "one", item, *vector.state(), blob_ok);
    }
    out.extend_from_slice(format!("</set{tag}Vector>\n").as_bytes());
    out
  }

  fn write_all(&self, bytes: &[u8]) -> StellarbusResult {
    let mut writer = self.writer.lock().unwrap();
    writer
      .write_all(bytes)
      .map_err(|e| stellarbus_core::errors::WireError::MalformedElement(e.to_string()).into())
  }

  /// Writes a `def*Vector` element, withholding BLOB item bytes unless
  /// `blob_ok` — the per-`(device, name)` `<enableBLOB>` gate a caller with
  /// its own filter state (e.g. [crate::adapter::XmlAdapter]) applies before
  /// delegating here.
  pub(crate) fn define_property_filtered(&self, vector: &PropertyVector, blob_ok: bool) -> StellarbusResult {
    self.write_all(&Self::serialize_define(vector, blob_ok))
  }

  /// As [Self::define_property_filtered], for `set*Vector` elements.
  pub(crate) fn update_property_filtered(&self, vector: &PropertyVector, blob_ok: bool) -> StellarbusResult {
    self.write_all(&Self::serialize_update(vector, blob_ok))
  }
}

impl<W: Write + Send> Client for XmlOutbound<W> {
  fn id(&self) -> &str {
    &self.id
  }

  fn define_property(&self, _device: &str, vector: &PropertyVector) -> StellarbusResult {
    self.define_property_filtered(vector, true)
  }

  fn update_property(&self, _device: &str, vector: &PropertyVector) -> StellarbusResult {
    self.update_property_filtered(vector, true)
  }

  fn delete_property(&self, device: &str, name: &str) -> StellarbusResult {
    let mut device_esc = String::new();
    escape_attr(device, &mut device_esc);
    let mut name_esc = String::new();
    escape_attr(name, &mut name_esc);
    self.write_all(format!("<delProperty device='{device_esc}' name='{name_esc}'/>\n").as_bytes())
  }
}
