// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Inbound parsing (§4.5 "Inbound"). A small hand-rolled tag scanner: no XML
//! crate in the retrieval pack models this exact dialect (self-closing-tag
//! tolerance, attribute-order independence, raw BLOB bodies), so this
//! parses only the element shapes the protocol actually uses rather than
//! general XML.

use std::collections::HashMap;

use stellarbus_core::{
  errors::WireError,
  property::{Item, ItemValue, NumberValue, Perm, PropertyVector},
};

use crate::blob;

/// BLOB delivery filter set by `<enableBLOB>`, keyed by `(device, name)`
/// with an empty `name` meaning "every vector of this device" (§4.1
/// wildcard convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobPolicy {
  Never,
  Also,
  Only,
}

impl BlobPolicy {
  fn parse(s: &str) -> Option<Self> {
    match s {
      "Never" => Some(Self::Never),
      "Also" => Some(Self::Also),
      "Only" => Some(Self::Only),
      _ => None,
    }
  }
}

/// One parsed inbound request.
#[derive(Debug, Clone)]
pub enum InboundRequest {
  ChangeProperty { device: String, vector: PropertyVector },
  EnableBlob { device: String, name: String, policy: BlobPolicy },
  GetProperties { device: Option<String>, name: Option<String> },
}

/// Scans `key='value'` / `key="value"` pairs out of a tag's attribute
/// section. Tolerant of the attribute-order independence the protocol
/// requires; unrecognized text between pairs is skipped.
fn parse_attrs(tag_body: &str) -> HashMap<String, String> {
  let mut attrs = HashMap::new();
  let mut rest = tag_body;
  loop {
    let Some(eq) = rest.find('=') else { break };
    let key = rest[..eq].trim();
    let after_eq = &rest[eq + 1..];
    let Some(quote) = after_eq.chars().next().filter(|c| *c == '\'' || *c == '"') else {
      rest = after_eq;
      continue;
    };
    let after_quote = &after_eq[1..];
    let Some(close) = after_quote.find(quote) else { break };
    let raw_value = &after_quote[..close];
    if !key.is_empty() {
      let unescaped = raw_value
        .replace("&lt;", "<")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
      attrs.insert(key.to_string(), unescaped);
    }
    rest = &after_quote[close + 1..];
  }
  attrs
}

fn item_value_for(type_tag: &str, text: &str) -> Result<ItemValue, WireError> {
  match type_tag {
    "Text" => Ok(ItemValue::Text(text.to_string())),
    "Number" => {
      let v: f64 = text.trim().parse().map_err(|_| WireError::MalformedElement(format!("bad number: {text}")))?;
      Ok(ItemValue::Number(NumberValue::new(v, f64::MIN, f64::MAX, 0.0)))
    }
    "Switch" => Ok(ItemValue::Switch(text.trim() == "On")),
    "BLOB" => {
      let decoded = blob::decode_wrapped(text.trim().as_bytes()).map_err(|_| WireError::MalformedElement("bad base64 in oneBLOB".into()))?;
      Ok(ItemValue::Blob(stellarbus_core::property::BlobValue::new("", decoded)))
    }
    other => Err(WireError::UnknownType(other.to_string())),
  }
}

/// Parses one complete `<new{Type}Vector ...>...<one{Type} ...>v</one{Type}>...</new{Type}Vector>`
/// fragment into a [PropertyVector] ready for `bus.change_property`.
pub fn parse_new_vector(fragment: &str) -> Result<(String, PropertyVector), WireError> {
  let open_start = fragment.find("<new").ok_or_else(|| WireError::MalformedElement("no new*Vector open tag".into()))?;
  let open_end = fragment[open_start..].find('>').ok_or_else(|| WireError::MalformedElement("unterminated new*Vector tag".into()))?
    + open_start;
  let open_tag = &fragment[open_start + 1..open_end];
  let mut parts = open_tag.splitn(2, char::is_whitespace);
  let tag_name = parts.next().unwrap_or("");
  let type_tag = tag_name
    .strip_prefix("new")
    .and_then(|s| s.strip_suffix("Vector"))
    .ok_or_else(|| WireError::UnknownType(tag_name.to_string()))?;
  let attrs = parse_attrs(parts.next().unwrap_or(""));
  let device = attrs.get("device").cloned().unwrap_or_default();
  let name = attrs.get("name").cloned().unwrap_or_default();

  let mut items = Vec::new();
  let item_open = format!("<one{type_tag}");
  let item_close = format!("</one{type_tag}>");
  let mut cursor = open_end;
  while let Some(rel_start) = fragment[cursor..].find(&item_open) {
    let item_start = cursor + rel_start;
    let tag_end = fragment[item_start..].find('>').ok_or_else(|| WireError::MalformedElement("unterminated one* tag".into()))? + item_start;
    let item_attrs_str = &fragment[item_start + 1 + format!("one{type_tag}").len()..tag_end];
    let item_attrs = parse_attrs(item_attrs_str);
    let item_name = item_attrs.get("name").cloned().unwrap_or_default();
    let Some(rel_close) = fragment[tag_end..].find(&item_close) else {
      return Err(WireError::MalformedElement("unterminated one* body".into()));
    };
    let close_start = tag_end + rel_close;
    let text = &fragment[tag_end + 1..close_start];
    let value = item_value_for(type_tag, text)?;
    items.push(Item::new(item_name, "", value));
    cursor = close_start + item_close.len();
  }

  let vector = PropertyVector::new(device.clone(), name, "", "", Perm::ReadWrite, None, items);
  Ok((device, vector))
}

/// Parses a self-closing or open/close `<enableBLOB device='…' name='…'>Policy</enableBLOB>`
/// element.
pub fn parse_enable_blob(fragment: &str) -> Result<InboundRequest, WireError> {
  let open_start = fragment.find("<enableBLOB").ok_or_else(|| WireError::MalformedElement("no enableBLOB tag".into()))?;
  let open_end = fragment[open_start..].find('>').ok_or_else(|| WireError::MalformedElement("unterminated enableBLOB".into()))?
    + open_start;
  let attrs = parse_attrs(&fragment[open_start + "<enableBLOB".len()..open_end]);
  let device = attrs.get("device").cloned().unwrap_or_default();
  let name = attrs.get("name").cloned().unwrap_or_default();
  let body_start = open_end + 1;
  let body_end = fragment[body_start..].find("</enableBLOB>").map(|i| body_start + i).unwrap_or(body_start);
  let policy_text = fragment[body_start..body_end].trim();
  let policy = BlobPolicy::parse(policy_text).ok_or_else(|| WireError::MalformedElement(format!("bad enableBLOB policy: {policy_text}")))?;
  Ok(InboundRequest::EnableBlob { device, name, policy })
}

/// Parses a `<getProperties [version] [device='…'] [name='…']/>` element.
pub fn parse_get_properties(fragment: &str) -> Result<InboundRequest, WireError> {
  let open_start = fragment.find("<getProperties").ok_or_else(|| WireError::MalformedElement("no getProperties tag".into()))?;
  let open_end = fragment[open_start..]
    .find(['>'])
    .ok_or_else(|| WireError::MalformedElement("unterminated getProperties".into()))?
    + open_start;
  let attrs = parse_attrs(&fragment[open_start + "<getProperties".len()..open_end]);
  Ok(InboundRequest::GetProperties { device: attrs.get("device").cloned(), name: attrs.get("name").cloned() })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_new_number_vector() {
    let fragment = "<newNumberVector device='ccd0' name='CCD_EXPOSURE'><oneNumber name='EXPOSURE'>5</oneNumber></newNumberVector>";
    let (device, vector) = parse_new_vector(fragment).unwrap();
    assert_eq!(device, "ccd0");
    assert_eq!(vector.name(), "CCD_EXPOSURE");
    let item = vector.item("EXPOSURE").unwrap();
    assert!(matches!(item.value(), ItemValue::Number(n) if n.value() == 5.0));
  }

  #[test]
  fn parses_new_switch_vector_with_two_items() {
    let fragment = "<newSwitchVector device='dev0' name='CONNECTION'><oneSwitch name='CONNECT'>On</oneSwitch><oneSwitch name='DISCONNECT'>Off</oneSwitch></newSwitchVector>";
    let (_, vector) = parse_new_vector(fragment).unwrap();
    assert!(matches!(vector.item("CONNECT").unwrap().value(), ItemValue::Switch(true)));
    assert!(matches!(vector.item("DISCONNECT").unwrap().value(), ItemValue::Switch(false)));
  }

  #[test]
  fn parses_enable_blob() {
    let fragment = "<enableBLOB device='ccd0' name='CCD_IMAGE'>Also</enableBLOB>";
    let request = parse_enable_blob(fragment).unwrap();
    assert!(matches!(request, InboundRequest::EnableBlob { policy: BlobPolicy::Also, .. }));
  }

  #[test]
  fn parses_get_properties_wildcard() {
    let fragment = "<getProperties version='1.7'/>";
    let request = parse_get_properties(fragment).unwrap();
    assert!(matches!(request, InboundRequest::GetProperties { device: None, name: None }));
  }

  #[test]
  fn parses_get_properties_scoped() {
    let fragment = "<getProperties device='ccd0' name='CCD_EXPOSURE'/>";
    let request = parse_get_properties(fragment).unwrap();
    assert!(matches!(request, InboundRequest::GetProperties { device: Some(d), name: Some(n) } if d == "ccd0" && n == "CCD_EXPOSURE"));
  }
}
