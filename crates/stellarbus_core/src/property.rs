// Stellarbus Source Code File
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The property model (C1): typed, labelled property vectors and the items
//! they contain. A vector's type and item schema are fixed for its lifetime
//! (I3); changing them requires a delete-then-define cycle performed by the
//! owning device, never by mutating a vector in place.

use crate::errors::PropertyError;
use getset::{CopyGetters, Getters};

/// Access mode of a property vector, as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Perm {
  #[strum(serialize = "ro")]
  ReadOnly,
  #[strum(serialize = "wo")]
  WriteOnly,
  #[strum(serialize = "rw")]
  ReadWrite,
}

/// Lifecycle indicator carried by every property vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum PropertyState {
  Idle,
  Ok,
  Busy,
  Alert,
}

/// Arity constraint for SWITCH vectors (I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SwitchRule {
  OneOfMany,
  AtMostOne,
  AnyOfMany,
}

/// One leaf value inside a NUMBER item: the client's last-requested value
/// (`target`) and the device-observed value (`value`) are distinct and are
/// not required to be equal (I7).
#[derive(Debug, Clone, Copy, PartialEq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct NumberValue {
  pub value: f64,
  pub target: f64,
  pub min: f64,
  pub max: f64,
  pub step: f64,
}

impl NumberValue {
  pub fn new(value: f64, min: f64, max: f64, step: f64) -> Self {
    Self { value, target: value, min, max, step }
  }
}

/// A BLOB payload. `format` is a mime-like suffix (`.fits`, `.jpeg`); bytes
/// are only populated on the wire when the owning vector's state is OK (I6).
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct BlobValue {
  format: String,
  bytes: Vec<u8>,
}

impl BlobValue {
  pub fn new(format: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self { format: format.into(), bytes }
  }

  pub fn size(&self) -> usize {
    self.bytes.len()
  }
}

/// The type-specific payload of a single item, the tagged sum called for by
/// the "typed polymorphism across property types" design note: shared item
/// attributes (name, label) live outside this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
  Text(String),
  Number(NumberValue),
  Switch(bool),
  Light(PropertyState),
  Blob(BlobValue),
}

impl ItemValue {
  pub fn type_name(&self) -> &'static str {
    match self {
      ItemValue::Text(_) => "Text",
      ItemValue::Number(_) => "Number",
      ItemValue::Switch(_) => "Switch",
      ItemValue::Light(_) => "Light",
      ItemValue::Blob(_) => "Blob",
    }
  }
}

/// A single named leaf inside a property vector.
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct Item {
  name: String,
  label: String,
  value: ItemValue,
}

impl Item {
  pub fn new(name: impl Into<String>, label: impl Into<String>, value: ItemValue) -> Self {
    Self { name: name.into(), label: label.into(), value }
  }

  pub fn value_mut(&mut self) -> &mut ItemValue {
    &mut self.value
  }
}

/// A named collection of items owned by exactly one device (§3). `type` and
/// item schema are immutable once defined; `rule` only applies to SWITCH
/// vectors.
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct PropertyVector {
  device: String,
  name: String,
  group: String,
  label: String,
  perm: Perm,
  state: PropertyState,
  rule: Option<SwitchRule>,
  items: Vec<Item>,
}

impl PropertyVector {
  pub fn new(
    device: impl Into<String>,
    name: impl Into<String>,
    group: impl Into<String>,
    label: impl Into<String>,
    perm: Perm,
    rule: Option<SwitchRule>,
    items: Vec<Item>,
  ) -> Self {
    Self {
      device: device.into(),
      name: name.into(),
      group: group.into(),
      label: label.into(),
      perm,
      state: PropertyState::Idle,
      rule,
      items,
    }
  }

  pub fn set_state(&mut self, state: PropertyState) {
    self.state = state;
  }

  pub fn item(&self, name: &str) -> Option<&Item> {
    self.items.iter().find(|i| i.name() == name)
  }

  pub fn item_mut(&mut self, name: &str) -> Option<&mut Item> {
    self.items.iter_mut().find(|i| i.name() == name)
  }

  pub fn items_mut(&mut self) -> &mut Vec<Item> {
    &mut self.items
  }

  /// A candidate matches a registered vector when the candidate's `device`
  /// and `name` are empty (wildcard) or equal to the registered one (§4.1).
  pub fn matches(&self, candidate_device: &str, candidate_name: &str) -> bool {
    (candidate_device.is_empty() || candidate_device == self.device)
      && (candidate_name.is_empty() || candidate_name == self.name)
  }

  /// Count of `true` SWITCH items, used to enforce (I4).
  fn true_switch_count(&self) -> usize {
    self
      .items
      .iter()
      .filter(|i| matches!(i.value(), ItemValue::Switch(true)))
      .count()
  }

  /// Applies client-supplied item values from `updates` onto `self`,
  /// preserving items not named in `updates`. Validates the SWITCH `rule`
  /// invariant (I4) before committing any change; on violation the vector is
  /// left untouched and `PropertyError::SwitchRuleViolation` is returned.
  pub fn copy_values(&mut self, updates: &[(String, ItemValue)]) -> Result<(), PropertyError> {
    for (item_name, _) in updates {
      if self.item(item_name).is_none() {
        return Err(PropertyError::ItemNotFound(item_name.clone(), self.name.clone()));
      }
    }

    if let Some(rule) = self.rule {
      let mut projected = self.clone();
      for (item_name, value) in updates {
        if let Some(item) = projected.item_mut(item_name) {
          *item.value_mut() = value.clone();
        }
      }
      let true_count = projected.true_switch_count();
      let ok = match rule {
        SwitchRule::OneOfMany => true_count == 1 || projected.state == PropertyState::Alert,
        SwitchRule::AtMostOne => true_count <= 1,
        SwitchRule::AnyOfMany => true,
      };
      if !ok {
        return Err(PropertyError::SwitchRuleViolation(
          self.name.clone(),
          true_count,
          format!("{rule:?}"),
        ));
      }
    }

    for (item_name, value) in updates {
      if let Some(item) = self.item_mut(item_name) {
        *item.value_mut() = value.clone();
      }
    }
    Ok(())
  }
}
