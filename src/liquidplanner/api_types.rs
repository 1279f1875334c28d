//! Serde-deserializable types matching LiquidPlanner API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;
use serde_json::Value;

use super::types::{CustomFieldDefinition, FieldType, ItemType};

// ============================================================================
// Custom field definitions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCustomField {
  pub id: u64,
  pub name: String,
  #[serde(alias = "type", default)]
  pub field_type: String,
  #[serde(default)]
  pub is_required: bool,
  #[serde(default = "default_true")]
  pub is_enabled: bool,
  #[serde(default)]
  pub default_value: Option<Value>,
  #[serde(default)]
  pub picklist_values: Option<Vec<String>>,
  #[serde(default)]
  pub item_type: Option<String>,
}

fn default_true() -> bool {
  true
}

impl ApiCustomField {
  /// Convert to a domain definition owned by `requested`.
  ///
  /// Returns `None` when the API tagged the field with a different item type,
  /// so one item type's mapping never picks up another type's fields.
  pub fn into_definition(self, requested: ItemType) -> Option<CustomFieldDefinition> {
    let item_type = match self.item_type.as_deref() {
      Some(raw) => raw.parse::<ItemType>().ok()?,
      None => requested,
    };
    if item_type != requested {
      return None;
    }

    let field_type = FieldType::from_api(&self.field_type);
    let picklist_values = match field_type {
      FieldType::Picklist => self.picklist_values.unwrap_or_default(),
      _ => Vec::new(),
    };

    Some(CustomFieldDefinition {
      id: self.id,
      name: self.name,
      field_type,
      is_required: self.is_required,
      is_enabled: self.is_enabled,
      default_value: self.default_value,
      picklist_values,
      item_type,
    })
  }
}

/// The custom field listing comes back either bare or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiCustomFieldList {
  Bare(Vec<ApiCustomField>),
  Wrapped { custom_fields: Vec<ApiCustomField> },
  Data { data: Vec<ApiCustomField> },
}

impl ApiCustomFieldList {
  pub fn into_fields(self) -> Vec<ApiCustomField> {
    match self {
      Self::Bare(fields) | Self::Wrapped { custom_fields: fields } | Self::Data { data: fields } => {
        fields
      }
    }
  }
}

// ============================================================================
// Items
// ============================================================================

/// Pull the `custom_field_values` object out of an item response.
///
/// Accepts the values at the top level or nested under the item's singular
/// name (`{"task": {...}}`).
pub fn custom_field_values(
  item: &Value,
  item_type: ItemType,
) -> Option<&serde_json::Map<String, Value>> {
  item
    .get("custom_field_values")
    .or_else(|| {
      item
        .get(item_type.as_str())
        .and_then(|inner| inner.get("custom_field_values"))
    })
    .and_then(Value::as_object)
}
