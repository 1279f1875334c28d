use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Category of remote entity that owns a set of custom fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
  Task,
  Project,
  Folder,
  Package,
}

impl ItemType {
  pub const ALL: [ItemType; 4] = [Self::Task, Self::Project, Self::Folder, Self::Package];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Task => "task",
      Self::Project => "project",
      Self::Folder => "folder",
      Self::Package => "package",
    }
  }

  /// Collection path segment, e.g. `tasks`.
  pub fn collection(&self) -> &'static str {
    match self {
      Self::Task => "tasks",
      Self::Project => "projects",
      Self::Folder => "folders",
      Self::Package => "packages",
    }
  }
}

impl fmt::Display for ItemType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ItemType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "task" => Ok(Self::Task),
      "project" => Ok(Self::Project),
      "folder" => Ok(Self::Folder),
      "package" => Ok(Self::Package),
      other => Err(format!(
        "invalid item type '{}'; expected one of: task, project, folder, package",
        other
      )),
    }
  }
}

/// Structural type of a custom field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
  Text,
  Number,
  Date,
  Checkbox,
  Picklist,
  /// Anything else the API reports; values are passed through as text
  Other(String),
}

impl FieldType {
  pub fn from_api(raw: &str) -> Self {
    match raw.trim().to_lowercase().as_str() {
      "text" => Self::Text,
      "number" => Self::Number,
      "date" => Self::Date,
      "checkbox" => Self::Checkbox,
      "picklist" => Self::Picklist,
      _ => Self::Other(raw.to_string()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Text => "text",
      Self::Number => "number",
      Self::Date => "date",
      Self::Checkbox => "checkbox",
      Self::Picklist => "picklist",
      Self::Other(raw) => raw,
    }
  }
}

impl Serialize for FieldType {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

/// Custom field schema entry, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomFieldDefinition {
  pub id: u64,
  pub name: String,
  pub field_type: FieldType,
  pub is_required: bool,
  pub is_enabled: bool,
  pub default_value: Option<Value>,
  /// Allowed values, in API order (picklist fields only)
  pub picklist_values: Vec<String>,
  pub item_type: ItemType,
}

/// A custom field value after coercion, one variant per field type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  /// Clears the field
  Null,
  Text(String),
  Number(serde_json::Number),
  Date(NaiveDate),
  Checkbox(bool),
  Picklist(String),
  Other(String),
}

impl FieldValue {
  /// Wire representation submitted to the API.
  pub fn to_json(&self) -> Value {
    match self {
      Self::Null => Value::Null,
      Self::Text(s) | Self::Picklist(s) | Self::Other(s) => Value::String(s.clone()),
      Self::Number(n) => Value::Number(n.clone()),
      Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
      Self::Checkbox(b) => Value::Bool(*b),
    }
  }
}
