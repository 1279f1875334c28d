//! Cache invalidation keys for LiquidPlanner resources.

use super::types::ItemType;

/// Endpoint for custom field definitions.
pub const CUSTOM_FIELDS_ENDPOINT: &str = "/custom_fields";

/// Remote resources whose cached reads can be invalidated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKey {
  /// A single item, e.g. `/tasks/42`
  Item { item_type: ItemType, id: u64 },
  /// The collection endpoint, e.g. `/tasks`
  Collection { item_type: ItemType },
  /// Custom field definitions for one item type
  CustomFields { item_type: ItemType },
}

impl ResourceKey {
  /// Workspace-relative endpoint for this resource.
  pub fn endpoint(&self) -> String {
    match self {
      Self::Item { item_type, id } => format!("/{}/{}", item_type.collection(), id),
      Self::Collection { item_type } => format!("/{}", item_type.collection()),
      Self::CustomFields { .. } => CUSTOM_FIELDS_ENDPOINT.to_string(),
    }
  }

  /// Glob patterns matching every cached `GET` of this resource.
  ///
  /// Keys look like `<ns>:GET:<url>[:<params>]`, so the URL either ends the
  /// key or is followed by `:` (parameters) or `/` (sub-resources). Matching
  /// on those separators keeps `/tasks/4` from also hitting `/tasks/42`.
  pub fn invalidation_patterns(&self, namespace: &str) -> Vec<String> {
    match self {
      Self::Item { .. } | Self::Collection { .. } => {
        let endpoint = self.endpoint();
        vec![
          format!("{}:GET:*{}", namespace, endpoint),
          format!("{}:GET:*{}[:/]*", namespace, endpoint),
        ]
      }
      Self::CustomFields { item_type } => vec![format!(
        "{}:GET:*{}:*item_type={}*",
        namespace, CUSTOM_FIELDS_ENDPOINT, item_type
      )],
    }
  }

  /// Everything to invalidate after writing to an item: the item itself and
  /// its collection endpoint.
  pub fn write_invalidations(item_type: ItemType, id: u64) -> [ResourceKey; 2] {
    [
      Self::Item { item_type, id },
      Self::Collection { item_type },
    ]
  }
}
