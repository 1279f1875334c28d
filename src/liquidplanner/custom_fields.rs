//! Custom field discovery, resolution and value coercion.
//!
//! Field definitions are loaded once per item type and kept in the resolver
//! until [`CustomFieldResolver::clear_cache`] drops them. Writes are gated on
//! local validation: every field of an update is checked before anything is
//! sent, and all failures are reported together.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ApiError;

use super::api_types::{custom_field_values, ApiCustomFieldList};
use super::cache::{ResourceKey, CUSTOM_FIELDS_ENDPOINT};
use super::client::{ApiRequest, LiquidPlannerClient};
use super::types::{CustomFieldDefinition, FieldType, FieldValue, ItemType};

const DEFAULT_DEFINITIONS_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_BATCH_SIZE: usize = 10;

/// Date formats tried after ISO date-times, in order.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Loaded definitions for one item type plus the identifier lookup table.
#[derive(Debug)]
pub struct FieldSet {
  definitions: Vec<CustomFieldDefinition>,
  /// identifier -> index into `definitions`
  lookup: HashMap<String, usize>,
}

impl FieldSet {
  pub fn new(definitions: Vec<CustomFieldDefinition>) -> Self {
    let mut lookup = HashMap::new();

    // Earlier passes win on collisions: numeric ids, then `cf_<id>`, then names.
    for (i, def) in definitions.iter().enumerate() {
      lookup.entry(def.id.to_string()).or_insert(i);
    }
    for (i, def) in definitions.iter().enumerate() {
      lookup.entry(format!("cf_{}", def.id)).or_insert(i);
    }
    for (i, def) in definitions.iter().enumerate() {
      lookup.entry(def.name.clone()).or_insert(i);
    }
    for (i, def) in definitions.iter().enumerate() {
      lookup.entry(def.name.to_lowercase()).or_insert(i);
    }

    Self {
      definitions,
      lookup,
    }
  }

  pub fn definitions(&self) -> &[CustomFieldDefinition] {
    &self.definitions
  }

  /// Exact identifier, then lowercase name, then numeric id.
  pub fn resolve(&self, identifier: &str) -> Option<&CustomFieldDefinition> {
    let identifier = identifier.trim();
    let index = self
      .lookup
      .get(identifier)
      .or_else(|| self.lookup.get(&identifier.to_lowercase()))
      .copied()
      .or_else(|| {
        let id: u64 = identifier.parse().ok()?;
        self.definitions.iter().position(|d| d.id == id)
      })?;
    self.definitions.get(index)
  }
}

/// One entry of a bulk update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdateRequest {
  pub item_id: u64,
  pub item_type: String,
  pub custom_fields: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BulkItemStatus {
  Succeeded { response: Value },
  Failed { error: Value },
}

#[derive(Debug, Serialize)]
pub struct BulkItemOutcome {
  /// Position in the submitted list
  pub index: usize,
  pub request: FieldUpdateRequest,
  #[serde(flatten)]
  pub status: BulkItemStatus,
}

impl BulkItemOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self.status, BulkItemStatus::Succeeded { .. })
  }
}

/// Aggregate result of [`CustomFieldResolver::bulk_update_fields`].
#[derive(Debug, Serialize)]
pub struct BulkUpdateReport {
  pub total: usize,
  pub succeeded: usize,
  pub failed: usize,
  pub batches: usize,
  pub items: Vec<BulkItemOutcome>,
}

impl BulkUpdateReport {
  /// The requests that failed, ready to be resubmitted.
  pub fn failed_requests(&self) -> Vec<FieldUpdateRequest> {
    self
      .items
      .iter()
      .filter(|item| !item.is_success())
      .map(|item| item.request.clone())
      .collect()
  }

  /// `Err(BulkOperation)` when any item failed.
  pub fn into_result(self) -> Result<Self, ApiError> {
    if self.failed == 0 {
      return Ok(self);
    }

    let (succeeded, failed): (Vec<_>, Vec<_>) =
      self.items.iter().partition(|item| item.is_success());
    let to_json = |items: Vec<&BulkItemOutcome>| -> Vec<Value> {
      items
        .into_iter()
        .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
        .collect()
    };

    Err(ApiError::BulkOperation {
      operation: "custom_field_update".to_string(),
      total: self.total,
      succeeded: to_json(succeeded),
      failed: to_json(failed),
    })
  }
}

/// Parse an item type coming from caller input.
pub fn parse_item_type(raw: &str) -> Result<ItemType, ApiError> {
  raw.parse::<ItemType>().map_err(ApiError::validation)
}

/// Per-workspace custom field engine.
pub struct CustomFieldResolver {
  client: LiquidPlannerClient,
  field_sets: RwLock<HashMap<ItemType, Arc<FieldSet>>>,
  definitions_ttl: Duration,
  batch_size: usize,
}

impl CustomFieldResolver {
  pub fn new(client: LiquidPlannerClient) -> Self {
    Self {
      client,
      field_sets: RwLock::new(HashMap::new()),
      definitions_ttl: DEFAULT_DEFINITIONS_TTL,
      batch_size: DEFAULT_BATCH_SIZE,
    }
  }

  /// How long the definitions response stays in the response cache.
  pub fn with_definitions_ttl(mut self, ttl: Duration) -> Self {
    self.definitions_ttl = ttl;
    self
  }

  /// Number of updates run concurrently by bulk operations (at least 1).
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.max(1);
    self
  }

  pub fn batch_size(&self) -> usize {
    self.batch_size
  }

  pub fn client(&self) -> &LiquidPlannerClient {
    &self.client
  }

  /// Loaded definitions for an item type, fetching them on first use.
  async fn field_set(&self, item_type: ItemType) -> Result<Arc<FieldSet>, ApiError> {
    if let Some(set) = self.field_sets.read().await.get(&item_type) {
      return Ok(Arc::clone(set));
    }

    debug!(item_type = %item_type, "Loading custom field definitions");
    let response = self
      .client
      .execute(
        ApiRequest::get(CUSTOM_FIELDS_ENDPOINT)
          .with_param("item_type", item_type.as_str())
          .with_cache_ttl(self.definitions_ttl),
      )
      .await?;

    let listing: ApiCustomFieldList =
      serde_json::from_value(response).map_err(|e| ApiError::MalformedResponse {
        message: format!("unexpected custom field listing for {}: {}", item_type, e),
        body: None,
      })?;

    let definitions: Vec<CustomFieldDefinition> = listing
      .into_fields()
      .into_iter()
      .filter_map(|field| field.into_definition(item_type))
      .collect();
    info!(
      item_type = %item_type,
      count = definitions.len(),
      "Loaded custom field definitions"
    );

    let set = Arc::new(FieldSet::new(definitions));
    self
      .field_sets
      .write()
      .await
      .insert(item_type, Arc::clone(&set));
    Ok(set)
  }

  pub async fn list_fields(
    &self,
    item_type: ItemType,
  ) -> Result<Vec<CustomFieldDefinition>, ApiError> {
    Ok(self.field_set(item_type).await?.definitions().to_vec())
  }

  /// Find a definition by id, `cf_<id>` or (case-insensitive) name.
  pub async fn resolve(
    &self,
    identifier: &str,
    item_type: ItemType,
  ) -> Result<Option<CustomFieldDefinition>, ApiError> {
    Ok(self.field_set(item_type).await?.resolve(identifier).cloned())
  }

  /// Validate and convert one value against a definition.
  ///
  /// Number fields reject `NaN` and infinities: JSON has no representation
  /// for them, so they could never be submitted.
  pub fn coerce(
    value: Option<&Value>,
    definition: &CustomFieldDefinition,
  ) -> Result<FieldValue, ApiError> {
    coerce_value(value, definition).map_err(|reason| {
      let mut field_errors = BTreeMap::new();
      field_errors.insert(definition.name.clone(), vec![reason.clone()]);
      ApiError::field_validation(format!("{}: {}", definition.name, reason), field_errors)
    })
  }

  /// Validate and write custom field values on one item.
  ///
  /// Nothing is sent unless every field resolves and coerces.
  pub async fn update_fields(
    &self,
    item_id: u64,
    item_type: ItemType,
    fields: &Map<String, Value>,
  ) -> Result<Value, ApiError> {
    if fields.is_empty() {
      return Err(ApiError::validation("no custom fields given to update"));
    }

    let set = self.field_set(item_type).await?;
    let mut values = Map::new();
    let mut field_errors: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (identifier, value) in fields {
      let Some(definition) = set.resolve(identifier) else {
        field_errors
          .entry(identifier.clone())
          .or_default()
          .push(format!("unknown custom field for {}", item_type));
        continue;
      };

      match coerce_value(Some(value), definition) {
        Ok(coerced) => {
          values.insert(definition.id.to_string(), coerced.to_json());
        }
        Err(reason) => field_errors.entry(identifier.clone()).or_default().push(reason),
      }
    }

    if !field_errors.is_empty() {
      let summary = field_errors
        .iter()
        .map(|(field, reasons)| format!("{}: {}", field, reasons.join(", ")))
        .collect::<Vec<_>>()
        .join("; ");
      return Err(ApiError::field_validation(
        format!("invalid custom fields for {} {}: {}", item_type, item_id, summary),
        field_errors,
      ));
    }

    let mut item = Map::new();
    item.insert("custom_field_values".to_string(), Value::Object(values));
    let mut body = Map::new();
    body.insert(item_type.as_str().to_string(), Value::Object(item));

    let endpoint = ResourceKey::Item { item_type, id: item_id }.endpoint();
    let response = self
      .client
      .execute(ApiRequest::put(endpoint, Value::Object(body)))
      .await?;

    self
      .client
      .invalidate(&ResourceKey::write_invalidations(item_type, item_id))
      .await;
    info!(item_type = %item_type, item_id, fields = fields.len(), "Updated custom fields");

    Ok(response)
  }

  /// Current custom field values of an item, keyed by field name.
  pub async fn get_field_values(
    &self,
    item_id: u64,
    item_type: ItemType,
  ) -> Result<Value, ApiError> {
    let set = self.field_set(item_type).await?;
    let endpoint = ResourceKey::Item { item_type, id: item_id }.endpoint();
    let item = self.client.execute(ApiRequest::get(endpoint)).await?;

    let mut result = Map::new();
    if let Some(values) = custom_field_values(&item, item_type) {
      for (key, value) in values {
        let entry = match set.resolve(key) {
          Some(def) => (
            def.name.clone(),
            json!({ "id": def.id, "type": def.field_type, "value": value }),
          ),
          None => (key.clone(), json!({ "id": key, "type": null, "value": value })),
        };
        result.insert(entry.0, entry.1);
      }
    }

    Ok(json!({
      "item_id": item_id,
      "item_type": item_type,
      "custom_fields": result,
    }))
  }

  async fn run_request(&self, request: &FieldUpdateRequest) -> Result<Value, ApiError> {
    let item_type = parse_item_type(&request.item_type)?;
    self
      .update_fields(request.item_id, item_type, &request.custom_fields)
      .await
  }

  /// Apply many updates, `batch_size` at a time.
  ///
  /// A failing item never stops the rest of its batch or later batches.
  pub async fn bulk_update_fields(&self, requests: Vec<FieldUpdateRequest>) -> BulkUpdateReport {
    let total = requests.len();
    let mut items = Vec::with_capacity(total);
    let mut batches = 0;

    let indexed: Vec<(usize, FieldUpdateRequest)> = requests.into_iter().enumerate().collect();
    for chunk in indexed.chunks(self.batch_size) {
      batches += 1;
      debug!(batch = batches, size = chunk.len(), "Running bulk update batch");

      let results = join_all(chunk.iter().map(|(index, request)| async move {
        (*index, request.clone(), self.run_request(request).await)
      }))
      .await;

      for (index, request, result) in results {
        let status = match result {
          Ok(response) => BulkItemStatus::Succeeded { response },
          Err(e) => {
            warn!(index, item_id = request.item_id, error = %e, "Bulk update item failed");
            BulkItemStatus::Failed {
              error: e.to_payload(),
            }
          }
        };
        items.push(BulkItemOutcome {
          index,
          request,
          status,
        });
      }
    }

    let succeeded = items.iter().filter(|item| item.is_success()).count();
    info!(total, succeeded, failed = total - succeeded, batches, "Bulk update finished");

    BulkUpdateReport {
      total,
      succeeded,
      failed: total - succeeded,
      batches,
      items,
    }
  }

  /// Forget loaded definitions (all item types when `None`) and drop their
  /// cached listings so the next access reloads them.
  pub async fn clear_cache(&self, item_type: Option<ItemType>) {
    let types: Vec<ItemType> = match item_type {
      Some(t) => vec![t],
      None => ItemType::ALL.to_vec(),
    };

    let mut sets = self.field_sets.write().await;
    for t in &types {
      sets.remove(t);
    }
    drop(sets);

    let keys: Vec<ResourceKey> = types
      .into_iter()
      .map(|item_type| ResourceKey::CustomFields { item_type })
      .collect();
    self.client.invalidate(&keys).await;
  }
}

fn stringify(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
  let raw = raw.trim();

  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.date_naive());
  }
  for format in ["%Y-%m-%dT%H:%M%#z", "%Y-%m-%d %H:%M%#z"] {
    if let Ok(dt) = DateTime::parse_from_str(raw, format) {
      return Some(dt.date_naive());
    }
  }
  for format in [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
  ] {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
      return Some(dt.date());
    }
  }

  DATE_FORMATS
    .iter()
    .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

/// Coerce a value, returning the reason on failure.
fn coerce_value(
  value: Option<&Value>,
  definition: &CustomFieldDefinition,
) -> Result<FieldValue, String> {
  if !definition.is_enabled {
    return Err("field is disabled".to_string());
  }

  let value = match value {
    None | Some(Value::Null) if definition.is_required => {
      return Err("value is required".to_string());
    }
    None | Some(Value::Null) => return Ok(FieldValue::Null),
    Some(v) => v,
  };

  match &definition.field_type {
    FieldType::Text => Ok(FieldValue::Text(stringify(value))),
    FieldType::Number => match value {
      Value::Number(n) => Ok(FieldValue::Number(n.clone())),
      other => {
        let text = stringify(other);
        text
          .trim()
          .parse::<f64>()
          .ok()
          .and_then(serde_json::Number::from_f64)
          .map(FieldValue::Number)
          .ok_or_else(|| format!("'{}' is not a number", text))
      }
    },
    FieldType::Date => {
      let text = stringify(value);
      parse_date(&text)
        .map(FieldValue::Date)
        .ok_or_else(|| format!("'{}' is not a recognized date", text))
    }
    FieldType::Checkbox => match value {
      Value::Bool(b) => Ok(FieldValue::Checkbox(*b)),
      other => {
        let text = stringify(other).trim().to_lowercase();
        Ok(FieldValue::Checkbox(matches!(
          text.as_str(),
          "true" | "yes" | "1" | "on"
        )))
      }
    },
    FieldType::Picklist => {
      let text = stringify(value);
      // No declared options means any value is allowed
      if definition.picklist_values.is_empty() || definition.picklist_values.contains(&text) {
        Ok(FieldValue::Picklist(text))
      } else {
        Err(format!(
          "'{}' is not a valid option; valid values: {}",
          text,
          definition.picklist_values.join(", ")
        ))
      }
    }
    FieldType::Other(raw) => {
      warn!(
        field = %definition.name,
        field_type = %raw,
        "Unknown custom field type, passing value through as text"
      );
      Ok(FieldValue::Other(stringify(value)))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheLayer;
  use crate::error::ErrorKind;
  use crate::liquidplanner::client::tests::client_with;
  use crate::liquidplanner::transport::mock::{respond, MockTransport};
  use crate::liquidplanner::transport::{HttpRequest, HttpResponse, Method, TransportError};

  const DEFINITIONS: &str = r#"{"custom_fields": [
    {"id": 10, "name": "Priority", "field_type": "picklist", "picklist_values": ["Low", "Medium", "High"]},
    {"id": 11, "name": "Budget", "field_type": "number"},
    {"id": 12, "name": "Due", "field_type": "date", "is_required": true},
    {"id": 13, "name": "Billable", "field_type": "checkbox"},
    {"id": 14, "name": "Legacy", "field_type": "text", "is_enabled": false},
    {"id": 15, "name": "Client", "field_type": "text", "item_type": "project"}
  ]}"#;

  fn api(request: &HttpRequest, _call: usize) -> Result<HttpResponse, TransportError> {
    if request.url.ends_with("/custom_fields") {
      return respond(200, DEFINITIONS);
    }
    match request.method {
      Method::Put if request.url.ends_with("/tasks/3") => {
        respond(422, r#"{"errors": ["item is locked"]}"#)
      }
      Method::Put => respond(200, r#"{"ok": true}"#),
      _ => respond(
        200,
        r#"{"task": {"id": 7, "custom_field_values": {"10": "High", "99": "x"}}}"#,
      ),
    }
  }

  fn resolver() -> (CustomFieldResolver, Arc<MockTransport>) {
    let transport = MockTransport::new(api);
    let client = client_with(transport.clone(), CacheLayer::disabled(), 0);
    (CustomFieldResolver::new(client), transport)
  }

  fn fields(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => panic!("expected an object"),
    }
  }

  fn definition(field_type: FieldType) -> CustomFieldDefinition {
    CustomFieldDefinition {
      id: 1,
      name: "Field".to_string(),
      field_type,
      is_required: false,
      is_enabled: true,
      default_value: None,
      picklist_values: Vec::new(),
      item_type: ItemType::Task,
    }
  }

  #[tokio::test]
  async fn test_list_fields_loads_once() {
    let (resolver, transport) = resolver();

    let first = resolver.list_fields(ItemType::Task).await.unwrap();
    let second = resolver.list_fields(ItemType::Task).await.unwrap();

    // The project-only definition is dropped
    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
    assert_eq!(transport.calls(), 1);
    assert_eq!(
      transport.requests()[0].query,
      vec![("item_type".to_string(), "task".to_string())]
    );
  }

  #[tokio::test]
  async fn test_clear_cache_reloads() {
    let (resolver, transport) = resolver();

    resolver.list_fields(ItemType::Task).await.unwrap();
    resolver.clear_cache(Some(ItemType::Task)).await;
    resolver.list_fields(ItemType::Task).await.unwrap();

    assert_eq!(transport.calls(), 2);
  }

  #[tokio::test]
  async fn test_resolve_by_name_id_and_prefix() {
    let (resolver, _) = resolver();

    let by_name = resolver.resolve("Priority", ItemType::Task).await.unwrap();
    let by_lower = resolver.resolve("priority", ItemType::Task).await.unwrap();
    let by_upper = resolver.resolve("PRIORITY", ItemType::Task).await.unwrap();
    let by_id = resolver.resolve("10", ItemType::Task).await.unwrap();
    let by_prefix = resolver.resolve("cf_10", ItemType::Task).await.unwrap();

    assert_eq!(by_name.as_ref().map(|d| d.id), Some(10));
    assert_eq!(by_name, by_lower);
    assert_eq!(by_name, by_upper);
    assert_eq!(by_name, by_id);
    assert_eq!(by_name, by_prefix);
    assert!(resolver.resolve("Nope", ItemType::Task).await.unwrap().is_none());
  }

  #[test]
  fn test_ids_win_over_names() {
    let mut numeric_name = definition(FieldType::Text);
    numeric_name.id = 1;
    numeric_name.name = "2".to_string();
    let mut second = definition(FieldType::Text);
    second.id = 2;
    second.name = "Second".to_string();

    let set = FieldSet::new(vec![numeric_name, second]);
    assert_eq!(set.resolve("2").map(|d| d.id), Some(2));
  }

  #[test]
  fn test_picklist_rejection_lists_valid_values() {
    let mut def = definition(FieldType::Picklist);
    def.picklist_values = vec!["Low".into(), "Medium".into(), "High".into()];

    let err = CustomFieldResolver::coerce(Some(&json!("Urgent")), &def).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientValidation);
    assert!(err.to_string().contains("Low, Medium, High"));

    assert_eq!(
      CustomFieldResolver::coerce(Some(&json!("High")), &def).unwrap(),
      FieldValue::Picklist("High".to_string())
    );
  }

  #[test]
  fn test_picklist_without_options_accepts_any_value() {
    let def = definition(FieldType::Picklist);

    assert_eq!(
      CustomFieldResolver::coerce(Some(&json!("Anything")), &def).unwrap(),
      FieldValue::Picklist("Anything".to_string())
    );
    assert_eq!(
      CustomFieldResolver::coerce(Some(&json!(7)), &def).unwrap(),
      FieldValue::Picklist("7".to_string())
    );
  }

  #[test]
  fn test_date_formats_in_order() {
    let def = definition(FieldType::Date);
    let date = |raw: &str| match CustomFieldResolver::coerce(Some(&json!(raw)), &def) {
      Ok(FieldValue::Date(d)) => d.format("%Y-%m-%d").to_string(),
      other => panic!("unexpected {:?}", other),
    };

    assert_eq!(date("2024-03-04T10:30:00Z"), "2024-03-04");
    assert_eq!(date("2024-03-04T10:30:00"), "2024-03-04");
    assert_eq!(date("2024-03-04T10:30"), "2024-03-04");
    assert_eq!(date("2024-03-04T10:30Z"), "2024-03-04");
    assert_eq!(date("2024-03-04T10:30+02:00"), "2024-03-04");
    assert_eq!(date("2024-03-04 10:30"), "2024-03-04");
    assert_eq!(date("2024-03-04"), "2024-03-04");
    // Month first wins when both readings are valid
    assert_eq!(date("03/04/2024"), "2024-03-04");
    assert_eq!(date("25/12/2024"), "2024-12-25");
    assert!(CustomFieldResolver::coerce(Some(&json!("next tuesday")), &def).is_err());
  }

  #[test]
  fn test_number_and_checkbox_coercion() {
    let number = definition(FieldType::Number);
    assert_eq!(
      CustomFieldResolver::coerce(Some(&json!(3)), &number).unwrap(),
      FieldValue::Number(3.into())
    );
    assert_eq!(
      CustomFieldResolver::coerce(Some(&json!(" 2.5 ")), &number)
        .unwrap()
        .to_json(),
      json!(2.5)
    );
    assert!(CustomFieldResolver::coerce(Some(&json!("lots")), &number).is_err());
    assert!(CustomFieldResolver::coerce(Some(&json!("NaN")), &number).is_err());
    assert!(CustomFieldResolver::coerce(Some(&json!("inf")), &number).is_err());

    let checkbox = definition(FieldType::Checkbox);
    for (raw, expected) in [
      (json!("YES"), true),
      (json!("on"), true),
      (json!(1), true),
      (json!(false), false),
      (json!("nope"), false),
    ] {
      assert_eq!(
        CustomFieldResolver::coerce(Some(&raw), &checkbox).unwrap(),
        FieldValue::Checkbox(expected),
        "{}",
        raw
      );
    }
  }

  #[test]
  fn test_null_handling() {
    let mut def = definition(FieldType::Text);
    assert_eq!(
      CustomFieldResolver::coerce(None, &def).unwrap(),
      FieldValue::Null
    );

    def.is_required = true;
    assert!(CustomFieldResolver::coerce(Some(&Value::Null), &def).is_err());

    def.is_required = false;
    def.is_enabled = false;
    assert!(CustomFieldResolver::coerce(Some(&json!("x")), &def).is_err());
  }

  #[tokio::test]
  async fn test_invalid_fields_are_aggregated_without_writing() {
    let (resolver, transport) = resolver();

    let err = resolver
      .update_fields(
        7,
        ItemType::Task,
        &fields(json!({"Priority": 99, "Budget": "a lot", "Ghost": 1})),
      )
      .await
      .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClientValidation);
    let message = err.to_string();
    assert!(message.contains("Priority"));
    assert!(message.contains("Low, Medium, High"));
    let ApiError::Validation { field_errors, .. } = &err else {
      panic!("unexpected error: {:?}", err);
    };
    assert_eq!(
      field_errors.keys().collect::<Vec<_>>(),
      vec!["Budget", "Ghost", "Priority"]
    );
    assert_eq!(transport.calls_with(Method::Put), 0);
  }

  #[tokio::test]
  async fn test_single_invalid_picklist_value() {
    let (resolver, transport) = resolver();

    let err = resolver
      .update_fields(7, ItemType::Task, &fields(json!({"Priority": 99})))
      .await
      .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClientValidation);
    assert!(err.to_string().contains("Priority"));
    assert!(err.to_string().contains("Low, Medium, High"));
    assert_eq!(transport.calls_with(Method::Put), 0);
  }

  #[tokio::test]
  async fn test_update_sends_values_keyed_by_id() {
    let (resolver, transport) = resolver();

    resolver
      .update_fields(
        7,
        ItemType::Task,
        &fields(json!({"priority": "High", "cf_11": "12.5", "Due": "12/31/2024"})),
      )
      .await
      .unwrap();

    let put = transport
      .requests()
      .into_iter()
      .find(|r| r.method == Method::Put)
      .unwrap();
    assert!(put.url.ends_with("/workspaces/1234/tasks/7"));
    assert_eq!(
      put.body,
      Some(json!({"task": {"custom_field_values": {
        "10": "High",
        "11": 12.5,
        "12": "2024-12-31"
      }}}))
    );
  }

  #[tokio::test]
  async fn test_empty_update_is_rejected() {
    let (resolver, transport) = resolver();

    let err = resolver
      .update_fields(7, ItemType::Task, &Map::new())
      .await
      .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClientValidation);
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_get_field_values_by_name() {
    let (resolver, _) = resolver();

    let values = resolver.get_field_values(7, ItemType::Task).await.unwrap();

    assert_eq!(values["custom_fields"]["Priority"]["value"], "High");
    assert_eq!(values["custom_fields"]["Priority"]["type"], "picklist");
    assert_eq!(values["custom_fields"]["99"]["value"], "x");
  }

  #[tokio::test]
  async fn test_bulk_update_isolates_failures() {
    let (resolver, transport) = resolver();
    let requests: Vec<FieldUpdateRequest> = (1..=15)
      .map(|id| FieldUpdateRequest {
        item_id: id,
        item_type: "task".to_string(),
        custom_fields: fields(json!({"Priority": "Low"})),
      })
      .collect();

    let report = resolver.bulk_update_fields(requests).await;

    assert_eq!(report.total, 15);
    assert_eq!(report.batches, 2);
    assert_eq!(report.succeeded, 14);
    assert_eq!(report.failed, 1);
    assert_eq!(transport.calls_with(Method::Put), 15);

    let failed = report.failed_requests();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].item_id, 3);
    assert_eq!(report.items[2].index, 2);
    assert!(!report.items[2].is_success());

    let err = report.into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BulkOperation);
    assert_eq!(err.details()["failed_count"], 1);
    assert_eq!(err.details()["successful_count"], 14);
  }

  #[tokio::test]
  async fn test_bulk_rejects_unknown_item_type_per_item() {
    let resolver = resolver().0.with_batch_size(4);
    let requests = vec![
      FieldUpdateRequest {
        item_id: 1,
        item_type: "milestone".to_string(),
        custom_fields: fields(json!({"Priority": "Low"})),
      },
      FieldUpdateRequest {
        item_id: 2,
        item_type: "task".to_string(),
        custom_fields: fields(json!({"Priority": "Low"})),
      },
    ];

    let report = resolver.bulk_update_fields(requests).await;

    assert_eq!(report.batches, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed_requests()[0].item_type, "milestone");
  }
}
