//! LiquidPlanner API client.
//!
//! - [`LiquidPlannerClient`] executes requests: cache lookup, rate limiting,
//!   retries with backoff and status classification
//! - [`CustomFieldResolver`] discovers custom field definitions and validates
//!   values before writing them

mod api_types;
mod cache;
mod client;
mod custom_fields;
mod transport;
mod types;

pub use cache::{ResourceKey, CUSTOM_FIELDS_ENDPOINT};
pub use client::{ApiRequest, BackoffPolicy, ClientSettings, LiquidPlannerClient};
pub use custom_fields::{
  parse_item_type, BulkItemOutcome, BulkItemStatus, BulkUpdateReport, CustomFieldResolver,
  FieldSet, FieldUpdateRequest,
};
pub use transport::{
  Credentials, HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError,
};
pub use types::{CustomFieldDefinition, FieldType, FieldValue, ItemType};
