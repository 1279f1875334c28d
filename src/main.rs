use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use lpx::config::{Config, LogFormat, LoggingConfig};
use lpx::error::ApiError;
use lpx::liquidplanner::{
  ApiRequest, CustomFieldResolver, FieldUpdateRequest, ItemType, LiquidPlannerClient, Method,
};

#[derive(Parser, Debug)]
#[command(name = "lpx")]
#[command(about = "A rate-limited, caching client for the LiquidPlanner API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lpx/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Workspace id to use instead of the configured one
  #[arg(short, long)]
  workspace: Option<u64>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the authenticated account
  Account,

  /// Check connectivity and credentials
  Health,

  /// Send a raw API request
  Request {
    method: Method,

    /// Endpoint relative to the workspace, e.g. /tasks/42
    endpoint: String,

    /// Query parameter as key=value (repeatable)
    #[arg(short, long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// JSON request body
    #[arg(short, long)]
    body: Option<String>,

    /// Endpoint is not workspace-scoped
    #[arg(long)]
    global: bool,

    /// Skip the response cache
    #[arg(long)]
    no_cache: bool,

    /// Cache TTL in seconds for this response
    #[arg(long)]
    ttl: Option<u64>,
  },

  /// Custom field operations
  Fields {
    #[command(subcommand)]
    command: FieldsCommand,
  },
}

#[derive(Subcommand, Debug)]
enum FieldsCommand {
  /// List custom field definitions for an item type
  List { item_type: ItemType },

  /// Show custom field values of an item
  Get { item_type: ItemType, id: u64 },

  /// Set custom field values on an item
  Update {
    item_type: ItemType,
    id: u64,

    /// field=value pairs; values are parsed as JSON when possible
    #[arg(required = true, value_parser = parse_key_value)]
    fields: Vec<(String, String)>,
  },

  /// Apply updates from a JSON file: [{"item_id", "item_type", "custom_fields"}]
  Bulk { file: PathBuf },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
  raw
    .split_once('=')
    .map(|(k, v)| (k.trim().to_string(), v.to_string()))
    .filter(|(k, _)| !k.is_empty())
    .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// CLI values are JSON when they parse as JSON, plain strings otherwise.
fn cli_value(raw: &str) -> Value {
  serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
  let filter = match EnvFilter::try_from_default_env() {
    Ok(filter) => filter,
    Err(_) => EnvFilter::try_new(&config.level)
      .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e))?,
  };

  let (writer, guard) = match &config.file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      tracing_appender::non_blocking(file)
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(writer);

  match config.format {
    LogFormat::Json => builder.json().try_init(),
    LogFormat::Text => builder.with_ansi(config.file.is_none()).try_init(),
  }
  .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn load_bulk_file(path: &Path) -> Result<Vec<FieldUpdateRequest>> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  serde_json::from_str(&contents)
    .map_err(|e| eyre!("Invalid bulk file {}: {}", path.display(), e))
}

async fn run_fields(
  resolver: &CustomFieldResolver,
  command: FieldsCommand,
) -> Result<std::result::Result<Value, ApiError>> {
  let outcome = match command {
    FieldsCommand::List { item_type } => resolver
      .list_fields(item_type)
      .await
      .map(|fields| serde_json::to_value(fields).unwrap_or(Value::Null)),
    FieldsCommand::Get { item_type, id } => resolver.get_field_values(id, item_type).await,
    FieldsCommand::Update {
      item_type,
      id,
      fields,
    } => {
      let fields: Map<String, Value> = fields
        .iter()
        .map(|(k, v)| (k.clone(), cli_value(v)))
        .collect();
      resolver.update_fields(id, item_type, &fields).await
    }
    FieldsCommand::Bulk { file } => {
      let requests = load_bulk_file(&file)?;
      let report = resolver.bulk_update_fields(requests).await;
      let value = serde_json::to_value(&report)?;
      report.into_result().map(|_| value)
    }
  };
  Ok(outcome)
}

async fn run(client: LiquidPlannerClient, config: &Config, command: Command) -> Result<bool> {
  let outcome = match command {
    Command::Account => client.account().await,
    Command::Health => {
      let report = client.health_check().await;
      let healthy = report["status"] == "healthy";
      println!("{}", serde_json::to_string_pretty(&report)?);
      return Ok(healthy);
    }
    Command::Request {
      method,
      endpoint,
      params,
      body,
      global,
      no_cache,
      ttl,
    } => {
      let mut request = ApiRequest::new(method, endpoint);
      for (key, value) in params {
        request = request.with_param(key, value);
      }
      if let Some(body) = body {
        let body: Value =
          serde_json::from_str(&body).map_err(|e| eyre!("Invalid --body JSON: {}", e))?;
        request = request.with_body(body);
      }
      if global {
        request = request.global();
      }
      if no_cache {
        request = request.without_cache();
      }
      if let Some(ttl) = ttl {
        request = request.with_cache_ttl(Duration::from_secs(ttl));
      }
      client.execute(request).await
    }
    Command::Fields { command } => {
      let resolver = CustomFieldResolver::new(client)
        .with_definitions_ttl(Duration::from_secs(config.cache.custom_fields_ttl_seconds))
        .with_batch_size(config.bulk.batch_size);
      run_fields(&resolver, command).await?
    }
  };

  match outcome {
    Ok(value) => {
      println!("{}", serde_json::to_string_pretty(&value)?);
      Ok(true)
    }
    Err(e) => {
      println!("{}", serde_json::to_string_pretty(&e.to_payload())?);
      Ok(false)
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let config = match args.workspace {
    Some(workspace_id) => config.with_workspace(workspace_id),
    None => config,
  };

  let guard = init_logging(&config.logging)?;

  let client = LiquidPlannerClient::from_config(&config).await?;
  let succeeded = run(client, &config, args.command).await?;

  if !succeeded {
    // Flush buffered log lines; exit() skips destructors
    drop(guard);
    std::process::exit(1);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_key_value() {
    assert_eq!(
      parse_key_value("Priority=High"),
      Ok(("Priority".to_string(), "High".to_string()))
    );
    assert_eq!(
      parse_key_value("filter=name=x"),
      Ok(("filter".to_string(), "name=x".to_string()))
    );
    assert!(parse_key_value("novalue").is_err());
    assert!(parse_key_value("=x").is_err());
  }

  #[test]
  fn test_cli_values() {
    assert_eq!(cli_value("12.5"), serde_json::json!(12.5));
    assert_eq!(cli_value("true"), Value::Bool(true));
    assert_eq!(cli_value("High"), Value::String("High".to_string()));
  }

  #[test]
  fn test_cli_parses_field_update() {
    let args = Args::parse_from(["lpx", "fields", "update", "task", "42", "Priority=High"]);
    match args.command {
      Command::Fields {
        command:
          FieldsCommand::Update {
            item_type,
            id,
            fields,
          },
      } => {
        assert_eq!(item_type, ItemType::Task);
        assert_eq!(id, 42);
        assert_eq!(fields.len(), 1);
      }
      other => panic!("unexpected command: {:?}", other),
    }
  }
}
