//! `forma`: command-line front end for the Forma entity engine.
//!
//! Reads `forma.toml` (or the path given with `--config`), layers `FORMA_*`
//! environment variables over it, opens the SQLite metadata store and runs
//! one engine operation. Results are printed as JSON.
//!
//! # Usage
//!
//! ```
//! forma definition save product.json --actor admin
//! forma publish new 6f1c…
//! forma record create Sales.Product '{"Code":"P1","Name":"Widget"}'
//! forma record query Product --filter '{"field":"Code","value":"P1"}'
//! ```
//!
//! Nested engine settings use a double underscore in the environment, e.g.
//! `FORMA_ENGINE__MAX_TAKE=500`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use forma_core::{
  cancel::{CancelSignal, cancellation},
  definition::EntityDefinition,
  query::{Filter, QueryOptions},
};
use forma_engine::{Engine, EngineConfig};
use forma_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "forma", author, version, about = "Forma dynamic entity engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "forma.toml")]
  config: PathBuf,

  /// Name recorded as the author of definition changes and row writes.
  #[arg(long, global = true, env = "FORMA_ACTOR")]
  actor: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Entity definitions.
  #[command(subcommand)]
  Definition(DefinitionCommand),
  /// Schema publishing and DDL history.
  #[command(subcommand)]
  Publish(PublishCommand),
  /// Rows of published types.
  #[command(subcommand)]
  Record(RecordCommand),
  /// Read-only access to any data table.
  Raw {
    table: String,
    #[command(flatten)]
    query: QueryArgs,
  },
}

#[derive(Subcommand)]
enum DefinitionCommand {
  /// Check a definition file without saving it.
  Validate { file: PathBuf },
  /// Create or update a definition from a JSON file.
  Save { file: PathBuf },
  /// List every stored definition.
  List,
  /// Print one definition.
  Show { id: Uuid },
  /// Print the field template of the compiled type.
  Compile { id: Uuid },
}

#[derive(Subcommand)]
enum PublishCommand {
  /// Create the tables of a draft definition.
  New { id: Uuid },
  /// Apply pending additive changes of a published definition.
  Changes { id: Uuid },
  /// Print the script the next publish would run.
  Preview { id: Uuid },
  /// Print the DDL history of a definition.
  History { id: Uuid },
}

#[derive(Subcommand)]
enum RecordCommand {
  Get {
    type_name: String,
    id:        i64,
  },
  Query {
    type_name: String,
    #[command(flatten)]
    query:     QueryArgs,
  },
  Count {
    type_name: String,
    /// Filter as JSON, e.g. `{"field":"Code","op":"eq","value":"P1"}`.
    #[arg(long = "filter", value_parser = parse_filter)]
    filters:   Vec<Filter>,
  },
  /// Insert a row. DATA is a JSON object or `@path` to a JSON file.
  Create { type_name: String, data: String },
  /// Change the supplied fields of a row.
  Update {
    type_name: String,
    id:        i64,
    data:      String,
  },
  Delete {
    type_name: String,
    id:        i64,
  },
}

#[derive(Args)]
struct QueryArgs {
  /// Filter as JSON, e.g. `{"field":"Code","op":"eq","value":"P1"}`.
  #[arg(long = "filter", value_parser = parse_filter)]
  filters:  Vec<Filter>,
  #[arg(long)]
  order_by: Option<String>,
  #[arg(long)]
  desc:     bool,
  #[arg(long)]
  skip:     Option<u64>,
  #[arg(long)]
  take:     Option<u64>,
}

impl From<QueryArgs> for QueryOptions {
  fn from(args: QueryArgs) -> Self {
    QueryOptions {
      filters:             args.filters,
      order_by:            args.order_by,
      order_by_descending: args.desc,
      skip:                args.skip,
      take:                args.take,
    }
  }
}

fn parse_filter(raw: &str) -> Result<Filter, String> {
  serde_json::from_str(raw).map_err(|e| format!("invalid filter: {e}"))
}

// ─── Config file ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct CliConfig {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  engine:     EngineConfig,
}

fn default_store_path() -> PathBuf { PathBuf::from("forma.db") }

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(
      config::Environment::with_prefix("FORMA")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;
  let cli_cfg: CliConfig = settings
    .try_deserialize()
    .context("failed to deserialise CliConfig")?;

  let store_path = expand_tilde(&cli_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let engine = Engine::new(store, cli_cfg.engine);

  // Ctrl-C rolls back an in-flight publish or write.
  let (handle, cancel) = cancellation();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt received, cancelling");
      handle.cancel();
    }
  });

  run(&engine, cli.command, cli.actor.as_deref(), cancel).await
}

async fn run(
  engine: &Engine<SqliteStore>,
  command: Command,
  actor: Option<&str>,
  cancel: CancelSignal,
) -> anyhow::Result<()> {
  match command {
    Command::Definition(cmd) => match cmd {
      DefinitionCommand::Validate { file } => {
        let result = engine.validate_definition(&read_definition(&file)?).await?;
        print_json(&result)?;
        if !result.is_valid() {
          anyhow::bail!("{} validation error(s)", result.errors.len());
        }
      }
      DefinitionCommand::Save { file } => {
        let saved = engine.save_definition(read_definition(&file)?, actor).await?;
        print_json(&saved)?;
      }
      DefinitionCommand::List => print_json(&engine.list_definitions().await?)?,
      DefinitionCommand::Show { id } => {
        let definition = engine
          .get_definition(id)
          .await?
          .with_context(|| format!("definition {id} not found"))?;
        print_json(&definition)?;
      }
      DefinitionCommand::Compile { id } => {
        let descriptor = engine.compile(id).await?;
        let locale = &engine.config().default_locale;
        print_json(&descriptor.template_fields(engine.localizer(), locale))?;
      }
    },

    Command::Publish(cmd) => match cmd {
      PublishCommand::New { id } => print_json(&engine.publish_new(id, actor, cancel).await?)?,
      PublishCommand::Changes { id } => {
        print_json(&engine.publish_changes(id, actor, cancel).await?)?
      }
      PublishCommand::Preview { id } => println!("{}", engine.preview_ddl(id).await?),
      PublishCommand::History { id } => print_json(&engine.ddl_history(id).await?)?,
    },

    Command::Record(cmd) => match cmd {
      RecordCommand::Get { type_name, id } => {
        let record = engine
          .get_by_id(&type_name, id)
          .await?
          .with_context(|| format!("{type_name} row {id} not found"))?;
        print_json(&record)?;
      }
      RecordCommand::Query { type_name, query } => {
        print_json(&engine.query(&type_name, query.into()).await?)?
      }
      RecordCommand::Count { type_name, filters } => {
        println!("{}", engine.count(&type_name, &filters).await?)
      }
      RecordCommand::Create { type_name, data } => {
        let data = read_json(&data)?;
        print_json(&engine.create(&type_name, &data, actor, cancel).await?)?;
      }
      RecordCommand::Update {
        type_name,
        id,
        data,
      } => {
        let data = read_json(&data)?;
        print_json(&engine.update(&type_name, id, &data, actor, cancel).await?)?;
      }
      RecordCommand::Delete { type_name, id } => {
        if !engine.delete(&type_name, id, actor, cancel).await? {
          anyhow::bail!("{type_name} row {id} not found");
        }
      }
    },

    Command::Raw { table, query } => print_json(&engine.query_raw(&table, query.into()).await?)?,
  }
  Ok(())
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn read_definition(path: &Path) -> anyhow::Result<EntityDefinition> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading definition file {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("parsing definition file {}", path.display()))
}

/// Inline JSON, or `@path` to read it from a file.
fn read_json(arg: &str) -> anyhow::Result<serde_json::Value> {
  let raw = match arg.strip_prefix('@') {
    Some(path) => {
      std::fs::read_to_string(path).with_context(|| format!("reading data file {path}"))?
    }
    None => arg.to_owned(),
  };
  serde_json::from_str(&raw).context("parsing record data")
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory;

  use super::*;

  #[test]
  fn cli_definition_is_consistent() { Cli::command().debug_assert(); }

  #[test]
  fn filters_parse_from_json() {
    let filter = parse_filter(r#"{"field":"Code","value":"P1"}"#).unwrap();
    assert_eq!(filter, Filter::eq("Code", "P1"));
    assert!(parse_filter("Code=P1").is_err());
  }

  #[test]
  fn record_data_reads_inline_json() {
    let data = read_json(r#"{"Code":"P1"}"#).unwrap();
    assert_eq!(data["Code"], "P1");
    assert!(read_json("@/nonexistent/forma.json").is_err());
  }

  #[test]
  fn tilde_expands_to_home() {
    let plain = Path::new("/var/lib/forma.db");
    assert_eq!(expand_tilde(plain), plain);
    if let Ok(home) = std::env::var("HOME") {
      assert_eq!(expand_tilde(Path::new("~/forma.db")), PathBuf::from(home).join("forma.db"));
    }
  }
}
