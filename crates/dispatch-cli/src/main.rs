//! dispatch-cli - Manager をコマンドラインから動かすデモ用トランスポート
//!
//! - `run <name> [payload]`: 1 件実行して結果の JSON を出力
//! - `send <envelope>`: `{"type": ..., "reqData": ...}` 形式で 1 件実行
//! - `batch <file>`: 全件を Future で同時に開始し、入力順に結果を出力
//! - `routes`: 登録済みコマンドの一覧

mod commands;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dispatch_core::futures;
use dispatch_core::{CatalogConfig, CommandError, Context, DuplicatePolicy, ErrorKind, Manager};

#[derive(Parser, Debug)]
#[command(name = "dispatch-cli", about = "Dispatch sample commands through the manager")]
struct Cli {
    /// JSON file with the catalog configuration.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Fail on duplicate registration instead of overwriting.
    #[arg(long)]
    reject_duplicates: bool,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Runs one command and prints its JSON result.
    Run {
        name: String,
        /// JSON payload (empty means the request's defaults).
        payload: Option<String>,
    },
    /// Runs one request envelope (`{"type": ..., "reqData": ...}`).
    Send { envelope: String },
    /// Runs every entry of a JSON file concurrently.
    Batch { file: PathBuf },
    /// Lists registered commands.
    Routes,
}

/// batch ファイルの 1 エントリ
#[derive(Debug, Deserialize)]
struct BatchEntry {
    name: String,
    #[serde(default)]
    payload: Value,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.reject_duplicates)?;
    let manager = Manager::with_config(&config);
    commands::register(&manager)?;
    info!(
        commands = manager.mappings().len(),
        duplicates = ?config.duplicates,
        "commands registered"
    );

    match cli.command {
        CliCommand::Run { name, payload } => {
            let payload = payload.unwrap_or_default();
            let res = manager
                .handle_raw(&Context::background(), &name, payload.as_bytes())
                .await?;
            println!("{}", serde_json::to_string(&res.to_json()?)?);
        }
        CliCommand::Send { envelope } => {
            let res = manager
                .handle_envelope(&Context::background(), envelope.as_bytes())
                .await?;
            println!("{}", serde_json::to_string(&res.to_json()?)?);
        }
        CliCommand::Batch { file } => run_batch(&manager, &file).await?,
        CliCommand::Routes => {
            let routes: Vec<Value> = manager
                .routes()?
                .into_iter()
                .map(|route| {
                    json!({
                        "name": route.name,
                        "request": route.req_type.name(),
                        "result": route.res_type.name(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&routes)?);
        }
    }
    Ok(())
}

/// 設定ファイルを読み、`--reject-duplicates` があればそちらを優先
fn load_config(path: Option<&Path>, reject_duplicates: bool) -> anyhow::Result<CatalogConfig> {
    let config = match path {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            CatalogConfig::from_json(&bytes)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => CatalogConfig::default(),
    };
    if reject_duplicates {
        return Ok(config.with_duplicates(DuplicatePolicy::Reject));
    }
    Ok(config)
}

async fn run_batch(manager: &Manager, file: &Path) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("reading batch {}", file.display()))?;
    let entries: Vec<BatchEntry> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing batch {}", file.display()))?;

    let ctx = Context::background();
    let mut names = Vec::with_capacity(entries.len());
    let mut pending = Vec::with_capacity(entries.len());
    for entry in entries {
        let payload = match entry.payload {
            Value::Null => Vec::new(),
            payload => serde_json::to_vec(&payload)?,
        };
        pending.push(manager.future_raw(ctx.clone(), entry.name.as_str(), payload));
        names.push(entry.name);
    }

    let results = futures::wait_all(pending).wait().await;
    for (name, result) in names.into_iter().zip(results) {
        let line = match result {
            Ok(res) => json!({ "name": name, "result": res.to_json()? }),
            Err(err) => {
                warn!(command = %name, kind = ?err.kind(), "batch entry failed");
                json!({ "name": name, "error": err.to_string() })
            }
        };
        println!("{line}");
    }
    Ok(())
}

fn report(err: &anyhow::Error) {
    // CommandError の Display は原因まで含む
    if err.downcast_ref::<CommandError>().is_some() {
        eprintln!("error: {err}");
    } else {
        eprintln!("error: {err:#}");
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<CommandError>().map(CommandError::kind) {
        Some(ErrorKind::MappingMissing | ErrorKind::DecoderMissing | ErrorKind::HandlerMissing) => {
            2
        }
        Some(ErrorKind::DecoderFailure | ErrorKind::InvalidEnvelope) => 3,
        Some(ErrorKind::Handler) => 4,
        _ => 1,
    }
}
