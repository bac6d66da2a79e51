//! `payload-codec` command-line entry point.
//!
//! ```text
//! payload-codec encode [codec]   < payloads.json
//! payload-codec decode           < payloads.json
//! payload-codec rotate
//! payload-codec reset <codec>
//! ```
//!
//! Payload documents are read from stdin and results written to stdout as
//! JSON. Failures are written to stdout as an error document and the process
//! exits non-zero. Logs go to stderr.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging.
//! 3. Parse the command.
//! 4. Open the file-backed key store.
//! 5. Run the command.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::protocol::{ErrorResponse, KeyChangeResponse, PayloadsDocument};
use common::ServiceError;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::info;

use payload_codec::config::Config;
use payload_codec::service::{self, CodecService};
use payload_codec::store::{FileKeyStore, KeyStoreClient};
use payload_codec::telemetry;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Encode(Option<String>),
    Decode,
    Rotate,
    Reset(String),
}

impl Command {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut args = args.into_iter();
        let command = match args.next().as_deref() {
            Some("encode") => Command::Encode(args.next()),
            Some("decode") => Command::Decode,
            Some("rotate") => Command::Rotate,
            Some("reset") => Command::Reset(args.next().context("usage: reset <codec>")?),
            Some(other) => anyhow::bail!("unknown command {other:?}"),
            None => anyhow::bail!("usage: payload-codec <encode [codec]|decode|rotate|reset <codec>>"),
        };
        if let Some(extra) = args.next() {
            anyhow::bail!("unexpected argument {extra:?}");
        }
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Logging is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Command
    // -----------------------------------------------------------------------
    let command = Command::parse(std::env::args().skip(1))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?command,
        "payload-codec starting"
    );

    // -----------------------------------------------------------------------
    // 4. Key store
    // -----------------------------------------------------------------------
    let store: Arc<dyn KeyStoreClient> = Arc::new(FileKeyStore::new(&cfg.store_dir));

    // -----------------------------------------------------------------------
    // 5. Run
    // -----------------------------------------------------------------------
    match run(&cfg, store, command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(response) => {
            emit(&response)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Run one command. `Err` carries the error document to print.
async fn run(
    cfg: &Config,
    store: Arc<dyn KeyStoreClient>,
    command: Command,
) -> Result<(), ErrorResponse> {
    match command {
        Command::Reset(name) => {
            let current = service::reset_codec(cfg, store, &name)
                .await
                .map_err(|e| e.to_response())?;
            emit_or_internal(&KeyChangeResponse {
                changed: vec![current],
            })
        }
        Command::Rotate => {
            let service = build(cfg, store).await?;
            let changed = service.rotate_all().await.map_err(|e| e.to_response())?;
            emit_or_internal(&KeyChangeResponse { changed })
        }
        Command::Encode(name) => {
            let service = build(cfg, store).await?;
            let doc = read_document().await?;
            let name = name.as_deref().unwrap_or(service.encode_codec());
            let payloads = service
                .encode_with(name, &doc.payloads)
                .await
                .map_err(|e| e.to_response())?;
            emit_or_internal(&PayloadsDocument::new(payloads))
        }
        Command::Decode => {
            let service = build(cfg, store).await?;
            let doc = read_document().await?;
            let mut payloads = Vec::with_capacity(doc.payloads.len());
            for (index, result) in service.decode(doc.payloads).await.into_iter().enumerate() {
                payloads.push(result.map_err(|e| e.to_response().for_payload(index))?);
            }
            emit_or_internal(&PayloadsDocument::new(payloads))
        }
    }
}

async fn build(
    cfg: &Config,
    store: Arc<dyn KeyStoreClient>,
) -> Result<CodecService, ErrorResponse> {
    CodecService::from_config(cfg, store)
        .await
        .map_err(|e| ServiceError::ConfigRetrievalFailure(format!("{e:#}")).to_response())
}

async fn read_document() -> Result<PayloadsDocument, ErrorResponse> {
    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .map_err(|e| ServiceError::BadRequest(format!("failed to read stdin: {e}")).to_response())?;
    serde_json::from_slice(&input).map_err(|e| {
        ServiceError::BadRequest(format!("invalid payload document: {e}")).to_response()
    })
}

fn emit<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string(value).context("failed to serialise output")?;
    println!("{out}");
    Ok(())
}

fn emit_or_internal<T: Serialize>(value: &T) -> Result<(), ErrorResponse> {
    emit(value).map_err(|e| ServiceError::Internal(format!("{e:#}")).to_response())
}
