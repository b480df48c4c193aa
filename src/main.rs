use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use docflow::config::PipelineConfig;
use docflow::models::{BackendKind, DocumentType, RawDocument};
use docflow::{Orchestrator, RunOptions};

#[derive(Parser, Debug)]
#[command(
    name = "docflow",
    version,
    about = "Classify documents and extract validated records"
)]
struct Cli {
    /// Config file. Defaults to <config dir>/docflow/config.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip classification: invoice, contract, cv or other.
    #[arg(long = "type", value_name = "TYPE")]
    document_type: Option<DocumentType>,

    /// Model backend: local or cloud.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Do not OCR scanned pages.
    #[arg(long)]
    no_ocr: bool,

    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    docflow::init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::load_or_default(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("docflow: {e}");
            return ExitCode::from(2);
        }
    };
    let orchestrator = match Orchestrator::from_config(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("docflow: cannot initialise model backends: {e}");
            return ExitCode::from(2);
        }
    };

    let mut options = RunOptions::from_config(orchestrator.config());
    if let Some(document_type) = cli.document_type {
        options = options.with_type_hint(document_type);
    }
    if let Some(backend) = cli.backend {
        options = options.with_backend(backend);
    }
    if cli.no_ocr {
        options = options.without_ocr();
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling runs");
            interrupt.cancel();
        }
    });

    let mut failed = false;
    let mut documents = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        match RawDocument::from_path(path) {
            Ok(raw) => documents.push(raw),
            Err(e) => {
                failed = true;
                emit(&json!({
                    "file": path.display().to_string(),
                    "error": format!("Cannot read file: {e}"),
                }));
            }
        }
    }

    let report = orchestrator
        .process_batch(documents, &options, &cancel)
        .await;
    for item in &report.items {
        match &item.outcome {
            Ok(record) => emit(record),
            Err(e) => emit(&json!({
                "file": item.source_name,
                "run_id": e.run_id,
                "stage": e.stage,
                "error": e.cause.to_string(),
            })),
        }
    }

    let stats = orchestrator.stats();
    tracing::info!(
        processed = stats.documents_processed,
        failed = stats.documents_failed,
        pages = stats.pages_extracted,
        ocr_pages = stats.ocr_pages,
        retries = stats.extraction_retries,
        inference_requests = stats.inference.requests,
        inference_success_rate = stats.inference.success_rate(),
        "Usage"
    );

    if failed || report.summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// One JSON document per line on stdout.
fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "Cannot serialize output"),
    }
}
