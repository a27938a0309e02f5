//! `docflow stress` -- concurrent approval run against an in-memory store.
//!
//! Creates one document, submits it, then lets the concurrency harness race
//! `attempts` approvals across `threads` workers. Exactly one attempt should
//! win; the process exits non-zero otherwise.

use std::process;
use std::sync::Arc;

use docflow_engine::{ConcurrencyReport, DocumentService, EngineConfig, EngineError};
use docflow_storage::{DocumentStorage, InMemoryStorage};

use crate::{report_error, OutputFormat};

const STRESS_INITIATOR: &str = "STRESS";

pub(crate) fn cmd_stress(threads: usize, attempts: usize, output: OutputFormat, quiet: bool) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("failed to create tokio runtime: {}", e),
                output,
                quiet,
            );
            process::exit(1);
        }
    };

    let (report, registry_entries) = match rt.block_on(run(threads, attempts)) {
        Ok(result) => result,
        Err(e) => {
            report_error(&format!("stress run failed: {}", e), output, quiet);
            process::exit(1);
        }
    };

    match output {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&report).unwrap_or_default();
            value["registryEntries"] = serde_json::json!(registry_entries);
            println!("{}", value);
        }
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "{} workers, {} attempts: {} succeeded, {} conflicted, {} errored",
                    threads,
                    attempts,
                    report.success_count,
                    report.conflict_count,
                    report.error_count
                );
                println!("final status: {}", report.final_status);
                println!("registry entries: {}", registry_entries);
            }
        }
    }

    let expected_wins = usize::from(attempts > 0);
    if report.success_count != expected_wins || registry_entries != expected_wins as u64 {
        report_error(
            &format!(
                "expected {} winning approval, observed {} (registry entries: {})",
                expected_wins, report.success_count, registry_entries
            ),
            output,
            quiet,
        );
        process::exit(1);
    }
}

async fn run(threads: usize, attempts: usize) -> Result<(ConcurrencyReport, u64), EngineError> {
    let storage = Arc::new(InMemoryStorage::new());
    let service = DocumentService::new(Arc::clone(&storage), &EngineConfig::default());

    let document = service.create("stress", "Concurrency stress document").await?;
    service.submit(document.id, STRESS_INITIATOR).await?;

    let report = service.test_concurrency(document.id, threads, attempts).await?;
    let registry_entries = storage.count_registry_entries(document.id).await?;
    Ok((report, registry_entries))
}
