//! `docflow generate` -- bulk document creation over HTTP.
//!
//! Posts `{"author": "Author-i", "title": "Generated Doc i"}` to a running
//! server `count` times and counts the 201 responses. Requests are spread
//! over a small pool of OS threads, each with its own `ureq` agent.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::{report_error, OutputFormat};

pub(crate) const DEFAULT_URL: &str = "http://localhost:8080/api/v1/documents";

/// Progress is logged every this many completed requests.
const PROGRESS_EVERY: usize = 10;

pub(crate) struct GenerateOptions {
    pub(crate) count: usize,
    pub(crate) url: String,
    pub(crate) concurrency: usize,
    pub(crate) api_key: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GenerateSummary {
    pub(crate) requested: usize,
    pub(crate) created: usize,
    pub(crate) failed: usize,
}

pub(crate) fn cmd_generate(options: &GenerateOptions, output: OutputFormat, quiet: bool) {
    let started = Instant::now();
    let summary = run(options, quiet);
    let elapsed = started.elapsed();

    match output {
        OutputFormat::Json => {
            let result = serde_json::json!({
                "requested": summary.requested,
                "created": summary.created,
                "failed": summary.failed,
                "elapsedMs": elapsed.as_millis() as u64,
            });
            println!("{}", result);
        }
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "created {} of {} documents in {:.2}s",
                    summary.created,
                    summary.requested,
                    elapsed.as_secs_f64()
                );
            }
        }
    }

    if summary.requested > 0 && summary.created == 0 {
        report_error(
            &format!("no documents were created at {}", options.url),
            output,
            quiet,
        );
        process::exit(1);
    }
}

fn run(options: &GenerateOptions, quiet: bool) -> GenerateSummary {
    let next = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let created = AtomicUsize::new(0);
    let workers = options.concurrency.clamp(1, options.count.max(1));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                let agent = agent();
                loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= options.count {
                        break;
                    }
                    match create_one(&agent, options, i) {
                        Ok(()) => {
                            created.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            tracing::warn!(index = i, error = %e, "document creation failed");
                        }
                    }
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if !quiet && done % PROGRESS_EVERY == 0 {
                        tracing::info!(done, total = options.count, "generation progress");
                    }
                }
            });
        }
    });

    let created = created.into_inner();
    GenerateSummary {
        requested: options.count,
        created,
        failed: options.count - created,
    }
}

fn agent() -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(30)))
        .http_status_as_error(false)
        .build()
        .into()
}

fn create_one(agent: &ureq::Agent, options: &GenerateOptions, i: usize) -> Result<(), String> {
    let body = serde_json::json!({
        "author": format!("Author-{}", i),
        "title": format!("Generated Doc {}", i),
    });

    let mut request = agent.post(&options.url);
    if let Some(key) = &options.api_key {
        request = request.header("X-API-Key", key);
    }

    let response = request
        .send_json(&body)
        .map_err(|e| format!("request to {} failed: {}", options.url, e))?;

    let status = response.status().as_u16();
    if status == 201 {
        Ok(())
    } else {
        Err(format!("server returned {}", status))
    }
}
