//! Records every invocation into in-memory counters and a metrics file
//!
//! A recorder is constructed explicitly and shared behind an `Arc`. The metrics file is a single
//! json document keyed by function and model:
//!
//! ```json
//! { "functions": { "invoke": { "anthropic.claude-3-haiku-20240307-v1:0": { "total_requests": 1, ... } } } }
//! ```
//!
//! Recording never fails the invocation it observes. Errors are logged and swallowed.
//!
//! Every write goes to its own temporary file which is then renamed over the metrics file, so
//! the file is always a complete document. Recorders sharing a file merge with what is on disk
//! before writing, but two writes racing each other keep only the last.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::invocation::InvocationResult;

pub const DEFAULT_METRICS_FILE: &str = "metrics.jsonl";

/// Cumulative metrics for one function and model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionMetrics {
    pub total_requests: u64,
    pub degraded_requests: u64,
    pub cumulative_input_tokens: u64,
    pub cumulative_output_tokens: u64,
    pub cumulative_input_cost_dollars: f64,
    pub cumulative_output_cost_dollars: f64,
    pub cumulative_total_cost_dollars: f64,
    pub last_invocation: Option<InvocationResult>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl FunctionMetrics {
    fn apply(&mut self, result: &InvocationResult, at: DateTime<Utc>) {
        self.total_requests += 1;
        if result.degraded {
            self.degraded_requests += 1;
        }
        self.cumulative_input_tokens += result.input_tokens;
        self.cumulative_output_tokens += result.output_tokens;
        self.cumulative_input_cost_dollars += result.input_cost;
        self.cumulative_output_cost_dollars += result.output_cost;
        self.cumulative_total_cost_dollars += result.total_cost;
        self.last_invocation = Some(result.clone());
        self.updated_at = Some(at);
    }
}

/// The metrics file, and the in-memory counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    #[serde(default)]
    pub functions: BTreeMap<String, BTreeMap<String, FunctionMetrics>>,
}

impl MetricsDocument {
    pub fn get(&self, function_name: &str, model_name: &str) -> Option<&FunctionMetrics> {
        self.functions.get(function_name)?.get(model_name)
    }

    fn entry(&mut self, function_name: &str, model_name: &str) -> &mut FunctionMetrics {
        self.functions
            .entry(function_name.to_string())
            .or_default()
            .entry(model_name.to_string())
            .or_default()
    }

    pub fn total_requests(&self) -> u64 {
        self.functions
            .values()
            .flat_map(BTreeMap::values)
            .map(|metrics| metrics.total_requests)
            .sum()
    }
}

#[derive(Debug)]
pub struct ObservabilityRecorder {
    path: Option<PathBuf>,
    /// Guards the counters and every read-modify-write of the file
    state: Mutex<MetricsDocument>,
}

impl ObservabilityRecorder {
    /// A recorder that persists to `path`. Existing metrics in the file seed the counters.
    pub async fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let state = match read_document(&path).await {
            Ok(Some(document)) => document,
            Ok(None) => MetricsDocument::default(),
            Err(err) => {
                tracing::error!(
                    path = %path.display(),
                    error = format!("{err:#}"),
                    "Ignoring unreadable metrics file"
                );
                MetricsDocument::default()
            }
        };

        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    /// A recorder that only keeps counters in memory
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(MetricsDocument::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records an invocation. Never fails; errors are logged.
    pub async fn record(&self, function_name: &str, model_name: &str, result: &InvocationResult) {
        #[cfg(feature = "metrics")]
        crate::metrics::emit_invocation(function_name, model_name, result);

        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.entry(function_name, model_name).apply(result, now);

        let Some(path) = &self.path else {
            return;
        };

        if let Err(err) = merge_into_file(path, &state, function_name, model_name, result, now).await
        {
            tracing::error!(
                path = %path.display(),
                function_name,
                model_name,
                error = format!("{err:#}"),
                "Failed to record invocation metrics"
            );
        }
    }

    /// A copy of the current counters
    pub async fn snapshot(&self) -> MetricsDocument {
        self.state.lock().await.clone()
    }

    /// Rewrites the metrics file from the in-memory counters
    pub async fn flush(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let state = self.state.lock().await;
        if let Err(err) = write_document(path, &state).await {
            tracing::error!(
                path = %path.display(),
                error = format!("{err:#}"),
                "Failed to flush invocation metrics"
            );
        }
    }
}

async fn read_document(path: &Path) -> Result<Option<MetricsDocument>> {
    let json = match fs_err::tokio::read_to_string(path).await {
        Ok(json) => json,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if json.trim().is_empty() {
        return Ok(None);
    }

    let document = serde_json::from_str(&json)
        .with_context(|| format!("Malformed metrics file {}", path.display()))?;
    Ok(Some(document))
}

/// A sibling of `path` no other writer in this or another process is using
fn tmp_path(path: &Path) -> PathBuf {
    static WRITES: AtomicU64 = AtomicU64::new(0);

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(
        ".{}.{}.tmp",
        std::process::id(),
        WRITES.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(tmp)
}

async fn write_document(path: &Path, document: &MetricsDocument) -> Result<()> {
    let json = serde_json::to_string_pretty(document)?;

    let tmp = tmp_path(path);

    fs_err::tokio::write(&tmp, json).await?;
    fs_err::tokio::rename(&tmp, path).await?;
    Ok(())
}

/// Applies one invocation to whatever is on disk, so that other writers to the same file are not
/// lost. A malformed file is replaced by the in-memory counters.
async fn merge_into_file(
    path: &Path,
    in_memory: &MetricsDocument,
    function_name: &str,
    model_name: &str,
    result: &InvocationResult,
    at: DateTime<Utc>,
) -> Result<()> {
    let document = match read_document(path).await {
        Ok(Some(mut document)) => {
            document.entry(function_name, model_name).apply(result, at);
            document
        }
        Ok(None) => in_memory.clone(),
        Err(err) => {
            tracing::warn!(
                error = format!("{err:#}"),
                "Replacing unreadable metrics file with in-memory counters"
            );
            in_memory.clone()
        }
    };

    write_document(path, &document).await
}
