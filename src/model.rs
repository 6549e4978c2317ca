use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    /// Never persisted; re-applied from the CLI/env on every invocation.
    #[serde(skip)]
    pub token: String,
    pub run_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    pub count: usize,
    pub concurrency: usize,
    pub seed_limit: usize,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    FetchTemplates,
    Generate,
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GenEvent {
    PhaseStarted {
        phase: Phase,
    },
    /// One generation call settled, emitted in completion order.
    ItemFinished {
        index: usize,
        ok: bool,
        latency_ms: f64,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the engine and consumed by CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    ItemFailed { index: usize, error: String },
    EntriesAppended { count: usize },
    Cancelling,
}

impl InfoEvent {
    /// Render a human-readable message for CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::ItemFailed { index, error } => {
                format!("Item {}: generation failed: {}", index, error)
            }
            InfoEvent::EntriesAppended { count } => {
                format!("Appended {} generated entries to dataset", count)
            }
            InfoEvent::Cancelling => "Cancelling…".to_string(),
        }
    }
}

// Server resource shapes. These mirror the backend JSON and carry no logic.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entry_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceTemplate {
    pub id: String,
    pub label: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCriterion {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedEntry {
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub ok: bool,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p25_ms: f64,
    pub p75_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub timestamp_utc: String,
    pub run_id: String,
    pub base_url: String,
    pub dataset_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    /// The composed guidance prompt used for every generation call in this run.
    pub prompt: String,
    pub requested: usize,
    pub ok_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub duration_ms: u64,
    #[serde(default)]
    pub latency: Option<LatencyStats>,
    pub items: Vec<ItemOutcome>,
    pub appended: usize,
}
