//! Local persistence: draft run configuration and completed-run history.
//!
//! Everything lives under the platform data directory as plain JSON so runs
//! can be inspected and diffed with ordinary tools.

use crate::model::{RunConfig, RunResult};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "promptforge";
const DRAFT_FILE: &str = "draft.json";

fn data_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .context("could not determine the platform data directory")?
        .join(APP_DIR))
}

/// Persist the run configuration as the current draft.
pub fn save_draft(cfg: &RunConfig) -> Result<PathBuf> {
    save_draft_in(&data_dir()?, cfg)
}

/// Load the draft saved by a previous invocation, if any.
pub fn load_draft() -> Result<Option<RunConfig>> {
    load_draft_in(&data_dir()?)
}

/// Save a completed run under `runs/`, named by timestamp and run id.
pub fn save_run(result: &RunResult) -> Result<PathBuf> {
    save_run_in(&data_dir()?, result)
}

fn save_draft_in(dir: &Path, cfg: &RunConfig) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    let path = dir.join(DRAFT_FILE);
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(&path, json)
        .with_context(|| format!("failed to write draft to {}", path.display()))?;
    Ok(path)
}

fn load_draft_in(dir: &Path) -> Result<Option<RunConfig>> {
    let path = dir.join(DRAFT_FILE);
    let json = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read draft from {}", path.display()))
        }
    };
    let cfg = serde_json::from_str(&json)
        .with_context(|| format!("malformed draft at {}", path.display()))?;
    Ok(Some(cfg))
}

fn save_run_in(dir: &Path, result: &RunResult) -> Result<PathBuf> {
    let runs = dir.join("runs");
    fs::create_dir_all(&runs)
        .with_context(|| format!("failed to create runs directory {}", runs.display()))?;
    // Colons are not portable in file names.
    let stamp = result.timestamp_utc.replace(':', "-");
    let path = runs.join(format!("{}-{}.json", stamp, result.run_id));
    let json = serde_json::to_string_pretty(result)?;
    fs::write(&path, json)
        .with_context(|| format!("failed to write run to {}", path.display()))?;
    Ok(path)
}

pub fn export_json(path: &Path, result: &RunResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    fs::write(path, json)
        .with_context(|| format!("failed to export JSON to {}", path.display()))
}

/// One CSV row per generated item.
pub fn export_csv(path: &Path, result: &RunResult) -> Result<()> {
    let mut out = String::from("index,ok,latency_ms,error\n");
    for item in &result.items {
        let latency = item
            .latency_ms
            .map(|ms| format!("{ms:.1}"))
            .unwrap_or_default();
        let error = item.error.as_deref().unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{}\n",
            item.index,
            item.ok,
            latency,
            csv_field(error)
        ));
    }
    fs::write(path, out)
        .with_context(|| format!("failed to export CSV to {}", path.display()))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
