use crate::api::ApiClient;
use crate::engine::{EngineControl, GenEngine};
use crate::model::{GenEvent, RunConfig, RunResult};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "promptforge",
    version,
    about = "Promptforge platform client: browse datasets and generate synthetic entries"
)]
pub struct Cli {
    /// Base URL of the Promptforge API
    #[arg(long, default_value = "https://api.promptforge.dev")]
    pub base_url: String,

    /// API token (falls back to the PROMPTFORGE_TOKEN environment variable)
    #[arg(long, env = "PROMPTFORGE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Project to operate on
    #[arg(long)]
    pub project: Option<String>,

    /// Dataset to seed from and append to
    #[arg(long)]
    pub dataset: Option<String>,

    /// Guidance template id (defaults to the first in the catalog)
    #[arg(long)]
    pub template: Option<String>,

    /// Task description substituted into the guidance template
    #[arg(long)]
    pub task: Option<String>,

    /// Number of entries to generate
    #[arg(long)]
    pub count: Option<usize>,

    /// Maximum in-flight generation requests
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Number of existing entries to rotate through as seeds (0 = unseeded)
    #[arg(long)]
    pub seed_limit: Option<usize>,

    /// Per-request timeout
    #[arg(long, default_value = "2m")]
    pub request_timeout: humantime::Duration,

    /// Print JSON result and exit
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Export results as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Export results as CSV
    #[arg(long)]
    pub export_csv: Option<std::path::PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Save the run configuration as a draft and exit
    #[arg(long)]
    pub save_draft: bool,

    /// Fill unset flags from the saved draft
    #[arg(long)]
    pub resume_draft: bool,

    /// List projects and exit
    #[arg(long)]
    pub list_projects: bool,

    /// List datasets in the project and exit
    #[arg(long)]
    pub list_datasets: bool,

    /// List guidance templates and exit
    #[arg(long)]
    pub list_templates: bool,

    /// Compose and print the guidance prompt without generating anything
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let draft = if args.resume_draft {
        crate::storage::load_draft().context("failed to load draft")?
    } else {
        None
    };
    let cfg = build_config(&args, draft)?;

    if args.save_draft {
        let path = crate::storage::save_draft(&cfg)?;
        println!("Draft saved: {}", path.display());
        return Ok(());
    }

    if args.list_projects || args.list_datasets || args.list_templates {
        return run_listing(&args, &cfg).await;
    }

    if args.dry_run {
        return run_dry_run(&args, &cfg).await;
    }

    run_generation(args, cfg).await
}

/// Generate a random run ID.
fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

/// Build a `RunConfig` from CLI arguments, filling unset values from the
/// draft when one was loaded. Explicit flags always win.
pub fn build_config(args: &Cli, draft: Option<RunConfig>) -> Result<RunConfig> {
    let token = args
        .token
        .clone()
        .context("an API token is required (--token or PROMPTFORGE_TOKEN)")?;

    let (d_project, d_dataset, d_template, d_task, d_count, d_concurrency, d_seed_limit) =
        match draft {
            Some(d) => (
                d.project_id,
                d.dataset_id,
                d.template_id,
                d.task,
                Some(d.count),
                Some(d.concurrency),
                Some(d.seed_limit),
            ),
            None => (None, None, None, None, None, None, None),
        };

    let concurrency = args.concurrency.or(d_concurrency).unwrap_or(5);
    if concurrency == 0 {
        anyhow::bail!("--concurrency must be at least 1");
    }
    let count = args.count.or(d_count).unwrap_or(25);
    if count == 0 {
        anyhow::bail!("--count must be at least 1");
    }

    Ok(RunConfig {
        base_url: args.base_url.clone(),
        token,
        run_id: gen_run_id(),
        project_id: args.project.clone().or(d_project),
        dataset_id: args.dataset.clone().or(d_dataset),
        count,
        concurrency,
        seed_limit: args.seed_limit.or(d_seed_limit).unwrap_or(5),
        template_id: args.template.clone().or(d_template),
        task: args.task.clone().or(d_task),
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("promptforge-cli/{}", env!("CARGO_PKG_VERSION")),
    })
}

async fn run_listing(args: &Cli, cfg: &RunConfig) -> Result<()> {
    let client = ApiClient::new(cfg)?;
    let (out_tx, out_handle) = spawn_output_writer();

    if args.list_projects {
        let projects = client.list_projects().await?;
        if args.json {
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&projects)?));
        } else {
            for p in &projects {
                let _ = out_tx.send(OutputLine::Stdout(format!("{}  {}", p.id, p.name)));
            }
        }
    } else if args.list_datasets {
        let project = cfg
            .project_id
            .as_deref()
            .context("--list-datasets requires --project")?;
        let datasets = client.list_datasets(project).await?;
        if args.json {
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&datasets)?));
        } else {
            for d in &datasets {
                let count = d
                    .entry_count
                    .map(|n| format!(" ({} entries)", n))
                    .unwrap_or_default();
                let _ = out_tx.send(OutputLine::Stdout(format!("{}  {}{}", d.id, d.name, count)));
            }
        }
    } else {
        let (templates, _criteria) = client.list_guidance_templates().await?;
        if args.json {
            let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(
                &templates,
            )?));
        } else {
            for t in &templates {
                let _ = out_tx.send(OutputLine::Stdout(format!("{}  {}", t.id, t.label)));
            }
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Compose the guidance prompt exactly as a run would, then print it.
async fn run_dry_run(args: &Cli, cfg: &RunConfig) -> Result<()> {
    let client = ApiClient::new(cfg)?;
    let (templates, criteria) = client.list_guidance_templates().await?;
    let mut selector = crate::guidance::GuidanceSelector::new(templates, criteria)?;
    if let Some(id) = cfg.template_id.as_deref() {
        selector.select(id)?;
    }
    let task = cfg.task.as_deref().unwrap_or(crate::engine::DEFAULT_TASK);
    let prompt = selector.compose_for(task);

    let (out_tx, out_handle) = spawn_output_writer();
    if args.json {
        let out = serde_json::json!({
            "template_id": selector.active().id,
            "prompt": prompt,
        });
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&out)?));
    } else {
        let _ = out_tx.send(OutputLine::Stdout(prompt));
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

async fn run_generation(args: Cli, cfg: RunConfig) -> Result<()> {
    if args.json || args.silent {
        run_engine_json(args, cfg).await
    } else {
        run_engine_text(args, cfg).await
    }
}

/// Spawn the engine and wire Ctrl-C to a cancel command.
fn spawn_engine(
    cfg: RunConfig,
    event_tx: mpsc::UnboundedSender<GenEvent>,
) -> tokio::task::JoinHandle<Result<RunResult>> {
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_tx.send(EngineControl::Cancel);
        }
    });
    let engine = GenEngine::new(cfg);
    tokio::spawn(async move { engine.run(event_tx, ctrl_rx).await })
}

/// Run the engine without progress output and print the JSON result.
async fn run_engine_json(args: Cli, cfg: RunConfig) -> Result<()> {
    let silent = args.silent;
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<GenEvent>();
    let handle = spawn_engine(cfg, evt_tx);

    // Consume events silently (no progress output in JSON modes)
    while let Some(_ev) = evt_rx.recv().await {}

    let result = handle
        .await
        .context("generation task failed")?
        .context("generation run failed")?;

    handle_exports(&args, &result)?;

    if !silent {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if args.auto_save {
        let saved = crate::storage::save_run(&result).context("failed to save run results")?;
        if !silent {
            eprintln!("Saved: {}", saved.display());
        }
    }
    Ok(())
}

async fn run_engine_text(args: Cli, cfg: RunConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<GenEvent>();
    let handle = spawn_engine(cfg, evt_tx);

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            GenEvent::PhaseStarted { phase } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {phase:?} ==")));
            }
            GenEvent::ItemFinished {
                index,
                ok,
                latency_ms,
            } => {
                let status = if ok { "ok" } else { "failed" };
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "item {index}: {status} ({latency_ms:.0} ms)"
                )));
            }
            GenEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
        }
    }

    let result = handle.await??;

    handle_exports(&args, &result)?;
    let summary = crate::text_summary::build_text_summary(&result);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    if args.auto_save {
        if let Ok(p) = crate::storage::save_run(&result) {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Handle export operations (JSON and CSV) for both text and JSON modes.
fn handle_exports(args: &Cli, result: &RunResult) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, result)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        crate::storage::export_csv(p, result)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Cli {
        Cli::parse_from(["promptforge", "--token", "tok", "--dataset", "ds1"])
    }

    #[test]
    fn defaults_apply_without_a_draft() {
        let cfg = build_config(&base_args(), None).expect("config");
        assert_eq!(cfg.count, 25);
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.seed_limit, 5);
        assert_eq!(cfg.dataset_id.as_deref(), Some("ds1"));
    }

    #[test]
    fn missing_token_is_an_error() {
        let args = Cli::parse_from(["promptforge", "--dataset", "ds1"]);
        // The env fallback may be set in the developer's shell; only assert
        // when the flag path alone is in play.
        if args.token.is_none() {
            assert!(build_config(&args, None).is_err());
        }
    }

    #[test]
    fn explicit_flags_override_draft_values() {
        let draft = RunConfig {
            base_url: "https://api.promptforge.dev".into(),
            token: String::new(),
            run_id: "old".into(),
            project_id: Some("p-draft".into()),
            dataset_id: Some("ds-draft".into()),
            count: 100,
            concurrency: 9,
            seed_limit: 2,
            template_id: Some("tpl-draft".into()),
            task: Some("draft task".into()),
            request_timeout: Duration::from_secs(60),
            user_agent: "x".into(),
        };
        let args = Cli::parse_from([
            "promptforge",
            "--token",
            "tok",
            "--dataset",
            "ds-flag",
            "--count",
            "7",
        ]);
        let cfg = build_config(&args, Some(draft)).expect("config");

        assert_eq!(cfg.dataset_id.as_deref(), Some("ds-flag"));
        assert_eq!(cfg.count, 7);
        // Unset flags fall back to the draft.
        assert_eq!(cfg.project_id.as_deref(), Some("p-draft"));
        assert_eq!(cfg.template_id.as_deref(), Some("tpl-draft"));
        assert_eq!(cfg.concurrency, 9);
        assert_eq!(cfg.task.as_deref(), Some("draft task"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let args = Cli::parse_from([
            "promptforge",
            "--token",
            "tok",
            "--dataset",
            "ds1",
            "--concurrency",
            "0",
        ]);
        assert!(build_config(&args, None).is_err());
    }
}
