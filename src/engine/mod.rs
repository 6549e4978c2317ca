mod generate;

use crate::api::ApiClient;
use crate::guidance::GuidanceSelector;
use crate::model::{GenEvent, InfoEvent, Phase, RunConfig, RunResult};
use anyhow::{Context, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) const DEFAULT_TASK: &str = "Produce one more example consistent with the seed data.";

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Pause (true) or resume (false) the running generation
    Pause(bool),
    /// Cancel the run entirely
    Cancel,
}

/// Wait while paused; returns true if the run was cancelled.
pub(crate) async fn wait_if_paused_or_cancelled(paused: &AtomicBool, cancel: &AtomicBool) -> bool {
    while paused.load(Ordering::Relaxed) && !cancel.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cancel.load(Ordering::Relaxed)
}

pub struct GenEngine {
    cfg: RunConfig,
}

impl GenEngine {
    pub fn new(cfg: RunConfig) -> Self {
        Self { cfg }
    }

    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<GenEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<RunResult> {
        let client = ApiClient::new(&self.cfg)?;
        let dataset_id = self
            .cfg
            .dataset_id
            .clone()
            .context("a dataset is required to generate entries")?;

        let paused = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));

        // Control listener.
        let paused2 = paused.clone();
        let cancel2 = cancel.clone();
        let event_tx2 = event_tx.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Pause(p) => paused2.store(p, Ordering::Relaxed),
                    EngineControl::Cancel => {
                        cancel2.store(true, Ordering::Relaxed);
                        let _ = event_tx2.send(GenEvent::Info(InfoEvent::Cancelling));
                        break;
                    }
                }
            }
        });

        let _ = event_tx.send(GenEvent::PhaseStarted {
            phase: Phase::FetchTemplates,
        });

        let (templates, criteria) = client.list_guidance_templates().await?;
        let mut selector = GuidanceSelector::new(templates, criteria)?;
        if let Some(id) = self.cfg.template_id.as_deref() {
            selector.select(id)?;
        }
        let task = self.cfg.task.as_deref().unwrap_or(DEFAULT_TASK);
        let prompt = selector.compose_for(task);

        let seeds = if self.cfg.seed_limit > 0 {
            client
                .list_entries(&dataset_id, self.cfg.seed_limit)
                .await?
        } else {
            Vec::new()
        };
        if self.cfg.seed_limit > 0 && seeds.is_empty() {
            let _ = event_tx.send(GenEvent::Info(InfoEvent::Message(
                "Dataset has no entries to seed from; generating unseeded".into(),
            )));
        }

        let _ = event_tx.send(GenEvent::PhaseStarted {
            phase: Phase::Generate,
        });

        let output = generate::run_generation(generate::GenerationParams {
            client: &client,
            cfg: &self.cfg,
            dataset_id: &dataset_id,
            prompt: &prompt,
            seeds: &seeds,
            event_tx: &event_tx,
            paused,
            cancel: cancel.clone(),
        })
        .await?;

        let _ = event_tx.send(GenEvent::PhaseStarted {
            phase: Phase::Summary,
        });

        // Persist whatever succeeded, even on a cancelled run.
        let appended = if output.entries.is_empty() {
            0
        } else {
            match client.append_entries(&dataset_id, &output.entries).await {
                Ok(n) => {
                    let _ = event_tx.send(GenEvent::Info(InfoEvent::EntriesAppended { count: n }));
                    n
                }
                Err(e) => {
                    let _ = event_tx.send(GenEvent::Info(InfoEvent::Message(format!(
                        "Failed to append generated entries: {e:#}"
                    ))));
                    0
                }
            }
        };

        // Abort the control listener task before returning; dropping the
        // JoinHandle would leave it waiting on control_rx forever.
        control_handle.abort();

        let latencies: Vec<f64> = output
            .items
            .iter()
            .filter_map(|i| i.latency_ms)
            .collect();
        let ok_count = output.items.iter().filter(|i| i.ok).count();
        let failed_count = output
            .items
            .iter()
            .filter(|i| !i.ok && i.error.is_some())
            .count();
        let skipped_count = output.items.len() - ok_count - failed_count;

        Ok(RunResult {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            run_id: self.cfg.run_id.clone(),
            base_url: self.cfg.base_url.clone(),
            dataset_id,
            template_id: Some(selector.active().id.clone()),
            prompt,
            requested: self.cfg.count,
            ok_count,
            failed_count,
            skipped_count,
            duration_ms: output.duration.as_millis() as u64,
            latency: crate::metrics::latency_stats_from_samples(&latencies),
            items: output.items,
            appended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(base_url: &str, count: usize) -> RunConfig {
        RunConfig {
            base_url: base_url.to_string(),
            token: "t".into(),
            run_id: "run-test".into(),
            project_id: None,
            dataset_id: Some("ds1".into()),
            count,
            concurrency: 2,
            seed_limit: 0,
            template_id: None,
            task: Some("write a support reply".into()),
            request_timeout: Duration::from_secs(5),
            user_agent: "promptforge-test".into(),
        }
    }

    const CATALOG: &str = r#"{
        "templates": [{"id":"t1","label":"Default","body":"Do: {task}"}],
        "criteria": []
    }"#;

    #[tokio::test]
    async fn full_run_counts_outcomes_and_appends() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/guidance-templates")
            .with_body(CATALOG)
            .create_async()
            .await;
        let gen_mock = server
            .mock("POST", "/api/v1/datasets/ds1/generate")
            .with_body(r#"{"input":{"q":"x"},"output":{"a":"y"}}"#)
            .expect(3)
            .create_async()
            .await;
        server
            .mock("POST", "/api/v1/datasets/ds1/entries")
            .with_body(r#"{"inserted":3}"#)
            .create_async()
            .await;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let result = GenEngine::new(config(&server.url(), 3))
            .run(event_tx, ctrl_rx)
            .await
            .expect("run");

        assert_eq!(result.requested, 3);
        assert_eq!(result.ok_count, 3);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.appended, 3);
        assert_eq!(result.prompt, "Do: write a support reply");
        gen_mock.assert_async().await;

        let mut finished = 0;
        while let Ok(ev) = event_rx.try_recv() {
            if matches!(ev, GenEvent::ItemFinished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 3);
    }

    #[tokio::test]
    async fn failed_items_do_not_abort_the_run() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/guidance-templates")
            .with_body(CATALOG)
            .create_async()
            .await;
        // Every generation call fails; the run itself still completes.
        server
            .mock("POST", "/api/v1/datasets/ds1/generate")
            .with_status(500)
            .with_body("model overloaded")
            .expect(2)
            .create_async()
            .await;

        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        let result = GenEngine::new(config(&server.url(), 2))
            .run(event_tx, ctrl_rx)
            .await
            .expect("run");

        assert_eq!(result.ok_count, 0);
        assert_eq!(result.failed_count, 2);
        assert_eq!(result.appended, 0);
        let err = result.items[0].error.as_deref().unwrap_or_default();
        assert!(err.contains("500"), "missing status in: {err}");
    }

    #[tokio::test]
    async fn missing_dataset_is_an_error() {
        let mut cfg = config("http://localhost:1", 1);
        cfg.dataset_id = None;
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
        assert!(GenEngine::new(cfg).run(event_tx, ctrl_rx).await.is_err());
    }
}
