use crate::api::ApiClient;
use crate::engine::wait_if_paused_or_cancelled;
use crate::limiter::Limiter;
use crate::model::{DatasetEntry, GenEvent, GeneratedEntry, InfoEvent, ItemOutcome, RunConfig};
use anyhow::Result;
use std::num::NonZeroUsize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Parameters for the batched generation phase.
pub(crate) struct GenerationParams<'a> {
    pub client: &'a ApiClient,
    pub cfg: &'a RunConfig,
    pub dataset_id: &'a str,
    pub prompt: &'a str,
    pub seeds: &'a [DatasetEntry],
    pub event_tx: &'a mpsc::UnboundedSender<GenEvent>,
    pub paused: Arc<AtomicBool>,
    pub cancel: Arc<AtomicBool>,
}

pub(crate) struct GenerationOutput {
    pub items: Vec<ItemOutcome>,
    pub entries: Vec<GeneratedEntry>,
    pub duration: Duration,
}

enum ItemStatus {
    Done(GeneratedEntry, Duration),
    Failed(String, Duration),
    /// Cancel arrived before this queued task started its request.
    Skipped,
}

/// Push `cfg.count` generation calls through a width-`cfg.concurrency`
/// limiter. Calls start in submission order; failures only mark their own
/// item. Pause and cancel are observed at each task's start, so in-flight
/// requests drain while queued ones become no-ops after a cancel.
pub(crate) async fn run_generation(params: GenerationParams<'_>) -> Result<GenerationOutput> {
    let GenerationParams {
        client,
        cfg,
        dataset_id,
        prompt,
        seeds,
        event_tx,
        paused,
        cancel,
    } = params;

    let width = NonZeroUsize::new(cfg.concurrency).unwrap_or(NonZeroUsize::MIN);
    let limiter = Limiter::new(width);
    let start = Instant::now();

    let mut handles = Vec::with_capacity(cfg.count);
    for index in 0..cfg.count {
        let client = client.clone();
        let dataset_id = dataset_id.to_string();
        let prompt = prompt.to_string();
        let seed = if seeds.is_empty() {
            None
        } else {
            Some(seeds[index % seeds.len()].clone())
        };
        let paused = paused.clone();
        let cancel = cancel.clone();
        let event_tx = event_tx.clone();

        let handle = limiter.submit(move || async move {
            if wait_if_paused_or_cancelled(&paused, &cancel).await {
                return ItemStatus::Skipped;
            }
            let t0 = Instant::now();
            let res = client
                .generate_entry(&dataset_id, &prompt, seed.as_ref())
                .await;
            let elapsed = t0.elapsed();
            let status = match res {
                Ok(entry) => ItemStatus::Done(entry, elapsed),
                Err(e) => ItemStatus::Failed(format!("{e:#}"), elapsed),
            };
            let _ = event_tx.send(GenEvent::ItemFinished {
                index,
                ok: matches!(status, ItemStatus::Done(..)),
                latency_ms: elapsed.as_secs_f64() * 1000.0,
            });
            status
        });
        handles.push(handle);
    }

    let settled = futures::future::join_all(handles).await;

    // Settlement handles come back in submission order even though the calls
    // themselves completed in whatever order the backend dictated.
    let mut items = Vec::with_capacity(cfg.count);
    let mut entries = Vec::new();
    for (index, outcome) in settled.into_iter().enumerate() {
        match outcome {
            Ok(ItemStatus::Done(entry, elapsed)) => {
                items.push(ItemOutcome {
                    index,
                    ok: true,
                    latency_ms: Some(elapsed.as_secs_f64() * 1000.0),
                    error: None,
                });
                entries.push(entry);
            }
            Ok(ItemStatus::Failed(error, elapsed)) => {
                let _ = event_tx.send(GenEvent::Info(InfoEvent::ItemFailed {
                    index,
                    error: error.clone(),
                }));
                items.push(ItemOutcome {
                    index,
                    ok: false,
                    latency_ms: Some(elapsed.as_secs_f64() * 1000.0),
                    error: Some(error),
                });
            }
            Ok(ItemStatus::Skipped) => {
                items.push(ItemOutcome {
                    index,
                    ok: false,
                    latency_ms: None,
                    error: None,
                });
            }
            Err(e) => {
                // The task panicked; its slot was freed and later items ran.
                items.push(ItemOutcome {
                    index,
                    ok: false,
                    latency_ms: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if cancel.load(Ordering::Relaxed) {
        let _ = event_tx.send(GenEvent::Info(InfoEvent::Message(
            "Run cancelled; keeping completed items".into(),
        )));
    }

    Ok(GenerationOutput {
        items,
        entries,
        duration: start.elapsed(),
    })
}
