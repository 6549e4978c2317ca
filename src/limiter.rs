//! Bounded-concurrency task runner.
//!
//! Pure queue management around caller-supplied futures: at most `max` tasks
//! are in flight at once, the rest wait in FIFO order. The runner does no
//! retries and no logging; each submission settles with its own task's
//! outcome regardless of what other tasks do.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// The task terminated without producing a result (it panicked, or the
/// runtime shut down underneath it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFailed;

impl std::fmt::Display for TaskFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task terminated before producing a result")
    }
}

impl std::error::Error for TaskFailed {}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    active: usize,
    queue: VecDeque<Job>,
}

struct Inner {
    max: usize,
    state: Mutex<State>,
}

/// Runs caller-supplied async tasks with a fixed cap on in-flight work.
///
/// Tasks start strictly in submission order whenever a slot frees up;
/// completion order is whatever the tasks' own durations dictate. Once a task
/// has started it runs to completion; queued tasks cannot be cancelled.
#[derive(Clone)]
pub struct Limiter {
    inner: Arc<Inner>,
}

impl Limiter {
    /// A zero cap would leave every submission pending forever, so it is
    /// unrepresentable here.
    pub fn new(max: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max: max.get(),
                state: Mutex::new(State {
                    active: 0,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    /// Submit a task. The returned future settles with the task's own output,
    /// or `TaskFailed` if the task panicked. Nothing runs until a slot is
    /// free and every earlier submission has started. Must be called from
    /// within a Tokio runtime; tasks are spawned onto it.
    pub fn submit<F, Fut, T>(&self, task: F) -> impl Future<Output = Result<T, TaskFailed>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let job: Job = Box::new(move || {
            let slot = Slot(inner);
            tokio::spawn(async move {
                // Hold the slot across the await so a panicking task still
                // frees its capacity when the spawned task unwinds.
                let _slot = slot;
                let out = task().await;
                let _ = tx.send(out);
            });
        });
        self.inner.enqueue(job);
        async move { rx.await.map_err(|_| TaskFailed) }
    }
}

/// Occupied capacity; releases and re-advances the queue on drop.
struct Slot(Arc<Inner>);

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut st = self.0.lock_state();
            st.active -= 1;
        }
        self.0.advance();
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(self: &Arc<Self>, job: Job) {
        {
            let mut st = self.lock_state();
            st.queue.push_back(job);
        }
        self.advance();
    }

    /// Start queued jobs until the cap is reached or the queue drains. The
    /// job itself runs outside the lock; it only spawns onto the runtime.
    fn advance(self: &Arc<Self>) {
        loop {
            let job = {
                let mut st = self.lock_state();
                if st.active >= self.max {
                    return;
                }
                match st.queue.pop_front() {
                    Some(job) => {
                        st.active += 1;
                        job
                    }
                    None => return,
                }
            };
            job();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn limiter(n: usize) -> Limiter {
        Limiter::new(NonZeroUsize::new(n).expect("non-zero cap"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_cap() {
        let limiter = limiter(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let active = active.clone();
            let peak = peak.clone();
            handles.push(limiter.submit(move || async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(30)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.expect("task completed");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fifo_start_order_at_width_one() {
        let limiter = limiter(1);
        let starts = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        // Later tasks are faster than earlier ones; start order must not care.
        for (i, delay_ms) in [30u64, 10, 1].into_iter().enumerate() {
            let starts = starts.clone();
            handles.push(limiter.submit(move || async move {
                starts.lock().expect("lock").push(i);
                sleep(Duration::from_millis(delay_ms)).await;
            }));
        }
        for h in handles {
            h.await.expect("task completed");
        }

        assert_eq!(*starts.lock().expect("lock"), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn resolves_with_the_task_value() {
        let limiter = limiter(3);
        let got = limiter
            .submit(|| async { serde_json::json!({"key": "value"}) })
            .await
            .expect("task completed");
        assert_eq!(got, serde_json::json!({"key": "value"}));
    }

    #[tokio::test]
    async fn failed_task_does_not_stall_the_queue() {
        let limiter = limiter(1);
        let a = limiter.submit(|| async { Err::<i32, String>("err".into()) });
        let b = limiter.submit(|| async { Ok::<i32, String>(2) });
        let c = limiter.submit(|| async { Ok::<i32, String>(3) });

        assert_eq!(a.await.expect("settled"), Err("err".into()));
        assert_eq!(b.await.expect("settled"), Ok(2));
        assert_eq!(c.await.expect("settled"), Ok(3));
    }

    #[tokio::test]
    async fn panicked_task_frees_its_slot() {
        let limiter = limiter(1);
        let a = limiter.submit(|| async { panic!("boom") });
        let b = limiter.submit(|| async { 7 });

        assert_eq!(a.await, Err(TaskFailed));
        assert_eq!(b.await.expect("later task still ran"), 7);
    }

    #[tokio::test]
    async fn saturated_submissions_wait_for_a_slot() {
        let limiter = limiter(1);
        let b_started = Arc::new(AtomicBool::new(false));

        let a = limiter.submit(|| async {
            sleep(Duration::from_millis(50)).await;
        });
        let b_started2 = b_started.clone();
        let b = limiter.submit(move || async move {
            b_started2.store(true, Ordering::SeqCst);
        });

        sleep(Duration::from_millis(10)).await;
        assert!(!b_started.load(Ordering::SeqCst), "B started while A held the slot");

        a.await.expect("A completed");
        b.await.expect("B completed");
        assert!(b_started.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_task_settles_exactly_once() {
        let limiter = limiter(5);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..50usize {
            let seen = seen.clone();
            handles.push(limiter.submit(move || async move {
                // Uneven durations to shake up completion order.
                sleep(Duration::from_millis((id % 7) as u64)).await;
                seen.lock().expect("lock").push(id);
                id
            }));
        }
        for (id, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.expect("task completed"), id);
        }

        let mut got = seen.lock().expect("lock").clone();
        got.sort_unstable();
        assert_eq!(got, (0..50).collect::<Vec<_>>());
    }
}
