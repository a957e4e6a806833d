/// Graceful shutdown sequencer.
///
/// Where the teacher has no equivalent (rusty-blox exits on ctrl-c with no
/// drain phase), this follows the same "shared flag checked cooperatively by
/// every loop" shape the teacher uses for its sync-height polling loops
/// (`monitor.rs`'s `loop { tokio::time::sleep(...); ... }`), adding a
/// priority-ordered registry of async handlers run once the flag flips.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

type Handler = Box<dyn Fn() -> futures::future::BoxFuture<'static, Result<(), String>> + Send + Sync>;

struct RegisteredHandler {
    priority: i32,
    name: String,
    handler: Handler,
}

/// Tally of a completed drain pass: every handler runs regardless of whether
/// an earlier one failed, and both outcomes are counted rather than the
/// sequencer bailing out on the first error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub successes: u32,
    pub failures: u32,
}

/// Cooperative shutdown coordinator. `is_shutting_down()` is polled by every
/// long-running loop (sync, gap repair, health server); `run_handlers()` is
/// called once from `main` after the signal arrives, draining handlers in
/// ascending priority order (lower runs first — e.g. "stop accepting new
/// batches" before "close the database pool").
pub struct ShutdownSequencer {
    flag: AtomicBool,
    handlers: Mutex<Vec<RegisteredHandler>>,
}

impl ShutdownSequencer {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub async fn register<F, Fut>(&self, name: impl Into<String>, priority: i32, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let boxed: Handler = Box::new(move || Box::pin(handler()));
        let mut handlers = self.handlers.lock().await;
        handlers.push(RegisteredHandler {
            priority,
            name: name.into(),
            handler: boxed,
        });
    }

    /// Runs every registered handler in ascending priority order, lowest
    /// first, timing each one and continuing past an individual failure
    /// rather than aborting the drain. Handlers at the same priority run in
    /// registration order.
    pub async fn run_handlers(&self) -> ShutdownReport {
        let mut handlers = self.handlers.lock().await;
        handlers.sort_by_key(|h| h.priority);
        let mut report = ShutdownReport::default();
        for h in handlers.iter() {
            let started = Instant::now();
            match (h.handler)().await {
                Ok(()) => {
                    report.successes += 1;
                    tracing::info!(
                        handler = %h.name,
                        priority = h.priority,
                        elapsed_ms = started.elapsed().as_millis(),
                        "shutdown handler succeeded"
                    );
                }
                Err(err) => {
                    report.failures += 1;
                    tracing::warn!(
                        handler = %h.name,
                        priority = h.priority,
                        elapsed_ms = started.elapsed().as_millis(),
                        error = %err,
                        "shutdown handler failed"
                    );
                }
            }
        }
        report
    }
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn not_shutting_down_initially() {
        let seq = ShutdownSequencer::new();
        assert!(!seq.is_shutting_down());
        seq.trigger();
        assert!(seq.is_shutting_down());
    }

    #[tokio::test]
    async fn handlers_run_in_priority_order() {
        let seq = ShutdownSequencer::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        seq.register("second", 10, move || {
            let o1 = o1.clone();
            async move {
                o1.lock().await.push("second");
                Ok(())
            }
        })
        .await;

        let o2 = order.clone();
        seq.register("first", 0, move || {
            let o2 = o2.clone();
            async move {
                o2.lock().await.push("first");
                Ok(())
            }
        })
        .await;

        let report = seq.run_handlers().await;
        assert_eq!(*order.lock().await, vec!["first", "second"]);
        assert_eq!(report, ShutdownReport { successes: 2, failures: 0 });
    }

    #[tokio::test]
    async fn no_handlers_does_nothing() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let seq = ShutdownSequencer::new();
        let report = seq.run_handlers().await;
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn failures_are_counted_and_do_not_stop_later_handlers() {
        let seq = ShutdownSequencer::new();
        let ran = Arc::new(Mutex::new(false));

        seq.register("fails", 0, || async { Err("boom".to_string()) }).await;
        let ran2 = ran.clone();
        seq.register("runs anyway", 1, move || {
            let ran2 = ran2.clone();
            async move {
                *ran2.lock().await = true;
                Ok(())
            }
        })
        .await;

        let report = seq.run_handlers().await;
        assert!(*ran.lock().await);
        assert_eq!(report, ShutdownReport { successes: 1, failures: 1 });
    }
}
