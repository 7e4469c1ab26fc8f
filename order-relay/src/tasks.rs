//! Background task management
//!
//! The three pipeline workers (poll, delay sweep, export) run as periodic
//! tasks. Each cycle is independent: a failed cycle is logged and the next
//! tick tries again.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pipeline::{Pipeline, export, ingest, scheduler};

/// Task type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Long-running server loop
    Worker,
    /// Interval-driven job
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

struct RegisteredTask {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// Owns spawned tasks and their shared shutdown token
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn a task, logging panics and unexpected exits
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let wrapped = async move {
            let result: Result<(), Box<dyn std::any::Any + Send>> =
                AssertUnwindSafe(future).catch_unwind().await;
            match result {
                Ok(()) => {
                    if !shutdown.is_cancelled() {
                        tracing::warn!(task = %name, kind = %kind, "Background task completed unexpectedly");
                    }
                }
                Err(panic_info) => {
                    let panic_msg: String = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    tracing::error!(task = %name, kind = %kind, panic = %panic_msg, "Background task panicked");
                }
            }
        };

        let handle = tokio::spawn(wrapped);
        tracing::debug!(task = %name, kind = %kind, "Registered background task");
        self.tasks.push(RegisteredTask { name, kind, handle });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks that have already exited
    pub fn check_health(&self) -> usize {
        let failed = self
            .tasks
            .iter()
            .filter(|t| t.handle.is_finished())
            .inspect(|t| {
                tracing::error!(task = %t.name, kind = %t.kind, "Background task unexpectedly finished");
            })
            .count();
        if failed > 0 {
            tracing::error!(failed, total = self.tasks.len(), "Background task health check failed");
        }
        failed
    }

    /// Cancel all tasks and wait for them to stop
    pub async fn shutdown(self) {
        tracing::info!("Shutting down {} background tasks...", self.tasks.len());
        self.shutdown.cancel();

        for task in self.tasks {
            match task.handle.await {
                Ok(()) => tracing::debug!(task = %task.name, "Task completed"),
                Err(e) if e.is_cancelled() => tracing::debug!(task = %task.name, "Task cancelled"),
                Err(e) => tracing::error!(task = %task.name, error = ?e, "Task panicked"),
            }
        }
        tracing::info!("All background tasks stopped");
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `cycle` every `period` until `shutdown` fires
async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(task = name, period_secs = period.as_secs(), "Periodic task started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => cycle().await,
        }
    }
}

/// Register the poll, sweep, and export workers
pub fn spawn_pipeline_workers(tasks: &mut BackgroundTasks, pipeline: &Pipeline) {
    let settings = &pipeline.settings;

    let p = pipeline.clone();
    let token = tasks.shutdown_token();
    tasks.spawn(
        "order_poll",
        TaskKind::Periodic,
        run_periodic("order_poll", settings.poll_interval, token, move || {
            let p = p.clone();
            async move {
                if let Err(e) = ingest::poll_all(&p, shared::util::now_millis()).await {
                    tracing::error!(error = %e, "Poll cycle failed");
                }
            }
        }),
    );

    let p = pipeline.clone();
    let token = tasks.shutdown_token();
    tasks.spawn(
        "delay_sweep",
        TaskKind::Periodic,
        run_periodic("delay_sweep", settings.sweep_tick, token, move || {
            let p = p.clone();
            async move {
                if let Err(e) = scheduler::run_due_sweeps(&p, shared::util::now_millis()).await {
                    tracing::error!(error = %e, "Sweep cycle failed");
                }
            }
        }),
    );

    let p = pipeline.clone();
    let token = tasks.shutdown_token();
    tasks.spawn(
        "export",
        TaskKind::Periodic,
        run_periodic("export", settings.export_tick, token, move || {
            let p = p.clone();
            async move {
                if let Err(e) = export::run_due_exports(&p, shared::util::now_millis()).await {
                    tracing::error!(error = %e, "Export cycle failed");
                }
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn periodic_task_stops_on_shutdown() {
        let mut tasks = BackgroundTasks::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let token = tasks.shutdown_token();
        tasks.spawn(
            "tick",
            TaskKind::Periodic,
            run_periodic("tick", Duration::from_millis(5), token, move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tasks.check_health(), 0);
        tasks.shutdown().await;
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
