//! Background job queue: the asynchronous entry point.
//!
//! [`JobQueue::submit`] validates nothing beyond the request shape, assigns
//! a run id and returns as soon as the job is queued. A single worker task
//! drains the queue and runs up to `max_concurrent_runs` pipelines at once;
//! each run is its own tokio task, so a panicking run cannot take the worker
//! down with it. A run whose task dies is still cleaned up, notified and
//! reported as failed. Reports come back on [`WorkerHandle::next_report`].

use crate::error::PipelineError;
use crate::model::{CancellationToken, RunContext, RunId, RunRequest};
use crate::orchestrator::Pipeline;
use crate::output::RunReport;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

/// A queued run.
#[derive(Debug)]
struct Job {
    request: RunRequest,
    ctx: RunContext,
}

type CancelRegistry = Arc<Mutex<HashMap<RunId, CancellationToken>>>;

/// Submission side of the worker. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    pipeline: Arc<Pipeline>,
    active: CancelRegistry,
}

/// Worker side: receives reports and waits for the worker to drain.
pub struct WorkerHandle {
    reports: mpsc::UnboundedReceiver<RunReport>,
    task: JoinHandle<()>,
}

/// Start a worker for `pipeline` with room for `capacity` queued jobs.
pub fn spawn_worker(pipeline: Pipeline, capacity: usize) -> (JobQueue, WorkerHandle) {
    let pipeline = Arc::new(pipeline);
    let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let active: CancelRegistry = Arc::default();
    let limit = pipeline.config().max_concurrent_runs;

    let worker_pipeline = Arc::clone(&pipeline);
    let worker_active = Arc::clone(&active);
    let task = tokio::spawn(async move {
        ReceiverStream::new(rx)
            .for_each_concurrent(limit, |job| {
                let pipeline = Arc::clone(&worker_pipeline);
                let active = Arc::clone(&worker_active);
                let report_tx = report_tx.clone();
                async move {
                    let ctx = job.ctx.clone();
                    let instructions = job.request.instructions.clone();
                    let run_pipeline = Arc::clone(&pipeline);
                    let handle =
                        tokio::spawn(async move { run_pipeline.run(&job.request, job.ctx).await });
                    let report = match handle.await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(run_id = %ctx.run_id, "run task failed: {}", e);
                            pipeline.abort_run(&ctx, instructions, &e.to_string()).await
                        }
                    };
                    let _ = report_tx.send(report);
                    if let Ok(mut map) = active.lock() {
                        map.remove(&ctx.run_id);
                    }
                }
            })
            .await;
        info!("job queue closed, worker stopped");
    });

    (
        JobQueue {
            tx,
            pipeline,
            active,
        },
        WorkerHandle {
            reports: report_rx,
            task,
        },
    )
}

impl JobQueue {
    /// Queue a run and return its id without waiting for it to start.
    pub async fn submit(&self, request: RunRequest, user_id: i64) -> Result<RunId, PipelineError> {
        let ctx = self.pipeline.context(request.course_id, user_id);
        self.enqueue(request, ctx).await
    }

    /// Queue a run under a caller-chosen id.
    pub async fn submit_with_id(
        &self,
        request: RunRequest,
        user_id: i64,
        run_id: RunId,
    ) -> Result<RunId, PipelineError> {
        let ctx = self
            .pipeline
            .context(request.course_id, user_id)
            .with_run_id(run_id);
        self.enqueue(request, ctx).await
    }

    async fn enqueue(&self, request: RunRequest, ctx: RunContext) -> Result<RunId, PipelineError> {
        let run_id = ctx.run_id.clone();
        self.active
            .lock()
            .map_err(|_| PipelineError::Internal("run registry poisoned".into()))?
            .insert(run_id.clone(), ctx.cancel.clone());

        if self.tx.send(Job { request, ctx }).await.is_err() {
            if let Ok(mut map) = self.active.lock() {
                map.remove(&run_id);
            }
            return Err(PipelineError::Internal("worker has stopped".into()));
        }
        info!(run_id = %run_id, "run queued");
        Ok(run_id)
    }

    /// Ask a queued or running run to stop before its next stage.
    ///
    /// Returns false if the run is unknown or already finished.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|map| map.get(run_id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                info!(run_id = %run_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Runs queued or in progress.
    pub fn active_runs(&self) -> usize {
        self.active.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl WorkerHandle {
    /// The next finished run, or `None` once the worker has stopped and all
    /// reports were taken.
    pub async fn next_report(&mut self) -> Option<RunReport> {
        self.reports.recv().await
    }

    /// Wait until every [`JobQueue`] clone is dropped and all queued runs
    /// finished. Returns the reports not yet taken.
    pub async fn join(mut self) -> Vec<RunReport> {
        if let Err(e) = (&mut self.task).await {
            error!("worker task failed: {}", e);
        }
        let mut rest = Vec::new();
        while let Ok(report) = self.reports.try_recv() {
            rest.push(report);
        }
        rest
    }
}
