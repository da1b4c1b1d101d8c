//! Bounded-concurrency job processing.
//!
//! A [`Pool`] runs a fixed number of tokio tasks that share one job channel.
//! Each task pulls the next job as soon as it is free, so slow jobs never
//! block fast ones beyond the pool's width. Job errors do not stop the pool;
//! they are collected and handed back once every task has exited.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Processes jobs of type `J`.
pub trait Worker<J>: Send + Sync + 'static {
    type Error: Send + 'static;

    /// Per-task setup, run once before the task takes its first job.
    ///
    /// A task whose setup fails reports the error and takes no jobs.
    fn start(
        &self,
        _ctx: &CancellationToken,
        _worker_id: usize,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok(()) }
    }

    fn work(
        &self,
        ctx: &CancellationToken,
        worker_id: usize,
        job: J,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Fans a job channel out across worker tasks.
pub struct Pool;

impl Pool {
    /// Runs `num_workers` tasks until `jobs` is closed and drained, or `ctx`
    /// is cancelled, and returns every error reported along the way in no
    /// particular order.
    ///
    /// With zero workers nothing is consumed and no errors are returned.
    #[instrument(skip_all, fields(num_workers = num_workers))]
    pub async fn start<J, W>(
        ctx: &CancellationToken,
        jobs: mpsc::Receiver<J>,
        num_workers: usize,
        worker: Arc<W>,
    ) -> Vec<W::Error>
    where
        J: Send + 'static,
        W: Worker<J>,
    {
        let jobs = Arc::new(Mutex::new(jobs));
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();

        let handles: Vec<JoinHandle<()>> = (0..num_workers)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let jobs = jobs.clone();
                let worker = worker.clone();
                let err_tx = err_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = worker.start(&ctx, worker_id).await {
                        warn!(worker_id, "worker failed to start");
                        let _ = err_tx.send(e);
                        return;
                    }

                    loop {
                        let job = {
                            let mut rx = jobs.lock().await;
                            tokio::select! {
                                biased;
                                _ = ctx.cancelled() => None,
                                job = rx.recv() => job,
                            }
                        };
                        let Some(job) = job else {
                            break;
                        };
                        if let Err(e) = worker.work(&ctx, worker_id, job).await {
                            let _ = err_tx.send(e);
                        }
                    }
                    debug!(worker_id, "worker exiting");
                })
            })
            .collect();
        drop(err_tx);

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked");
            }
        }

        let mut errors = Vec::new();
        while let Ok(e) = err_rx.try_recv() {
            errors.push(e);
        }
        errors
    }
}
