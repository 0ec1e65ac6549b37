/*
 * vFilter mail filtering relay
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! A pool of tasks fed by a bounded queue.
//!
//! The number of workers moves between `min_workers` and `max_workers`: a
//! scaler checks the queue every `scale_interval`, spawns workers while
//! items wait for them, and retires idle workers when the queue is empty.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use vfilter_config::FieldPerformance;

/// Processing of the items submitted to an [`Executor`].
#[async_trait::async_trait]
pub trait Worker<T>: Send + Sync + 'static {
    /// Process an item.
    async fn handle(&self, item: T);

    /// The pool is shutting down and `item` will never be processed.
    async fn refuse(&self, item: T);
}

enum Job<T> {
    Work(T),
    Poison,
}

/// State of the pool at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStatus {
    /// Running workers.
    pub workers: usize,
    /// Workers waiting for an item.
    pub idle: usize,
    /// Items waiting for a worker.
    pub queued: usize,
    ///
    pub min_workers: usize,
    ///
    pub max_workers: usize,
}

struct Shared<T, W> {
    worker: std::sync::Arc<W>,
    receiver: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<Job<T>>>,
    tasks: std::sync::Mutex<tokio::task::JoinSet<()>>,
    workers: AtomicUsize,
    idle: AtomicUsize,
    queued: AtomicUsize,
    shutting_down: AtomicBool,
    min_workers: usize,
    max_workers: usize,
}

impl<T: Send + 'static, W: Worker<T>> Shared<T, W> {
    fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            workers: self.workers.load(Ordering::SeqCst),
            idle: self.idle.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            min_workers: self.min_workers,
            max_workers: self.max_workers,
        }
    }

    fn spawn_worker(self: &std::sync::Arc<Self>) {
        self.workers.fetch_add(1, Ordering::SeqCst);
        let shared = self.clone();
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .spawn(async move { shared.work().await });
    }

    async fn work(self: std::sync::Arc<Self>) {
        loop {
            self.idle.fetch_add(1, Ordering::SeqCst);
            let job = self.receiver.lock().await.recv().await;
            self.idle.fetch_sub(1, Ordering::SeqCst);

            match job {
                Some(Job::Work(item)) => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    if self.shutting_down.load(Ordering::SeqCst) {
                        self.worker.refuse(item).await;
                    } else {
                        self.worker.handle(item).await;
                    }
                }
                Some(Job::Poison) | None => break,
            }
        }
        self.workers.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!("Worker retired.");
    }

    fn scale(self: &std::sync::Arc<Self>, sender: &tokio::sync::mpsc::Sender<Job<T>>) {
        let status = self.status();
        if status.queued > status.idle && status.workers < status.max_workers {
            let count = (status.queued - status.idle).min(status.max_workers - status.workers);
            tracing::debug!(?status, count, "Spawning workers.");
            for _ in 0..count {
                self.spawn_worker();
            }
        } else if status.queued == 0 && status.idle > 0 && status.workers > status.min_workers {
            tracing::debug!(?status, "Retiring an idle worker.");
            // a full queue means the worker is not idle anymore
            let _full = sender.try_send(Job::Poison);
        }
    }
}

/// Bounded queue of items, processed by a pool of tasks.
pub struct Executor<T, W> {
    sender: tokio::sync::mpsc::Sender<Job<T>>,
    shared: std::sync::Arc<Shared<T, W>>,
    scaler: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<T, W> std::fmt::Debug for Executor<T, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.shared.workers)
            .field("queued", &self.shared.queued)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static, W: Worker<T>> Executor<T, W> {
    /// Spawn `min_workers` workers and the scaler.
    ///
    /// Must be called from a tokio runtime.
    #[must_use]
    pub fn start(worker: std::sync::Arc<W>, performance: &FieldPerformance) -> Self {
        let (sender, receiver) = tokio::sync::mpsc::channel(performance.backlog.max(1));
        let shared = std::sync::Arc::new(Shared {
            worker,
            receiver: tokio::sync::Mutex::new(receiver),
            tasks: std::sync::Mutex::new(tokio::task::JoinSet::new()),
            workers: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            min_workers: performance.min_workers,
            max_workers: performance.max_workers.max(performance.min_workers).max(1),
        });

        for _ in 0..performance.min_workers {
            shared.spawn_worker();
        }

        let scaler = {
            let (shared, sender) = (shared.clone(), sender.clone());
            let period = performance.scale_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    shared.scale(&sender);
                }
            })
        };

        tracing::debug!(
            min = performance.min_workers,
            max = performance.max_workers,
            backlog = performance.backlog,
            "Executor started."
        );

        Self {
            sender,
            shared,
            scaler: std::sync::Mutex::new(Some(scaler)),
        }
    }

    /// Queue an item, waits while the queue is full.
    pub async fn submit(&self, item: T) {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            self.shared.worker.refuse(item).await;
            return;
        }

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if let Err(tokio::sync::mpsc::error::SendError(job)) =
            self.sender.send(Job::Work(item)).await
        {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            if let Job::Work(item) = job {
                self.shared.worker.refuse(item).await;
            }
        }
    }

    ///
    #[must_use]
    pub fn status(&self) -> ExecutorStatus {
        self.shared.status()
    }

    /// Stop the pool: the items being processed are completed, the queued
    /// ones are refused.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        let scaler = self
            .scaler
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(scaler) = scaler {
            scaler.abort();
            if let Err(e) = scaler.await {
                if !e.is_cancelled() {
                    tracing::error!(%e, "Scaler failed.");
                }
            }
        }

        let workers = self.shared.workers.load(Ordering::SeqCst);
        tracing::info!(workers, queued = self.shared.queued.load(Ordering::SeqCst), "Stopping the workers.");
        for _ in 0..workers {
            if self.sender.send(Job::Poison).await.is_err() {
                break;
            }
        }

        let mut tasks = std::mem::take(
            &mut *self
                .shared
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(%e, "Worker failed.");
            }
        }

        let mut receiver = self.shared.receiver.lock().await;
        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            if let Job::Work(item) = job {
                self.shared.worker.refuse(item).await;
            }
        }
    }
}
