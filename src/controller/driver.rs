// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

//! Runs reconciliation passes in the background.
//!
//! The driver keeps a queue of scans to reconcile. A scan is enqueued when it is triggered via
//! [DriverHandle::trigger], when a previous pass asked for it or on each resync in which every
//! known scan is enqueued. Passes of different scans run concurrently up to
//! `max_concurrent_reconciles`; a scan is never reconciled twice at the same time. A trigger
//! for a scan that is currently reconciled is remembered and handled after the running pass.

use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Duration,
};

use futures::FutureExt;
use tokio::{
    sync::{Semaphore, mpsc, watch},
    task::{AbortHandle, JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tracing::Instrument;

use super::{Error, ErrorKind, Outcome, Reconciler};
use crate::{
    cluster::{ClusterError, NodeResolver, PodClient, PodFactory, StatusStore},
    models::{ScanId, ScanStatus},
};

// tokio intervals must not be zero
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Delay before retrying a pass that failed with a transient error
    pub error_backoff: Duration,
    /// Delay before retrying a pass that the cluster permanently refused
    pub permanent_error_backoff: Duration,
    /// Interval in which all known scans are enqueued
    pub resync_interval: Duration,
    pub max_concurrent_reconciles: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            error_backoff: Duration::from_secs(5),
            permanent_error_backoff: Duration::from_secs(60),
            resync_interval: Duration::from_secs(30),
            max_concurrent_reconciles: 4,
        }
    }
}

pub struct Driver<R, P, F: ?Sized, S> {
    reconciler: Arc<Reconciler<R, P, F>>,
    store: Arc<S>,
    settings: Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("driver is stopped")]
pub struct Stopped;

/// Controls a running [Driver].
pub struct DriverHandle {
    sender: mpsc::Sender<ScanId>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Enqueues the scan for reconciliation.
    pub async fn trigger(&self, id: ScanId) -> Result<(), Stopped> {
        self.sender.send(id).await.map_err(|_| Stopped)
    }

    /// Cancels all running passes and waits for the driver to stop.
    pub async fn shutdown(self) {
        // an error means that the loop is already gone
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "Driver did not stop cleanly");
        }
    }
}

#[derive(Default)]
struct Queue {
    in_flight: HashSet<ScanId>,
    // triggered while in flight
    dirty: HashSet<ScanId>,
    passes: JoinSet<(ScanId, Outcome)>,
    timers: JoinSet<ScanId>,
    delayed: HashMap<ScanId, AbortHandle>,
}

impl Queue {
    fn cancel_delay(&mut self, id: &ScanId) {
        if let Some(handle) = self.delayed.remove(id) {
            handle.abort();
        }
    }

    fn delay(&mut self, id: ScanId, duration: Duration) {
        self.cancel_delay(&id);
        let key = id.clone();
        let handle = self.timers.spawn(async move {
            tokio::time::sleep(duration).await;
            id
        });
        self.delayed.insert(key, handle);
    }
}

impl<R, P, F, S> Driver<R, P, F, S>
where
    R: NodeResolver + Send + Sync + 'static,
    P: PodClient + Send + Sync + 'static,
    F: PodFactory + Send + Sync + ?Sized + 'static,
    S: StatusStore + Send + Sync + 'static,
{
    pub fn new(reconciler: Reconciler<R, P, F>, store: Arc<S>, settings: Settings) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            store,
            settings,
        }
    }

    /// Starts the driver loop on the current runtime.
    pub fn start(self) -> DriverHandle {
        let (sender, receiver) = mpsc::channel(100);
        let (shutdown, shutdown_receiver) = watch::channel(false);
        let driver = Arc::new(self);
        let task = tokio::spawn(driver.run(receiver, shutdown_receiver));
        DriverHandle {
            sender,
            shutdown,
            task,
        }
    }

    async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<ScanId>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_reconciles.max(1)));
        let mut queue = Queue::default();
        let mut interval = tokio::time::interval(self.settings.resync_interval.max(MIN_INTERVAL));
        // On a missed tick wait for the next interval instead of bursting resyncs.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            max_concurrent_reconciles = self.settings.max_concurrent_reconciles,
            "Driver started"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    break;
                }
                Some(id) = receiver.recv() => {
                    self.schedule(&mut queue, &permits, id);
                }
                Some(finished) = queue.passes.join_next() => {
                    match finished {
                        Ok((id, outcome)) => self.finished(&mut queue, &permits, id, outcome),
                        Err(error) => tracing::warn!(%error, "Reconciliation task vanished"),
                    }
                }
                Some(Ok(id)) = queue.timers.join_next() => {
                    queue.delayed.remove(&id);
                    self.schedule(&mut queue, &permits, id);
                }
                _ = interval.tick() => {
                    self.resync(&mut queue, &permits).await;
                }
            }
        }
        let cancelled = queue.passes.len();
        queue.timers.abort_all();
        queue.passes.abort_all();
        while queue.passes.join_next().await.is_some() {}
        tracing::info!(cancelled, "Driver stopped");
    }

    async fn resync(self: &Arc<Self>, queue: &mut Queue, permits: &Arc<Semaphore>) {
        match self.store.list().await {
            Ok(ids) => {
                tracing::trace!(scans = ids.len(), "Resync");
                for id in ids {
                    self.schedule(queue, permits, id);
                }
            }
            Err(error) => tracing::warn!(%error, "Unable to list scans for resync"),
        }
    }

    fn schedule(self: &Arc<Self>, queue: &mut Queue, permits: &Arc<Semaphore>, id: ScanId) {
        if queue.in_flight.contains(&id) {
            queue.dirty.insert(id);
            return;
        }
        queue.cancel_delay(&id);
        queue.in_flight.insert(id.clone());
        let driver = self.clone();
        let permits = permits.clone();
        let span = tracing::info_span!("reconcile", scan = %id);
        queue.passes.spawn(
            async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let outcome = match AssertUnwindSafe(driver.pass(&id)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::error!("Reconciliation panicked");
                        Outcome::RequeueAfter(driver.settings.error_backoff)
                    }
                };
                (id, outcome)
            }
            .instrument(span),
        );
    }

    fn finished(
        self: &Arc<Self>,
        queue: &mut Queue,
        permits: &Arc<Semaphore>,
        id: ScanId,
        outcome: Outcome,
    ) {
        queue.in_flight.remove(&id);
        let dirty = queue.dirty.remove(&id);
        match outcome {
            Outcome::Requeue => self.schedule(queue, permits, id),
            _ if dirty => self.schedule(queue, permits, id),
            Outcome::RequeueAfter(duration) => queue.delay(id, duration),
            Outcome::AwaitChange => {}
        }
    }

    /// Runs a single pass: fetch, reconcile and persist the new status.
    ///
    /// Errors are handled here and turned into the outcome deciding the next attempt.
    pub async fn pass(&self, id: &ScanId) -> Outcome {
        match self.try_pass(id).await {
            Ok(outcome) => outcome,
            Err(error) => self.on_error(id, error).await,
        }
    }

    async fn try_pass(&self, id: &ScanId) -> Result<Outcome, Error> {
        let Some(stored) = self.store.fetch(id).await? else {
            tracing::debug!("Scan is gone");
            return Ok(Outcome::AwaitChange);
        };
        let mut scan = stored.scan;
        let before = scan.status.clone();
        let outcome = self.reconciler.reconcile(&mut scan).await?;
        if scan.status != before {
            self.persist(id, &stored.version, &scan.status).await?;
            tracing::debug!(phase = %scan.status.phase, "Stored status");
        }
        Ok(outcome)
    }

    async fn persist(&self, id: &ScanId, version: &str, status: &ScanStatus) -> Result<(), Error> {
        match self.store.persist(id, version, status).await {
            Ok(_) => Ok(()),
            Err(ClusterError::Conflict(_)) => Err(Error::Conflict(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn on_error(&self, id: &ScanId, error: Error) -> Outcome {
        match error.kind() {
            ErrorKind::Conflict => {
                tracing::debug!(%error, "Retrying with a fresh copy");
                Outcome::Requeue
            }
            ErrorKind::Transient => {
                tracing::warn!(%error, retry_in = ?self.settings.error_backoff, "Unable to reconcile");
                Outcome::RequeueAfter(self.settings.error_backoff)
            }
            ErrorKind::Validation => {
                tracing::warn!(%error, "Unable to reconcile, waiting for a change of the scan");
                self.record_error(id, &error).await;
                Outcome::AwaitChange
            }
            ErrorKind::Permanent => {
                tracing::warn!(%error, retry_in = ?self.settings.permanent_error_backoff, "Unable to reconcile");
                self.record_error(id, &error).await;
                Outcome::RequeueAfter(self.settings.permanent_error_backoff)
            }
        }
    }

    /// Stores the error within the status without changing the phase.
    async fn record_error(&self, id: &ScanId, error: &Error) {
        let message = error.to_string();
        let stored = match self.store.fetch(id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(%error, "Unable to fetch scan to record error");
                return;
            }
        };
        if stored.scan.status.error.as_ref() == Some(&message) {
            return;
        }
        let status = ScanStatus {
            error: Some(message),
            ..stored.scan.status
        };
        if let Err(error) = self.store.persist(id, &stored.version, &status).await {
            tracing::warn!(%error, "Unable to record error");
        }
    }
}
