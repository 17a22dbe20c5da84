//! Periodic polling of the health monitors.
//!
//! A [`Poller`] runs one [`Poll`] job on a single-shot timer: the timer is
//! armed only after the previous run finishes, so slow runs push the next
//! tick out instead of overlapping. Two jobs exist, one per monitor
//! document, each trying the configured monitors round-robin until one of
//! them serves a decodable document.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::catalog::{CacheStates, RoutingConfig};
use crate::metrics;
use crate::rebuild::Rebuilder;

/// Monitor path serving the routing config.
pub const ROUTING_CONFIG_PATH: &str = "/publish/CrConfig";
/// Monitor path serving the cache-state document.
pub const CACHE_STATES_PATH: &str = "/publish/CrStates";

/// Poller lifecycle errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    /// `start()` on a poller that is already running.
    #[error("already started")]
    AlreadyStarted,

    /// `stop()` on a poller that is not running.
    #[error("not started")]
    NotStarted,

    /// The poll interval is zero.
    #[error("no poll interval")]
    NoInterval,

    /// The poller has no job to run.
    #[error("no poll job")]
    NoCallback,
}

/// A unit of polling work, invoked once per tick.
#[async_trait]
pub trait Poll: Send + 'static {
    /// Run one poll cycle. Failures are the job's to log; the schedule
    /// does not care.
    async fn poll(&mut self);

    /// Reset any cursor state; called on every `start()`.
    fn reset(&mut self) {}
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<Box<dyn Poll>>,
}

/// Interval-driven executor for one [`Poll`] job.
pub struct Poller {
    interval: Duration,
    job: Option<Box<dyn Poll>>,
    running: Option<Running>,
}

impl Poller {
    /// Create a poller; it does nothing until started.
    pub fn new(interval: Duration, job: Box<dyn Poll>) -> Self {
        Self {
            interval,
            job: Some(job),
            running: None,
        }
    }

    /// Start ticking. The first run happens one interval from now.
    pub fn start(&mut self) -> Result<(), PollerError> {
        if self.running.is_some() {
            return Err(PollerError::AlreadyStarted);
        }
        if self.interval.is_zero() {
            return Err(PollerError::NoInterval);
        }
        let mut job = self.job.take().ok_or(PollerError::NoCallback)?;
        job.reset();

        let token = CancellationToken::new();
        let task_token = token.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = task_token.cancelled() => return job,

                    // Re-armed after each run, never concurrent with one.
                    _ = tokio::time::sleep(interval) => job.poll().await,
                }
            }
        });

        self.running = Some(Running { token, handle });
        Ok(())
    }

    /// Stop ticking. Returns once the running task has exited; no tick
    /// fires afterwards. The poller can be started again.
    pub async fn stop(&mut self) -> Result<(), PollerError> {
        let running = self.running.take().ok_or(PollerError::NotStarted)?;
        running.token.cancel();
        match running.handle.await {
            Ok(job) => self.job = Some(job),
            Err(e) => error!(error = %e, "poll task failed to shut down cleanly"),
        }
        Ok(())
    }
}

/// Fetch and decode one JSON document.
async fn fetch_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, reqwest::Error> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<T>()
        .await
}

/// Round-robin monitor cursor shared by both poll jobs.
struct MonitorRing {
    monitors: Vec<String>,
    current: usize,
}

impl MonitorRing {
    fn new(monitors: Vec<String>) -> Self {
        Self {
            monitors,
            current: 0,
        }
    }

    fn reset(&mut self) {
        self.current = 0;
    }

    /// Fetch `path` from the monitors in turn, starting at the cursor. The
    /// cursor advances past every attempt, so consecutive polls spread
    /// across monitors. Returns `None` once the whole list has failed.
    async fn fetch<T: DeserializeOwned>(
        &mut self,
        client: &reqwest::Client,
        path: &str,
        what: &str,
    ) -> Option<T> {
        if self.monitors.is_empty() {
            error!(what, "CRITICAL: no monitors, cannot poll");
            return None;
        }
        for _ in 0..self.monitors.len() {
            let monitor = self.monitors[self.current].clone();
            self.current = (self.current + 1) % self.monitors.len();
            let url = format!("http://{monitor}{path}");
            match fetch_json::<T>(client, &url).await {
                Ok(doc) => return Some(doc),
                Err(e) => {
                    warn!(what, monitor = %monitor, error = %e, "monitor fetch failed, trying next");
                }
            }
        }
        error!(what, "CRITICAL: all monitors failed, poll failed; trying again after interval");
        None
    }
}

/// Poll job refreshing the routing config.
pub struct RoutingConfigPoll {
    client: reqwest::Client,
    ring: MonitorRing,
    rebuilder: Arc<Rebuilder>,
}

impl RoutingConfigPoll {
    /// Create the job over the given monitor list.
    pub fn new(client: reqwest::Client, monitors: Vec<String>, rebuilder: Arc<Rebuilder>) -> Self {
        Self {
            client,
            ring: MonitorRing::new(monitors),
            rebuilder,
        }
    }
}

#[async_trait]
impl Poll for RoutingConfigPoll {
    fn reset(&mut self) {
        self.ring.reset();
    }

    async fn poll(&mut self) {
        let Some(doc) = self
            .ring
            .fetch::<RoutingConfig>(&self.client, ROUTING_CONFIG_PATH, "routing config")
            .await
        else {
            metrics::record_poll("routing_config", false);
            return;
        };
        match self.rebuilder.set_routing_config(doc) {
            Ok(()) => metrics::record_poll("routing_config", true),
            Err(e) => {
                error!(error = %e, "polled routing config rejected, keeping previous snapshot");
                metrics::record_poll("routing_config", false);
            }
        }
    }
}

/// Poll job refreshing the cache-state document.
pub struct CacheStatesPoll {
    client: reqwest::Client,
    ring: MonitorRing,
    rebuilder: Arc<Rebuilder>,
}

impl CacheStatesPoll {
    /// Create the job over the given monitor list.
    pub fn new(client: reqwest::Client, monitors: Vec<String>, rebuilder: Arc<Rebuilder>) -> Self {
        Self {
            client,
            ring: MonitorRing::new(monitors),
            rebuilder,
        }
    }
}

#[async_trait]
impl Poll for CacheStatesPoll {
    fn reset(&mut self) {
        self.ring.reset();
    }

    async fn poll(&mut self) {
        let Some(doc) = self
            .ring
            .fetch::<CacheStates>(&self.client, CACHE_STATES_PATH, "cache states")
            .await
        else {
            metrics::record_poll("cache_states", false);
            return;
        };
        match self.rebuilder.set_cache_states(doc) {
            Ok(()) => metrics::record_poll("cache_states", true),
            Err(e) => {
                error!(error = %e, "polled cache states rejected, keeping previous snapshot");
                metrics::record_poll("cache_states", false);
            }
        }
    }
}
