//! Keeps the hub link up.
//!
//! The supervisor runs the connect, authenticate, enumerate sequence once at
//! start and then drives two fixed-interval tasks: reconnect while the link
//! is down and re-enumerate while it is up. Sequences never overlap; a tick
//! that finds one running skips its turn.
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{HubError, Result};

/// Operations the supervisor needs from a hub client.
#[async_trait]
pub trait HubLink: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn authenticate(&self) -> Result<()>;
    /// Re-reads the node table, returning the node count.
    async fn enumerate_nodes(&self) -> Result<usize>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn is_authenticated(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Authenticating => "authenticating",
            LinkState::Ready => "ready",
        };
        f.write_str(label)
    }
}

struct Shared<L> {
    link: Arc<L>,
    config: SupervisorConfig,
    state: RwLock<LinkState>,
    sequence: AsyncMutex<()>,
}

impl<L: HubLink> Shared<L> {
    fn set_state(&self, next: LinkState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "link state changed");
        }
    }

    /// Current state, downgraded to `Disconnected` once the link has dropped
    /// underneath a `Ready` session.
    fn observe(&self) -> LinkState {
        let mut state = self.state.write();
        if *state == LinkState::Ready && !self.link.is_authenticated() {
            info!("hub link lost");
            *state = LinkState::Disconnected;
        }
        *state
    }

    /// Caller holds `sequence`.
    async fn run_sequence_locked(&self) -> Result<usize> {
        let steps = async {
            self.set_state(LinkState::Connecting);
            self.link.connect().await?;
            self.set_state(LinkState::Authenticating);
            self.link.authenticate().await?;
            match self.link.enumerate_nodes().await {
                Ok(count) => Ok(count),
                Err(err) if err.is_transport() => Err(err),
                Err(err) => {
                    warn!(error = %err, "initial enumeration failed, next refresh retries");
                    Ok(0)
                }
            }
        };
        let outcome = match time::timeout(self.config.sequence_timeout, steps).await {
            Ok(outcome) => outcome,
            Err(_) => Err(HubError::ConnectTimeout),
        };

        match outcome {
            Ok(count) => {
                self.set_state(LinkState::Ready);
                info!(nodes = count, "hub link ready");
                Ok(count)
            }
            Err(err) => {
                self.link.disconnect().await;
                self.set_state(LinkState::Disconnected);
                Err(err)
            }
        }
    }

    async fn refresh_locked(&self) {
        match self.link.enumerate_nodes().await {
            Ok(count) => debug!(nodes = count, "periodic node refresh complete"),
            Err(err) if err.is_transport() => {
                warn!(error = %err, "node refresh lost the link");
                self.link.disconnect().await;
                self.set_state(LinkState::Disconnected);
            }
            Err(err) if err.is_timeout() => {
                warn!(error = %err, "node refresh timed out, keeping cached nodes")
            }
            Err(err) => warn!(error = %err, "node refresh failed, keeping cached nodes"),
        }
    }
}

/// Owns the reconnect and refresh tasks for one [`HubLink`].
pub struct Supervisor<L> {
    shared: Arc<Shared<L>>,
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl<L> fmt::Debug for Supervisor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &*self.shared.state.read())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl<L: HubLink + 'static> Supervisor<L> {
    pub fn new(link: Arc<L>, config: SupervisorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                link,
                config,
                state: RwLock::new(LinkState::Disconnected),
                sequence: AsyncMutex::new(()),
            }),
            stop: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.observe()
    }

    /// Runs the first connect sequence and starts the periodic tasks.
    ///
    /// A failed first attempt is returned to the caller, but the tasks are
    /// started regardless and keep retrying. Later calls behave like
    /// [`Supervisor::connect`] and leave a ready link up.
    pub async fn start(&self) -> Result<usize> {
        let initial = self.connect().await;
        if let Err(err) = &initial {
            warn!(error = %err, "initial hub connection failed, retrying in background");
        }
        if !self.started.swap(true, Ordering::AcqRel) && !self.stopped.load(Ordering::Acquire) {
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(reconnect_loop(
                self.shared.clone(),
                self.stop.clone(),
            )));
            tasks.push(tokio::spawn(refresh_loop(
                self.shared.clone(),
                self.stop.clone(),
            )));
        }
        initial
    }

    /// Runs the connect sequence now. An already ready link is only
    /// re-enumerated.
    pub async fn connect(&self) -> Result<usize> {
        let _sequence = self.shared.sequence.lock().await;
        if self.shared.observe() == LinkState::Ready {
            return self.shared.link.enumerate_nodes().await;
        }
        self.shared.run_sequence_locked().await
    }

    /// Drops the link. The reconnect task brings it back on its next tick.
    pub async fn disconnect(&self) {
        let _sequence = self.shared.sequence.lock().await;
        self.shared.link.disconnect().await;
        self.shared.set_state(LinkState::Disconnected);
    }

    /// Forces a disconnect and runs the full sequence, returning its outcome.
    pub async fn reconnect(&self) -> Result<usize> {
        let _sequence = self.shared.sequence.lock().await;
        info!("manual reconnect requested");
        self.shared.link.disconnect().await;
        self.shared.set_state(LinkState::Disconnected);
        self.shared.run_sequence_locked().await
    }

    /// Stops both tasks, waits up to `shutdown_timeout` for them, then
    /// disconnects. Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if time::timeout(self.shared.config.shutdown_timeout, join_all(handles))
            .await
            .is_err()
        {
            warn!("supervisor tasks did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        self.shared.link.disconnect().await;
        self.shared.set_state(LinkState::Disconnected);
        info!("supervisor stopped");
    }
}

fn ticker(period: std::time::Duration) -> time::Interval {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn reconnect_loop<L: HubLink>(shared: Arc<Shared<L>>, stop: CancellationToken) {
    let mut ticker = ticker(shared.config.reconnect_interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if shared.observe() != LinkState::Disconnected {
            continue;
        }
        let Ok(_sequence) = shared.sequence.try_lock() else {
            continue;
        };
        info!("attempting hub reconnect");
        tokio::select! {
            _ = stop.cancelled() => break,
            outcome = shared.run_sequence_locked() => {
                if let Err(err) = outcome {
                    warn!(error = %err, "reconnect failed, retrying next tick");
                }
            }
        }
    }
    debug!("reconnect task stopped");
}

async fn refresh_loop<L: HubLink>(shared: Arc<Shared<L>>, stop: CancellationToken) {
    let mut ticker = ticker(shared.config.refresh_interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if shared.observe() != LinkState::Ready {
            continue;
        }
        let Ok(_sequence) = shared.sequence.try_lock() else {
            continue;
        };
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = shared.refresh_locked() => {}
        }
    }
    debug!("refresh task stopped");
}
