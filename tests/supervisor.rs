use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use klf_hub::{HubError, HubLink, LinkState, Result, Supervisor, SupervisorConfig};

/// Link double that records any call made in the wrong state.
#[derive(Default)]
struct RecordingLink {
    up: AtomicBool,
    refuse_connect: AtomicBool,
    connects: AtomicUsize,
    enumerations: AtomicUsize,
    connect_while_up: AtomicUsize,
    enumerate_while_down: AtomicUsize,
}

#[async_trait]
impl HubLink for RecordingLink {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            self.connect_while_up.fetch_add(1, Ordering::SeqCst);
        }
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(HubError::ConnectTimeout);
        }
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    async fn enumerate_nodes(&self) -> Result<usize> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        if !self.up.load(Ordering::SeqCst) {
            self.enumerate_while_down.fetch_add(1, Ordering::SeqCst);
            return Err(HubError::NotConnected);
        }
        Ok(3)
    }

    async fn disconnect(&self) {
        self.up.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    fn is_authenticated(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        reconnect_interval: Duration::from_secs(30),
        refresh_interval: Duration::from_secs(45),
        ..SupervisorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn ticks_respect_link_state() {
    let link = Arc::new(RecordingLink::default());
    let supervisor = Supervisor::new(link.clone(), config());
    assert_eq!(supervisor.start().await.unwrap(), 3);
    assert_eq!(supervisor.state(), LinkState::Ready);

    // Ready for several reconnect periods: refresh runs, reconnect does not.
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(link.connects.load(Ordering::SeqCst), 1);
    assert!(link.enumerations.load(Ordering::SeqCst) >= 4);

    // Down and refusing: reconnect retries, refresh stays quiet.
    link.refuse_connect.store(true, Ordering::SeqCst);
    link.up.store(false, Ordering::SeqCst);
    let enumerations = link.enumerations.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(supervisor.state(), LinkState::Disconnected);
    assert!(link.connects.load(Ordering::SeqCst) >= 6);
    assert_eq!(link.enumerations.load(Ordering::SeqCst), enumerations);

    // Hub is back: next reconnect tick restores the link.
    link.refuse_connect.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(supervisor.state(), LinkState::Ready);

    assert_eq!(link.connect_while_up.load(Ordering::SeqCst), 0);
    assert_eq!(link.enumerate_while_down.load(Ordering::SeqCst), 0);
    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_reconnect_reports_outcome() {
    let link = Arc::new(RecordingLink::default());
    let supervisor = Supervisor::new(link.clone(), config());
    supervisor.start().await.unwrap();

    assert_eq!(supervisor.reconnect().await.unwrap(), 3);
    assert_eq!(link.connects.load(Ordering::SeqCst), 2);
    assert_eq!(link.connect_while_up.load(Ordering::SeqCst), 0);

    link.refuse_connect.store(true, Ordering::SeqCst);
    assert!(supervisor.reconnect().await.is_err());
    assert_eq!(supervisor.state(), LinkState::Disconnected);
    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_ticks_and_disconnects() {
    let link = Arc::new(RecordingLink::default());
    link.refuse_connect.store(true, Ordering::SeqCst);
    let supervisor = Supervisor::new(link.clone(), config());
    assert!(supervisor.start().await.is_err());

    supervisor.shutdown().await;
    let connects = link.connects.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(link.connects.load(Ordering::SeqCst), connects);
    assert!(!link.is_connected());
    supervisor.shutdown().await;
}
