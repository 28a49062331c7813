//! One TLS session with the hub and the task that reads from it.
//!
//! `Connection` owns the write half behind an async lock and a read task per
//! attached stream. The read task splits inbound frames in two: unsolicited
//! notifications go to the router channel, everything else to the
//! correlator. Each attach gets a fresh cancellation token and generation so
//! a stale read task can never clear the state of a newer session.
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{Frame, FrameCodec, FrameLayout};
use crate::config::HubConfig;
use crate::correlator::Correlator;
use crate::error::{HubError, Result};
use crate::messages::{CommandId, Notification};
use crate::router::{DisconnectReason, Router, RouterEvent};

pub mod tls;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Link flags shared with the read task.
#[derive(Debug, Default)]
struct LinkFlags {
    connected: AtomicBool,
    authenticated: AtomicBool,
    generation: AtomicU64,
}

pub struct Connection {
    link: Arc<LinkFlags>,
    correlator: Arc<Correlator>,
    router: Arc<Router>,
    writer: AsyncMutex<Option<FramedWrite<BoxedWriter, FrameCodec>>>,
    stop: Mutex<Option<CancellationToken>>,
    session: AtomicU16,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .field("generation", &self.link.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl Connection {
    pub fn new(correlator: Arc<Correlator>, router: Arc<Router>) -> Self {
        Self {
            link: Arc::new(LinkFlags::default()),
            correlator,
            router,
            writer: AsyncMutex::new(None),
            stop: Mutex::new(None),
            session: AtomicU16::new(rand::random()),
        }
    }

    /// Dials the hub and completes the TLS handshake within `dial_timeout`.
    /// Any previous session is closed first.
    ///
    /// # Errors
    /// `Config` for an unreadable CA file, `ConnectTimeout` when the deadline
    /// passes, `Io`/`Tls` for dial or handshake failures and `Cancelled` if
    /// [`Connection::disconnect`] runs while dialing.
    pub async fn connect(&self, config: &HubConfig) -> Result<()> {
        self.disconnect().await;
        let generation = self.link.generation.load(Ordering::Acquire);

        let tls_config = tls::client_config(&config.ca_cert_path)?;
        let address = config.address();
        debug!(%address, "dialing hub");
        let dial = async {
            let tcp = TcpStream::connect(&address).await?;
            tcp.set_nodelay(true)?;
            tls::handshake(tls_config, &config.host, tcp).await
        };
        let abort = CancellationToken::new();
        *self.stop.lock() = Some(abort.clone());
        let outcome = tokio::select! {
            biased;
            _ = abort.cancelled() => None,
            dialed = time::timeout(config.dial_timeout, dial) => Some(dialed),
        };
        let Some(dialed) = outcome else {
            debug!(%address, "disconnect requested while dialing");
            return Err(HubError::Cancelled);
        };
        let stream = dialed.map_err(|_| HubError::ConnectTimeout)??;

        if self.link.generation.load(Ordering::Acquire) != generation {
            debug!(%address, "disconnect requested while dialing");
            return Err(HubError::Cancelled);
        }
        info!(%address, "connected to hub");
        self.attach(stream, config.frame_layout).await;
        Ok(())
    }

    /// Adopts an established byte stream as the hub session and starts its
    /// read and dispatch tasks.
    pub async fn attach<S>(&self, stream: S, layout: FrameLayout)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half): (_, WriteHalf<S>) = tokio::io::split(stream);
        let token = CancellationToken::new();
        let generation = self.link.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(previous) = self.stop.lock().replace(token.clone()) {
            previous.cancel();
        }

        let writer: BoxedWriter = Box::new(write_half);
        *self.writer.lock().await = Some(FramedWrite::new(writer, FrameCodec::new(layout)));
        self.correlator.open();
        self.link.authenticated.store(false, Ordering::Release);
        self.link.connected.store(true, Ordering::Release);

        let (events, inbox) = mpsc::unbounded_channel();
        tokio::spawn(self.router.clone().run(inbox));
        tokio::spawn(read_loop(
            FramedRead::new(read_half, FrameCodec::new(layout)),
            token,
            self.link.clone(),
            self.correlator.clone(),
            events,
            generation,
        ));
    }

    /// Writes one frame. Callers hold the correlator turn while waiting for
    /// the reply.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(HubError::NotConnected)?;
        debug!(
            command = %CommandId::from(frame.command),
            len = frame.payload.len(),
            "sending frame"
        );
        if let Err(err) = sink.send(frame).await {
            warn!(error = %err, "write to hub failed");
            return Err(err.into());
        }
        Ok(())
    }

    /// Closes the session. Safe to call repeatedly and while a connect is in
    /// progress; the disconnect callback does not fire for this path.
    pub async fn disconnect(&self) {
        self.link.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(token) = self.stop.lock().take() {
            token.cancel();
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(err) = writer.close().await {
                debug!(error = %err, "error closing hub stream");
            }
        }
        self.link.authenticated.store(false, Ordering::Release);
        self.correlator.close();
        if self.link.connected.swap(false, Ordering::AcqRel) {
            info!("disconnected from hub");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_connected() && self.link.authenticated.load(Ordering::Acquire)
    }

    pub(crate) fn set_authenticated(&self, authenticated: bool) {
        self.link
            .authenticated
            .store(authenticated, Ordering::Release);
    }

    /// Next request session id; wraps at `u16::MAX`.
    pub fn next_session_id(&self) -> u16 {
        self.session.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(token) = self.stop.get_mut().take() {
            token.cancel();
        }
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, FrameCodec>,
    stop: CancellationToken,
    link: Arc<LinkFlags>,
    correlator: Arc<Correlator>,
    events: mpsc::UnboundedSender<RouterEvent>,
    generation: u64,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!(generation, "read loop stopped");
                return;
            }
            next = frames.next() => next,
        };
        match next {
            None => break DisconnectReason::PeerClosed,
            Some(Err(err)) => {
                error!(error = %err, "hub read failed");
                break DisconnectReason::ReadError(err.to_string());
            }
            Some(Ok(Err(err))) => warn!(error = %err, "dropping undecodable frame"),
            Some(Ok(Ok(frame))) => route(frame, &correlator, &events),
        }
    };

    debug!(generation, %reason, "read loop ended");
    // Cancelled or superseded sessions were closed explicitly.
    if stop.is_cancelled() || link.generation.load(Ordering::Acquire) != generation {
        return;
    }
    link.connected.store(false, Ordering::Release);
    link.authenticated.store(false, Ordering::Release);
    correlator.close();
    // Receiver is gone only when the dispatcher task was dropped with the runtime.
    let _ = events.send(RouterEvent::Disconnected(reason));
}

fn route(frame: Frame, correlator: &Correlator, events: &mpsc::UnboundedSender<RouterEvent>) {
    let command = CommandId::from(frame.command);
    if !command.is_unsolicited() {
        debug!(%command, len = frame.payload.len(), "reply frame");
        correlator.deliver(frame);
        return;
    }

    match Notification::parse(&frame) {
        Ok(Some(notification)) => {
            if matches!(notification, Notification::Limitation(_))
                && correlator.is_mirroring_limitations()
            {
                correlator.deliver(frame);
            }
            let _ = events.send(RouterEvent::Notification(notification));
        }
        Ok(None) => correlator.deliver(frame),
        Err(err) => warn!(%command, error = %err, "dropping malformed notification"),
    }
}
