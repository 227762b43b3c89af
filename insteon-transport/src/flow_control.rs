//! Flow-control transport layer (the modem correlation queue)
//!
//! `FlowControlTransport` wraps a raw `Transport` (which only writes frames
//! and broadcasts decoded packets) and adds request semantics: a single
//! ordered worker, echo matching with a local deadline, an optional second
//! wait for a downstream packet, and a cooldown between commands.
//!
//! ```text
//! [SerialTransport / MockTransport]   ← implements Transport (raw I/O)
//!                |
//!       [FlowControlTransport]        ← echo matching, deadlines, cooldown
//!                |
//!   [ModemInterface / DeviceQueue]
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::command::{CommandFrame, ModemCommand, ModemResponse, ParseError};
use crate::error::TransportError;
use crate::packet::{InboundPacket, PacketType};
use crate::protocol::{cmd, timing as defaults};
use crate::router::{PacketFilter, PacketRouter};
use crate::types::PortInfo;
use crate::Transport;

// ============================================================================
// Timing
// ============================================================================

/// Deadlines, cooldowns and retry counts, in milliseconds.
///
/// Hardware revisions disagree on settle times, so every value is overridable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub local_timeout_ms: u64,
    pub remote_timeout_ms: u64,
    pub gateway_cooldown_ms: u64,
    pub device_cooldown_ms: u64,
    pub extended_cooldown_ms: u64,
    pub device_retries: u32,
    /// Re-sends of a modem request answered with a lone busy NAK
    pub busy_retries: u32,
    pub link_settle_ms: u64,
    pub link_complete_timeout_ms: u64,
    pub resolve_timeout_ms: u64,
    pub wake_settle_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            local_timeout_ms: defaults::LOCAL_TIMEOUT_MS,
            remote_timeout_ms: defaults::REMOTE_TIMEOUT_MS,
            gateway_cooldown_ms: defaults::GATEWAY_COOLDOWN_MS,
            device_cooldown_ms: defaults::DEVICE_COOLDOWN_MS,
            extended_cooldown_ms: defaults::EXTENDED_COOLDOWN_MS,
            device_retries: defaults::DEVICE_RETRIES,
            busy_retries: defaults::BUSY_RETRIES,
            link_settle_ms: defaults::LINK_SETTLE_MS,
            link_complete_timeout_ms: defaults::LINK_COMPLETE_TIMEOUT_MS,
            resolve_timeout_ms: defaults::RESOLVE_TIMEOUT_MS,
            wake_settle_ms: defaults::WAKE_SETTLE_MS,
        }
    }
}

impl Timing {
    pub fn local_timeout(&self) -> Duration {
        Duration::from_millis(self.local_timeout_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn gateway_cooldown(&self) -> Duration {
        Duration::from_millis(self.gateway_cooldown_ms)
    }

    /// Device settle delay after a standard or extended command
    pub fn device_cooldown(&self, extended: bool) -> Duration {
        Duration::from_millis(if extended {
            self.extended_cooldown_ms
        } else {
            self.device_cooldown_ms
        })
    }

    pub fn link_settle(&self) -> Duration {
        Duration::from_millis(self.link_settle_ms)
    }

    pub fn link_complete_timeout(&self) -> Duration {
        Duration::from_millis(self.link_complete_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn wake_settle(&self) -> Duration {
        Duration::from_millis(self.wake_settle_ms)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A frame plus everything the worker needs to resolve it
#[derive(Debug, Clone)]
pub struct Request {
    frame: CommandFrame,
    /// `None` for fire-and-forget frames (the wake byte)
    echo: Option<PacketFilter>,
    reply: Option<PacketFilter>,
    local_timeout: Option<Duration>,
    remote_timeout: Option<Duration>,
    cooldown: Option<Duration>,
}

impl Request {
    /// Request that waits for the echo of the frame's opcode (or a busy NAK)
    pub fn new(frame: CommandFrame) -> Self {
        let echo = frame
            .opcode()
            .map(|op| PacketFilter::echo(op).or_type(PacketType::Busy));
        Self {
            frame,
            echo,
            reply: None,
            local_timeout: None,
            remote_timeout: None,
            cooldown: None,
        }
    }

    /// Write the frame and do not wait for an echo
    pub fn fire_and_forget(frame: CommandFrame) -> Self {
        Self {
            echo: None,
            ..Self::new(frame)
        }
    }

    /// Replace the default echo matcher
    pub fn with_echo(mut self, filter: PacketFilter) -> Self {
        self.echo = Some(filter);
        self
    }

    /// After a good echo, also wait for a packet matching `filter`
    pub fn with_reply(mut self, filter: PacketFilter) -> Self {
        self.reply = Some(filter);
        self
    }

    pub fn with_local_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeout = Some(timeout);
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = Some(timeout);
        self
    }

    /// Override the cooldown applied after this request succeeds
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn frame(&self) -> &CommandFrame {
        &self.frame
    }
}

/// Outcome of a resolved request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Modem echo; `None` only for fire-and-forget requests
    pub echo: Option<InboundPacket>,
    /// Downstream packet, when the request asked for one
    pub reply: Option<InboundPacket>,
}

struct CommandRequest {
    request: Request,
    response_tx: oneshot::Sender<Result<Exchange, TransportError>>,
}

// ============================================================================
// FlowControlTransport
// ============================================================================

/// The modem-level correlation queue.
///
/// Tasks execute strictly in submission order, one at a time. Must be
/// created inside a tokio runtime: the worker and the packet pump are tokio
/// tasks.
pub struct FlowControlTransport {
    inner: Arc<dyn Transport>,
    router: PacketRouter,
    timing: Timing,
    request_tx: mpsc::Sender<CommandRequest>,
    pending: Arc<AtomicUsize>,
    pump: JoinHandle<()>,
}

impl FlowControlTransport {
    pub fn new(inner: Arc<dyn Transport>, timing: Timing) -> Self {
        let router = PacketRouter::new();
        let pending = Arc::new(AtomicUsize::new(0));

        let pump = tokio::spawn(packet_pump(inner.subscribe_packets(), router.clone()));

        let (request_tx, request_rx) = mpsc::channel(defaults::REQUEST_QUEUE_SIZE);
        tokio::spawn(correlation_worker(
            Arc::clone(&inner),
            router.clone(),
            timing.clone(),
            request_rx,
            Arc::clone(&pending),
        ));

        Self {
            inner,
            router,
            timing,
            request_tx,
            pending,
            pump,
        }
    }

    /// Access the wrapped raw transport.
    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }

    /// Router fed with every inbound packet
    pub fn router(&self) -> &PacketRouter {
        &self.router
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn port_info(&self) -> &PortInfo {
        self.inner.port_info()
    }

    /// Tasks submitted but not yet resolved
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Enqueue a request and wait for its resolution
    pub async fn submit(&self, request: Request) -> Result<Exchange, TransportError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self
            .request_tx
            .send(CommandRequest {
                request,
                response_tx,
            })
            .await
            .is_err()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Disconnected);
        }

        response_rx
            .await
            .map_err(|_| TransportError::Disconnected)?
    }

    /// Submit a frame and return the modem echo
    pub async fn send_frame(&self, frame: CommandFrame) -> Result<InboundPacket, TransportError> {
        let opcode = frame.opcode().unwrap_or(0);
        self.submit(Request::new(frame))
            .await?
            .echo
            .ok_or_else(|| {
                TransportError::Internal(format!("no echo recorded for opcode 0x{opcode:02X}"))
            })
    }

    /// Send a typed command and return the modem echo
    pub async fn send<C: ModemCommand>(&self, command: &C) -> Result<InboundPacket, TransportError> {
        self.send_frame(command.build()).await
    }

    /// Send a typed command and parse the data carried in its echo
    pub async fn query<C, R>(&self, command: &C) -> Result<R, TransportError>
    where
        C: ModemCommand,
        R: ModemResponse,
    {
        let echo = self.send(command).await?;
        let echo = echo.as_echo().ok_or_else(|| {
            TransportError::Internal(format!("expected echo, got {:?}", echo.packet_type()))
        })?;
        R::parse(echo).map_err(|e: ParseError| TransportError::Internal(e.to_string()))
    }
}

impl Drop for FlowControlTransport {
    fn drop(&mut self) {
        self.pump.abort();
        debug!(
            "FlowControlTransport dropping with {} pending request(s)",
            self.pending()
        );
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Forward every packet from the raw transport into the router
async fn packet_pump(mut rx: broadcast::Receiver<crate::TimestampedPacket>, router: PacketRouter) {
    loop {
        match rx.recv().await {
            Ok(tp) => {
                let n = router.dispatch(&tp.packet);
                trace!("Dispatched {:?} to {} listener(s)", tp.packet.packet_type(), n);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Packet pump lagged, {} packet(s) dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Packet pump stopped");
}

async fn correlation_worker(
    inner: Arc<dyn Transport>,
    router: PacketRouter,
    timing: Timing,
    mut rx: mpsc::Receiver<CommandRequest>,
    pending: Arc<AtomicUsize>,
) {
    debug!("Correlation worker started");

    while let Some(req) = rx.recv().await {
        let result = execute(&inner, &router, &timing, &req.request).await;
        let cooldown = match (&result, req.request.echo.is_some()) {
            (Err(_), _) => None,
            (Ok(_), false) => Some(req.request.cooldown.unwrap_or(timing.wake_settle())),
            (Ok(_), true) => Some(req.request.cooldown.unwrap_or(timing.gateway_cooldown())),
        };

        pending.fetch_sub(1, Ordering::SeqCst);
        let _ = req.response_tx.send(result);

        if let Some(d) = cooldown.filter(|d| !d.is_zero()) {
            tokio::time::sleep(d).await;
        }
    }

    debug!("Correlation worker stopped");
}

async fn execute(
    inner: &Arc<dyn Transport>,
    router: &PacketRouter,
    timing: &Timing,
    req: &Request,
) -> Result<Exchange, TransportError> {
    let opcode = req.frame.opcode().unwrap_or(0);

    // Listeners go in before the write so a fast reply cannot slip past
    let mut echo_rx = req.echo.clone().map(|f| router.once(f));
    let mut reply_rx = req.reply.clone().map(|f| router.once(f));

    debug!("→ {}", req.frame);
    if let Err(e) = inner.write_frame(req.frame.as_bytes()).await {
        warn!("Write of {} failed: {}", cmd::name(opcode), e);
        return Err(TransportError::WriteFailed(e.to_string()));
    }

    let Some(echo_rx) = echo_rx.as_mut() else {
        return Ok(Exchange {
            echo: None,
            reply: None,
        });
    };

    let local = req.local_timeout.unwrap_or(timing.local_timeout());
    let echo = match tokio::time::timeout(local, echo_rx.recv()).await {
        Ok(Some(p)) => p,
        Ok(None) => return Err(TransportError::Disconnected),
        Err(_) => {
            warn!("No echo for {} within {:?}", cmd::name(opcode), local);
            return Err(TransportError::LocalTimeout { opcode });
        }
    };
    if echo.packet_type() == PacketType::Busy {
        debug!("Modem busy on {}", cmd::name(opcode));
        return Err(TransportError::Busy { opcode });
    }
    if !echo.is_ack() {
        debug!("{} not acknowledged ({:?})", cmd::name(opcode), echo.packet_type());
        return Err(TransportError::NotAcked { opcode });
    }

    let reply = match reply_rx.as_mut() {
        None => None,
        Some(rx) => {
            let remote = req.remote_timeout.unwrap_or(timing.remote_timeout());
            match tokio::time::timeout(remote, rx.recv()).await {
                Ok(Some(p)) => Some(p),
                Ok(None) => return Err(TransportError::Disconnected),
                Err(_) => {
                    warn!("No reply for {} within {:?}", cmd::name(opcode), remote);
                    return Err(TransportError::RemoteTimeout { opcode });
                }
            }
        }
    };

    Ok(Exchange {
        echo: Some(echo),
        reply,
    })
}
