//! Bus Port (C9): abstraction over the raw CAN channel. No retries at this
//! layer — errors are logged and swallowed, per §4.8.

use std::fmt;
use std::future::Future;

use canmaster_proto::Frame;
use tokio::sync::mpsc;

/// Errors opening the underlying CAN interface. Per-frame I/O failures are
/// not surfaced as errors — they're logged and the frame is dropped.
#[derive(Debug)]
pub enum BusError {
    /// The interface could not be opened (wrong name, permissions, the
    /// interface is down).
    Io(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "CAN bus I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BusError {}

/// Receive and best-effort send over a CAN channel.
pub trait BusPort: Send + 'static {
    /// Wait for the next inbound frame. Returns `None` once the channel is
    /// closed (interface brought down, or a test harness dropped its
    /// injection handle).
    fn recv(&mut self) -> impl Future<Output = Option<Frame>> + Send;

    /// Queue a frame for transmission. Errors are logged internally and
    /// swallowed; the bus is best-effort.
    fn send(&self, frame: Frame) -> impl Future<Output = ()> + Send;
}

/// Production [`BusPort`] over a Linux SocketCAN interface.
pub struct SocketCanPort {
    socket: socketcan::tokio::CanSocket,
}

impl SocketCanPort {
    /// Open the named SocketCAN interface (e.g. `"can0"`).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] if the interface doesn't exist or can't be
    /// opened in the current network namespace.
    pub fn open(interface: &str) -> Result<Self, BusError> {
        let socket = socketcan::tokio::CanSocket::open(interface).map_err(|e| BusError::Io(e.to_string()))?;
        Ok(Self { socket })
    }
}

impl BusPort for SocketCanPort {
    async fn recv(&mut self) -> Option<Frame> {
        use socketcan::{CanFrame, EmbeddedFrame, Id};

        match self.socket.read_frame().await {
            Ok(CanFrame::Data(data_frame)) => match data_frame.id() {
                Id::Standard(id) => Frame::new(id.as_raw(), data_frame.data().to_vec()).ok(),
                Id::Extended(_) => None, // extended IDs are out of scope
            },
            Ok(_) => None, // remote/error frames are out of scope
            Err(e) => {
                tracing::warn!(error = %e, "CAN bus read failed");
                None
            }
        }
    }

    async fn send(&self, frame: Frame) {
        use socketcan::{CanFrame, EmbeddedFrame, StandardId};

        let Some(id) = StandardId::new(frame.id()) else {
            tracing::warn!(id = frame.id(), "refusing to send frame with out-of-range id");
            return;
        };
        let Some(can_frame) = CanFrame::new(id, frame.data()) else {
            tracing::warn!(id = frame.id(), len = frame.data().len(), "refusing to send malformed frame");
            return;
        };
        if let Err(e) = self.socket.write_frame(can_frame).await {
            tracing::error!(error = %e, "CAN bus send failed");
        }
    }
}

/// In-memory [`BusPort`] for tests and scenario harnesses. Pairs with a
/// [`LoopbackBusHandle`] the test holds to inject inbound frames and
/// observe outbound ones, mirroring `MemoryStorage`'s role on the
/// persistence side.
pub struct LoopbackBusPort {
    inbound: mpsc::Receiver<Frame>,
    outbound: mpsc::Sender<Frame>,
}

/// Test-side handle for a [`LoopbackBusPort`].
pub struct LoopbackBusHandle {
    /// Inject a frame as if it had arrived from the bus.
    pub inbound_tx: mpsc::Sender<Frame>,
    /// Observe frames the engine sent.
    pub outbound_rx: mpsc::Receiver<Frame>,
}

impl LoopbackBusPort {
    /// Create a connected port/handle pair with the given channel capacity.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, LoopbackBusHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        (
            Self { inbound: inbound_rx, outbound: outbound_tx },
            LoopbackBusHandle { inbound_tx, outbound_rx },
        )
    }
}

impl BusPort for LoopbackBusPort {
    async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    async fn send(&self, frame: Frame) {
        let _ = self.outbound.send(frame).await;
    }
}
