use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

use crate::message::message::{Message, MessageCodec};


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueueDirection {
    Inbound,
    Outbound,
}

/// Failures of the queue operations. None of these are fatal: the message in question is lost,
///  and the link keeps working.
#[derive(Debug)]
pub enum LinkError {
    QueueFull(QueueDirection),
    /// the session owning the queue's receiving end was dropped
    QueueClosed(QueueDirection),
    Decode(anyhow::Error),
}
impl Display for LinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::QueueFull(direction) => write!(f, "{:?} queue is full", direction),
            LinkError::QueueClosed(direction) => write!(f, "{:?} queue is closed", direction),
            LinkError::Decode(e) => write!(f, "undecodable message: {}", e),
        }
    }
}
impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Decode(e) => Some(&**e),
            _ => None,
        }
    }
}


/// Per-link counters that are updated from whichever thread touches the link
#[derive(Debug, Default)]
pub struct LinkCounters {
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
    inbound_dropped: AtomicU64,
    outbound_dropped: AtomicU64,
}
impl LinkCounters {
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }
    /// messages lost because the inbound queue was full
    pub fn inbound_dropped(&self) -> u64 {
        self.inbound_dropped.load(Ordering::Relaxed)
    }
    /// messages lost because the outbound queue was full
    pub fn outbound_dropped(&self) -> u64 {
        self.outbound_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn on_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }
}


/// The queue-facing side of a link session. A handle can be cloned and used from any thread: the
///  transport feeds received bytes through [LinkHandle::accept_incoming], and other links'
///  sessions forward messages through [LinkHandle::enqueue_outgoing].
///
/// Both operations are non-blocking. A full queue drops the message and reports it to the
///  caller.
#[derive(Clone)]
pub struct LinkHandle {
    name: Arc<str>,
    inbound: mpsc::Sender<Message>,
    outbound: mpsc::Sender<Message>,
    codec: Arc<dyn MessageCodec>,
    is_killed: Arc<AtomicBool>,
    counters: Arc<LinkCounters>,
}

impl Debug for LinkHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LinkHandle{{{}}}", self.name)
    }
}

impl LinkHandle {
    pub(crate) fn new(name: &str, inbound: mpsc::Sender<Message>, outbound: mpsc::Sender<Message>, codec: Arc<dyn MessageCodec>) -> LinkHandle {
        LinkHandle {
            name: name.into(),
            inbound,
            outbound,
            codec,
            is_killed: Default::default(),
            counters: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counters(&self) -> &LinkCounters {
        &self.counters
    }

    pub(crate) fn codec(&self) -> &dyn MessageCodec {
        self.codec.as_ref()
    }

    /// decodes a raw frame and adds it to the inbound queue
    pub fn accept_incoming(&self, raw: &[u8]) -> Result<Message, LinkError> {
        let msg = match self.codec.decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(link = %self.name, "undecodable frame - skipping: {}", e);
                return Err(LinkError::Decode(e));
            }
        };

        match self.inbound.try_send(msg.clone()) {
            Ok(()) => Ok(msg),
            Err(TrySendError::Full(_)) => {
                self.counters.inbound_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(link = %self.name, source_id = msg.source_id.0, "the incoming queue is full - dropping message");
                Err(LinkError::QueueFull(QueueDirection::Inbound))
            }
            Err(TrySendError::Closed(_)) => Err(LinkError::QueueClosed(QueueDirection::Inbound)),
        }
    }

    /// Adds a message to the outbound queue. After the link was killed, messages are discarded
    ///  without error.
    pub fn enqueue_outgoing(&self, msg: Message) -> Result<(), LinkError> {
        if self.is_killed() {
            trace!(link = %self.name, "link is shutting down - not sending");
            return Ok(());
        }

        match self.outbound.try_send(msg) {
            Ok(()) => {
                self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(msg)) => {
                self.counters.outbound_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(link = %self.name, source_id = msg.source_id.0, "the outgoing queue is full - dropping message");
                Err(LinkError::QueueFull(QueueDirection::Outbound))
            }
            Err(TrySendError::Closed(_)) => Err(LinkError::QueueClosed(QueueDirection::Outbound)),
        }
    }

    /// Cooperative shutdown: no further messages are enqueued for sending, and the session's
    ///  driver loop stops at its next iteration. Operations in progress complete normally.
    pub fn kill(&self) {
        self.is_killed.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.is_killed.load(Ordering::Acquire)
    }
}
