//! Stream handling for child process output
//!
//! Every subscriber owns a bounded queue. Publishing pushes into each
//! queue without waiting; a subscriber whose queue is full or closed is
//! dropped on the spot so a slow reader never holds back the child.

use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Read buffer size for child output
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Default per-subscriber queue depth
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Which pipe a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One delivery to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEvent {
    /// Raw output, not necessarily line-aligned
    Chunk { stream: OutputStream, text: String },
    /// Child has gone; `code` is absent when it was killed
    Exit { code: Option<i32> },
}

impl LogEvent {
    /// Text shown to a plain-text subscriber
    pub fn render(&self) -> String {
        match self {
            LogEvent::Chunk { text, .. } => text.clone(),
            LogEvent::Exit { code: Some(code) } => {
                format!("\n[process exited with code {}]\n", code)
            }
            LogEvent::Exit { code: None } => "\n[process was killed]\n".to_string(),
        }
    }
}

pub type SubscriberId = u64;

struct BroadcastInner {
    subscribers: Mutex<Vec<(SubscriberId, mpsc::Sender<LogEvent>)>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BroadcastInner {
    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriberId, mpsc::Sender<LogEvent>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn remove(&self, id: SubscriberId) -> bool {
        let mut subs = self.lock();
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        before != subs.len()
    }
}

/// Fan-out of child output to live subscribers, with no replay
#[derive(Clone)]
pub struct LogBroadcaster {
    inner: Arc<BroadcastInner>,
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl fmt::Debug for LogBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl LogBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BroadcastInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Join; only events published from now on are delivered.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner.lock().push((id, tx));
        info!("Log subscriber {} connected", id);

        Subscription {
            id,
            rx,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Leave explicitly. Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            info!("Log subscriber {} disconnected", id);
        }
        removed
    }

    /// Deliver to every current subscriber; returns how many accepted it.
    ///
    /// Delivery happens under the subscriber lock, so every subscriber sees one order.
    pub fn publish(&self, event: LogEvent) -> usize {
        let mut subs = self.inner.lock();
        let mut delivered = 0;
        subs.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!("Log subscriber {} fell behind, dropping it", id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Log subscriber {} went away", id);
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Receiving end of one subscriber; dropping it unsubscribes
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<LogEvent>,
    inner: Weak<BroadcastInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event; `None` once this subscriber has been dropped by the broadcaster.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }

    /// Next queued event without waiting
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.remove(self.id) {
                info!("Log subscriber {} disconnected", self.id);
            }
        }
    }
}

/// Spawn a task copying one child pipe into the broadcaster in raw chunks.
///
/// Multi-byte characters split across reads are carried over to the next chunk.
pub fn spawn_output_reader<R>(
    mut reader: R,
    stream: OutputStream,
    broadcaster: LogBroadcaster,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Reading child {} failed: {}", stream, e);
                    break;
                }
            };

            pending.extend_from_slice(&buf[..n]);
            let text = take_complete_utf8(&mut pending);
            if text.is_empty() {
                continue;
            }

            info!("[child {}] {}", stream, text.trim_end());
            broadcaster.publish(LogEvent::Chunk { stream, text });
        }

        if !pending.is_empty() {
            let text = String::from_utf8_lossy(&pending).into_owned();
            broadcaster.publish(LogEvent::Chunk { stream, text });
        }
    })
}

/// Decode everything except an incomplete trailing sequence, which stays in
/// `pending`. Invalid bytes become U+FFFD.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut rest = &pending[..];

    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                text.push_str(s);
                rest = &[];
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&rest[..valid]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        rest = &rest[valid + len..];
                    }
                    None => {
                        rest = &rest[valid..];
                        break;
                    }
                }
            }
        }
    }

    *pending = rest.to_vec();
    text
}
