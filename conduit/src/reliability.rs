use crate::codec;
use crate::message::{Message, HEAD_SIZE, MAX_FRAME_SIZE, TYPE_DATA};
use crate::transport::ConnectionHandle;
use hashbrown::{HashMap, HashSet};
use slog::{debug, o, trace, warn, Logger};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Max retransmissions per pending entry, spaced at least `RETRY_INTERVAL` apart.
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Why a pending entry was dropped without ever being acknowledged. Only one reason exists
/// today; kept as an enum (rather than a bare drop) so a caller's `on_send_failed` callback has
/// somewhere to grow if a second one shows up.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SendFailureReason {
    RetryBudgetExhausted,
}

/// A send awaiting acknowledgement.
struct PendingEntry {
    msg: Message,
    send_time: Instant,
    retry_count: u32,
}

type ConnId = String;

struct ManagerState {
    next_sequence: u32,
    // Mirrors the source's three parallel maps rather than one struct-per-connection: a
    // connection can lose all its in-flight sends (pending submap goes away) while its dedup
    // set and handle stick around untouched until `cleanup_connection` actually tears it down.
    pending: HashMap<ConnId, HashMap<u32, PendingEntry>>,
    dedup: HashMap<ConnId, HashSet<u32>>,
    handles: HashMap<ConnId, Weak<dyn ConnectionHandle>>,
}

type SendFailedCallback = dyn Fn(&str, u32, SendFailureReason) + Send + Sync;

/// Per-process reliability layer: assigns sequence numbers, tracks unacked sends, retransmits
/// on timeout, deduplicates inbound data frames and acks them. One instance is shared across
/// every connection on the process (see design note on multi-tenant partitioning).
pub struct Manager {
    state: Mutex<ManagerState>,
    on_send_failed: Option<Box<SendFailedCallback>>,
    log: Logger,
}

impl Manager {
    pub fn new(log: Logger) -> Manager {
        Manager {
            state: Mutex::new(ManagerState {
                next_sequence: 1,
                pending: HashMap::new(),
                dedup: HashMap::new(),
                handles: HashMap::new(),
            }),
            on_send_failed: None,
            log,
        }
    }

    /// Registers a callback invoked when a pending entry exhausts its retry budget. Replaces
    /// the reference implementation's silent log-and-discard (see design notes, §9).
    pub fn with_send_failed_callback<F>(mut self, callback: F) -> Manager
    where
        F: Fn(&str, u32, SendFailureReason) + Send + Sync + 'static,
    {
        self.on_send_failed = Some(Box::new(callback));
        self
    }

    /// Assigns a sequence number, records the send as pending, encodes it and writes it to
    /// `conn`. Returns 0 and does nothing else if `conn` is not currently connected.
    pub fn send(&self, conn: &Arc<dyn ConnectionHandle>, mut msg: Message) -> u32 {
        if !conn.is_connected() {
            return 0;
        }

        let conn_id = conn.id().to_string();
        let mut state = self.state.lock().unwrap();

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        msg.head.version = 1;
        msg.head.type_ = TYPE_DATA;
        msg.head.sequence = sequence;

        let encoded = codec::encode(&msg);

        state.handles.insert(conn_id.clone(), Arc::downgrade(conn));
        state.pending.entry(conn_id.clone()).or_insert_with(HashMap::new).insert(
            sequence,
            PendingEntry {
                msg,
                send_time: Instant::now(),
                retry_count: 0,
            },
        );

        trace!(self.log, "sending reliable message";
            "connection_id" => &conn_id, "sequence" => sequence);

        let _ = conn.write(&encoded);

        sequence
    }

    /// Retires the pending entry matching `msg.sequence` on `conn`'s connection id, if any.
    pub fn on_ack(&self, conn: &Arc<dyn ConnectionHandle>, msg: &Message) {
        let conn_id = conn.id();
        let mut state = self.state.lock().unwrap();

        if let Some(submap) = state.pending.get_mut(conn_id) {
            if submap.remove(&msg.head.sequence).is_some() {
                trace!(self.log, "ack retired pending entry";
                    "connection_id" => conn_id, "sequence" => msg.head.sequence);
            }
            if submap.is_empty() {
                state.pending.remove(conn_id);
            }
        }
    }

    /// Validates and deduplicates an inbound data frame. Returns `true` exactly once per
    /// sequence for a given connection — the caller should dispatch to business logic only
    /// when this returns `true`. An ack is emitted for every accepted or duplicate frame.
    pub fn on_data(&self, conn: &Arc<dyn ConnectionHandle>, msg: &Message) -> bool {
        let head = &msg.head;

        if head.version != 0 && head.version != 1 {
            return false;
        }
        if head.is_suspect_type() {
            return false;
        }
        if head.len < HEAD_SIZE || head.len > MAX_FRAME_SIZE {
            return false;
        }

        let conn_id = conn.id().to_string();
        let is_new = {
            let mut state = self.state.lock().unwrap();
            let dedup = state.dedup.entry(conn_id.clone()).or_insert_with(HashSet::new);

            if dedup.contains(&head.sequence) {
                false
            } else {
                dedup.insert(head.sequence);
                true
            }
        };

        if !is_new {
            debug!(self.log, "duplicate data frame, re-acking";
                "connection_id" => &conn_id, "sequence" => head.sequence);
        }

        let ack = Message::ack(head.sequence);
        let _ = conn.write(&codec::encode(&ack));

        is_new
    }

    /// Walks every pending entry across every connection; retransmits those older than
    /// `RETRY_INTERVAL` up to `MAX_RETRIES` times, then drops them and reports failure.
    /// Intended to be driven by an external periodic timer (§4.5) at a cadence at or below
    /// `RETRY_INTERVAL`.
    pub fn sweep_timeouts(&self) {
        let now = Instant::now();
        let mut failures: Vec<(ConnId, u32)> = Vec::new();

        {
            let mut guard = self.state.lock().unwrap();
            let ManagerState { pending, handles, .. } = &mut *guard;

            pending.retain(|conn_id, submap| {
                submap.retain(|&sequence, entry| {
                    if now.duration_since(entry.send_time) <= RETRY_INTERVAL {
                        return true;
                    }

                    if entry.retry_count >= MAX_RETRIES {
                        failures.push((conn_id.clone(), sequence));
                        return false;
                    }

                    let handle = handles.get(conn_id).and_then(Weak::upgrade);
                    match handle {
                        Some(conn) if conn.is_connected() => {
                            entry.retry_count += 1;
                            entry.send_time = now;
                            entry.msg.head.version = 1;

                            let encoded = codec::encode(&entry.msg);
                            let _ = conn.write(&encoded);
                            true
                        }
                        _ => false,
                    }
                });

                !submap.is_empty()
            });
        }

        for (conn_id, sequence) in failures {
            warn!(self.log, "pending entry dropped after exhausting retry budget";
                "connection_id" => &conn_id, "sequence" => sequence);
            if let Some(callback) = &self.on_send_failed {
                callback(&conn_id, sequence, SendFailureReason::RetryBudgetExhausted);
            }
        }
    }

    /// Removes all pending entries, the dedup set and the weak handle for `conn_id`. Call this
    /// when the owning transport tears the connection down.
    pub fn cleanup_connection(&self, conn_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.pending.remove(conn_id);
        state.dedup.remove(conn_id);
        state.handles.remove(conn_id);

        debug!(self.log, "connection state cleaned up"; "connection_id" => conn_id);
    }

    /// Number of connections with at least one unacked send. Exposed for tests and metrics.
    #[cfg(test)]
    fn pending_count(&self, conn_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .pending
            .get(conn_id)
            .map_or(0, |m| m.len())
    }
}

pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
