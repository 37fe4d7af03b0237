use crate::codec::Decoder;
use crate::error::ProtoResult;
use crate::message::TYPE_ACK;
use crate::reliability::Manager;
use crate::transport::ConnectionHandle;
use hashbrown::HashMap;
use slog::{debug, Logger};
use std::sync::{Arc, Mutex};

/// Callback invoked once per newly accepted data frame (`on_data` returned `true`). Injected by
/// whatever owns the business dispatch table; the handler itself holds no routing state.
pub type MessageCallback = dyn Fn(&Arc<dyn ConnectionHandle>, &crate::message::Message) + Send + Sync;

/// Callback invoked when a connection is torn down, after the Manager's state for it has
/// already been cleaned up.
pub type ConnectionClosedCallback = dyn Fn(&str) + Send + Sync;

/// Drives the codec from each inbound read and routes completed frames to the Manager. Holds
/// no sequence or retry state of its own — it is purely a router between the transport, the
/// codec and the Manager.
pub struct ConnectionHandler {
    manager: Arc<Manager>,
    decoders: Mutex<HashMap<String, Decoder>>,
    on_message: Option<Box<MessageCallback>>,
    on_connection_closed: Option<Box<ConnectionClosedCallback>>,
    log: Logger,
}

impl ConnectionHandler {
    pub fn new(manager: Arc<Manager>, log: Logger) -> ConnectionHandler {
        ConnectionHandler {
            manager,
            decoders: Mutex::new(HashMap::new()),
            on_message: None,
            on_connection_closed: None,
            log,
        }
    }

    pub fn with_message_callback<F>(mut self, callback: F) -> ConnectionHandler
    where
        F: Fn(&Arc<dyn ConnectionHandle>, &crate::message::Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Box::new(callback));
        self
    }

    pub fn with_connection_closed_callback<F>(mut self, callback: F) -> ConnectionHandler
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_connection_closed = Some(Box::new(callback));
        self
    }

    /// Feeds newly received bytes through this connection's decoder and routes every frame
    /// that comes out of it. Frames parsed before a fatal error still get routed — only the
    /// corrupt tail is discarded. On a fatal parse error the connection must be disconnected
    /// by the caller; this implementation does not attempt to resynchronize mid-stream.
    pub fn bytes_received(&self, conn: &Arc<dyn ConnectionHandle>, bytes: &[u8]) -> ProtoResult<()> {
        let conn_id = conn.id().to_string();
        let mut decoders = self.decoders.lock().unwrap();
        let decoder = decoders.entry(conn_id).or_insert_with(Decoder::new);

        let feed_result = decoder.feed(bytes);

        for msg in decoder.drain() {
            if msg.head.type_ == TYPE_ACK {
                self.manager.on_ack(conn, &msg);
            } else if self.manager.on_data(conn, &msg) {
                if let Some(callback) = &self.on_message {
                    callback(conn, &msg);
                }
            }
        }

        feed_result
    }

    /// Call when the transport tears a connection down: cleans up Manager state, drops this
    /// connection's decoder and notifies any registered observer.
    pub fn connection_closed(&self, conn_id: &str) {
        self.manager.cleanup_connection(conn_id);
        self.decoders.lock().unwrap().remove(conn_id);

        debug!(self.log, "connection handler discarded decoder state"; "connection_id" => conn_id);

        if let Some(callback) = &self.on_connection_closed {
            callback(conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::message::Message;
    use crate::reliability::discard_logger;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct MockConn {
        id: String,
        connected: AtomicBool,
        writes: StdMutex<Vec<Vec<u8>>>,
    }

    impl MockConn {
        fn new(id: &str) -> (Arc<MockConn>, Arc<dyn ConnectionHandle>) {
            let conn = Arc::new(MockConn {
                id: id.to_string(),
                connected: AtomicBool::new(true),
                writes: StdMutex::new(Vec::new()),
            });
            let handle: Arc<dyn ConnectionHandle> = conn.clone();
            (conn, handle)
        }
    }

    impl ConnectionHandle for MockConn {
        fn id(&self) -> &str {
            &self.id
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn write(&self, bytes: &[u8]) -> ProtoResult<()> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn new_data_frame_is_dispatched_and_acked() {
        let manager = Arc::new(Manager::new(discard_logger()));
        let dispatched = Arc::new(AtomicUsize::new(0));
        let dispatched_clone = dispatched.clone();

        let handler = ConnectionHandler::new(manager, discard_logger())
            .with_message_callback(move |_conn, _msg| {
                dispatched_clone.fetch_add(1, Ordering::SeqCst);
            });

        let (conn, handle) = MockConn::new("c1");
        let msg = Message::new(1, 0, json!({"hello": "world"}));
        let encoded = encode(&msg);

        handler.bytes_received(&handle, &encoded).unwrap();

        assert_eq!(dispatched.load(Ordering::SeqCst), 1);

        let writes = conn.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        let mut decoder = crate::codec::Decoder::new();
        decoder.feed(&writes[0]).unwrap();
        let ack = decoder.front().unwrap();
        assert_eq!(ack.head.type_, TYPE_ACK);
        assert_eq!(ack.head.sequence, msg.head.sequence);
    }

    #[test]
    fn partial_bytes_wait_for_more_before_dispatching() {
        let manager = Arc::new(Manager::new(discard_logger()));
        let dispatched = Arc::new(AtomicUsize::new(0));
        let dispatched_clone = dispatched.clone();

        let handler = ConnectionHandler::new(manager, discard_logger())
            .with_message_callback(move |_conn, _msg| {
                dispatched_clone.fetch_add(1, Ordering::SeqCst);
            });

        let (_conn, handle) = MockConn::new("c1");
        let msg = Message::new(1, 0, json!({"hello": "world"}));
        let encoded = encode(&msg);

        handler.bytes_received(&handle, &encoded[..5]).unwrap();
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);

        handler.bytes_received(&handle, &encoded[5..]).unwrap();
        assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_closed_notifies_observer_and_clears_manager_state() {
        let manager = Arc::new(Manager::new(discard_logger()));
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_clone = closed.clone();

        let handler = ConnectionHandler::new(manager.clone(), discard_logger())
            .with_connection_closed_callback(move |_conn_id| {
                closed_clone.fetch_add(1, Ordering::SeqCst);
            });

        let (_conn, handle) = MockConn::new("c1");
        manager.send(&handle, Message::new(1, 0, json!(null)));

        handler.connection_closed("c1");

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
