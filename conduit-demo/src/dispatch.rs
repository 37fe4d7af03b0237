use conduit::{ConnectionHandle, Manager, Message};
use hashbrown::HashMap;
use std::sync::Arc;

/// Business-logic entry point for one `server` id. Entirely outside the core's concerns; the
/// core only hands the handler a connection and a parsed message.
pub type ServiceHandler = dyn Fn(&Manager, &Arc<dyn ConnectionHandle>, &Message) + Send + Sync;

/// Routes accepted data frames by their `server` field to a registered handler. Mirrors the
/// reference server's business handler lookup, minus any of its actual services.
#[derive(Default)]
pub struct Dispatch {
    handlers: HashMap<u16, Box<ServiceHandler>>,
}

impl Dispatch {
    pub fn new() -> Dispatch {
        Dispatch {
            handlers: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, server: u16, handler: F)
    where
        F: Fn(&Manager, &Arc<dyn ConnectionHandle>, &Message) + Send + Sync + 'static,
    {
        self.handlers.insert(server, Box::new(handler));
    }

    pub fn dispatch(&self, manager: &Manager, conn: &Arc<dyn ConnectionHandle>, msg: &Message) {
        if let Some(handler) = self.handlers.get(&msg.head.server) {
            handler(manager, conn, msg);
        }
    }
}

/// The one demo service: sends the body straight back on the same `server` id.
pub const ECHO_SERVER: u16 = 1;

pub fn echo_handler(manager: &Manager, conn: &Arc<dyn ConnectionHandle>, msg: &Message) {
    manager.send(conn, Message::new(ECHO_SERVER, conduit::message::TYPE_DATA, msg.body.clone()));
}
