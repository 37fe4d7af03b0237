pub mod codec;
pub mod crc;
pub mod error;
pub mod handler;
pub mod message;
pub mod reliability;
pub mod timer;
pub mod transport;

pub use error::{ErrorKind, ProtoError, ProtoResult, ResultExt};
pub use handler::ConnectionHandler;
pub use message::Message;
pub use reliability::{Manager, SendFailureReason};
pub use timer::SweepScheduler;
pub use transport::ConnectionHandle;
