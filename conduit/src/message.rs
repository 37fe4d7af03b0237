use serde_json::Value;

/// Size of the fixed head in bytes: version(1) + server(2) + len(4) + crc(2) + sequence(4) + type(1).
pub const HEAD_SIZE: u32 = 14;

/// Largest frame this implementation will accept or produce, head included.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

pub const TYPE_DATA: u8 = 0;
pub const TYPE_ACK: u8 = 1;

/// Sequence value meaning "not yet assigned"; callers leave this at 0 and `Manager::send`
/// replaces it with a freshly allocated id.
pub const SEQUENCE_UNASSIGNED: u32 = 0;

/// The 14-byte wire head, already decoded into host types.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Head {
    pub version: u8,
    pub server: u16,
    pub len: u32,
    pub crc: u16,
    pub sequence: u32,
    pub type_: u8,
}

impl Head {
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.type_ == TYPE_ACK
    }

    /// The band-aid from the original implementation: these byte values are ASCII JSON
    /// delimiters, so a `type` field carrying one almost certainly means the stream lost
    /// framing sync rather than that a frame genuinely has this type. Kept for fidelity;
    /// CRC validation already catches the same corruption.
    #[inline]
    pub fn is_suspect_type(&self) -> bool {
        matches!(self.type_, b'{' | b'}' | b'[' | b']')
    }
}

/// A full protocol message: head plus JSON body.
#[derive(Debug, Clone)]
pub struct Message {
    pub head: Head,
    pub body: Value,
}

impl Message {
    /// Builds a message for the caller-facing API: only `server`, `type_` and `body` matter,
    /// the rest is filled in by the codec/manager before it ever reaches the wire.
    pub fn new(server: u16, type_: u8, body: Value) -> Message {
        Message {
            head: Head {
                version: 1,
                server,
                len: 0,
                crc: 0,
                sequence: SEQUENCE_UNASSIGNED,
                type_,
            },
            body,
        }
    }

    /// Builds an empty-body ack for the given sequence, as specified by `Manager::on_data`.
    pub fn ack(sequence: u32) -> Message {
        Message {
            head: Head {
                version: 1,
                server: 0,
                len: 0,
                crc: 0,
                sequence,
                type_: TYPE_ACK,
            },
            body: Value::Null,
        }
    }
}
