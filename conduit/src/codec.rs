use crate::crc;
use crate::error::{ErrorKind, ProtoError, ProtoResult};
use crate::message::{Head, Message, HEAD_SIZE, MAX_FRAME_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::VecDeque;
use std::io::Cursor;

/// Serializes `msg` into a freshly allocated frame: head (with a freshly computed `len` and
/// `crc`) followed by the JSON body. `msg.head.version`/`sequence`/`type_` are taken as-is —
/// callers (the Manager) are responsible for stamping those before encoding.
pub fn encode(msg: &Message) -> Vec<u8> {
    let body = serde_json::to_vec(&msg.body).expect("body must be representable as JSON");
    let len = HEAD_SIZE as usize + body.len();

    let mut buffer = Vec::with_capacity(len);
    {
        let mut head = &mut buffer;
        head.write_u8(msg.head.version).unwrap();
        head.write_u16::<LittleEndian>(msg.head.server).unwrap();
        head.write_u32::<LittleEndian>(len as u32).unwrap();
        head.write_u16::<LittleEndian>(0).unwrap(); // crc placeholder, filled in below
        head.write_u32::<LittleEndian>(msg.head.sequence).unwrap();
        head.write_u8(msg.head.type_).unwrap();
    }
    buffer.extend_from_slice(&body);

    let crc = crc::checksum(&buffer);
    let mut crc_field = &mut buffer[7..9];
    crc_field.write_u16::<LittleEndian>(crc).unwrap();

    buffer
}

fn parse_head(bytes: &[u8]) -> ProtoResult<Head> {
    debug_assert_eq!(bytes.len(), HEAD_SIZE as usize);

    let mut cursor = Cursor::new(bytes);
    let version = cursor.read_u8()?;
    let server = cursor.read_u16::<LittleEndian>()?;
    let len = cursor.read_u32::<LittleEndian>()?;
    let crc = cursor.read_u16::<LittleEndian>()?;
    let sequence = cursor.read_u32::<LittleEndian>()?;
    let type_ = cursor.read_u8()?;

    if len < HEAD_SIZE || len > MAX_FRAME_SIZE {
        return Err(ProtoError::Fatal(ErrorKind::LengthOutOfRange));
    }

    Ok(Head {
        version,
        server,
        len,
        crc,
        sequence,
        type_,
    })
}

/// Validates the CRC over `frame` (head + body, `crc` field as transmitted) and parses the
/// body as JSON. `frame.len()` must equal `head.len`.
fn parse_frame(head: Head, mut frame: Vec<u8>) -> ProtoResult<Message> {
    let transmitted_crc = head.crc;
    frame[7..9].copy_from_slice(&[0, 0]);

    if crc::checksum(&frame) != transmitted_crc {
        return Err(ProtoError::Fatal(ErrorKind::CrcMismatch));
    }

    let body_bytes = &frame[HEAD_SIZE as usize..];
    let body = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body_bytes).map_err(|_| ProtoError::Fatal(ErrorKind::MalformedBody))?
    };

    Ok(Message { head, body })
}

enum State {
    Init,
    Head,
    Body(Head),
}

/// Restartable frame decoder. Bytes are fed in as they arrive off the wire; completed messages
/// accumulate in an internal queue drained by the caller. Unconsumed bytes (a partial head or
/// body) survive across calls to `feed`.
pub struct Decoder {
    state: State,
    accumulator: Vec<u8>,
    messages: VecDeque<Message>,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            state: State::Init,
            accumulator: Vec::new(),
            messages: VecDeque::new(),
        }
    }

    /// Feeds newly received bytes into the decoder, parsing as many complete frames as possible.
    /// Returns `Err` on the first fatal frame (bad length, bad CRC, unparseable JSON) and leaves
    /// the offending bytes unconsumed; the caller should treat this as a reason to disconnect
    /// rather than attempt to resynchronize mid-stream.
    pub fn feed(&mut self, bytes: &[u8]) -> ProtoResult<()> {
        self.accumulator.extend_from_slice(bytes);

        loop {
            match &self.state {
                State::Init => self.state = State::Head,
                State::Head => {
                    if self.accumulator.len() < HEAD_SIZE as usize {
                        return Ok(());
                    }
                    let head = parse_head(&self.accumulator[..HEAD_SIZE as usize])?;
                    self.state = State::Body(head);
                }
                State::Body(head) => {
                    let head = *head;
                    if self.accumulator.len() < head.len as usize {
                        return Ok(());
                    }
                    let frame: Vec<u8> = self.accumulator.drain(..head.len as usize).collect();
                    let msg = parse_frame(head, frame)?;
                    self.messages.push_back(msg);
                    self.state = State::Head;
                }
            }
        }
    }

    /// True if no fully parsed messages are waiting to be drained.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Peeks at the oldest parsed message without removing it.
    pub fn front(&self) -> Option<&Message> {
        self.messages.front()
    }

    /// Removes and discards the oldest parsed message.
    pub fn pop(&mut self) {
        self.messages.pop_front();
    }

    /// Drains every parsed message currently queued, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.messages.drain(..)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(server: u16, sequence: u32, type_: u8, body: serde_json::Value) -> Message {
        Message {
            head: Head {
                version: 1,
                server,
                len: 0,
                crc: 0,
                sequence,
                type_,
            },
            body,
        }
    }

    #[test]
    fn round_trip_preserves_head_and_body() {
        let msg = sample(7, 42, 0, json!({"x": 1}));
        let encoded = encode(&msg);

        let mut decoder = Decoder::new();
        decoder.feed(&encoded).unwrap();

        let decoded = decoder.front().unwrap();
        assert_eq!(decoded.head.version, msg.head.version);
        assert_eq!(decoded.head.server, msg.head.server);
        assert_eq!(decoded.head.sequence, msg.head.sequence);
        assert_eq!(decoded.head.type_, msg.head.type_);
        assert_eq!(decoded.head.len, encoded.len() as u32);
        assert_eq!(decoded.body, msg.body);
    }

    #[test]
    fn three_frames_survive_arbitrary_byte_splits() {
        let m1 = sample(1, 1, 0, json!({"a": 1}));
        let m2 = sample(2, 2, 0, json!([1, 2, 3]));
        let m3 = sample(3, 3, 1, serde_json::Value::Null);

        let mut stream = Vec::new();
        stream.extend(encode(&m1));
        stream.extend(encode(&m2));
        stream.extend(encode(&m3));

        for split_a in (1..stream.len()).step_by(7) {
            for split_b in (split_a..stream.len()).step_by(11) {
                let mut decoder = Decoder::new();
                decoder.feed(&stream[..split_a]).unwrap();
                decoder.feed(&stream[split_a..split_b]).unwrap();
                decoder.feed(&stream[split_b..]).unwrap();

                let servers: Vec<u16> = decoder.drain().map(|m| m.head.server).collect();
                assert_eq!(servers, vec![1, 2, 3]);
            }
        }
    }

    #[test]
    fn partial_read_across_two_messages() {
        let m1 = sample(1, 1, 0, json!({"pad": "xxxxxxxxxxxxxx"}));
        let m2 = sample(2, 2, 0, json!({"pad": "yyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyy"}));

        let e1 = encode(&m1);
        let e2 = encode(&m2);
        let mut stream = Vec::new();
        stream.extend(&e1);
        stream.extend(&e2);

        let mut decoder = Decoder::new();
        decoder.feed(&stream[..20]).unwrap();
        assert!(decoder.is_empty());
        decoder.feed(&stream[20..60]).unwrap();
        decoder.feed(&stream[60..]).unwrap();

        let servers: Vec<u16> = decoder.drain().map(|m| m.head.server).collect();
        assert_eq!(servers, vec![1, 2]);
    }

    #[test]
    fn single_byte_flip_outside_crc_field_is_rejected() {
        let msg = sample(1, 1, 0, json!({"x": 1}));
        let encoded = encode(&msg);

        for i in 0..encoded.len() {
            if (7..9).contains(&i) {
                continue; // the crc field itself
            }
            let mut corrupt = encoded.clone();
            corrupt[i] ^= 0xFF;

            let mut decoder = Decoder::new();
            assert!(decoder.feed(&corrupt).is_err(), "byte {} flip went undetected", i);
        }
    }

    #[test]
    fn length_below_minimum_is_rejected() {
        let mut bad_head = vec![0u8; HEAD_SIZE as usize];
        let mut len_field = &mut bad_head[3..7];
        len_field.write_u32::<LittleEndian>(10).unwrap();

        let mut decoder = Decoder::new();
        assert!(decoder.feed(&bad_head).is_err());
    }

    #[test]
    fn length_above_maximum_is_rejected() {
        let mut bad_head = vec![0u8; HEAD_SIZE as usize];
        let mut len_field = &mut bad_head[3..7];
        len_field
            .write_u32::<LittleEndian>(MAX_FRAME_SIZE + 1)
            .unwrap();

        let mut decoder = Decoder::new();
        assert!(decoder.feed(&bad_head).is_err());
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let ack = Message::ack(99);
        let encoded = encode(&ack);

        let mut decoder = Decoder::new();
        decoder.feed(&encoded).unwrap();
        let decoded = decoder.front().unwrap();
        assert_eq!(decoded.body, serde_json::Value::Null);
        assert_eq!(decoded.head.sequence, 99);
    }
}
