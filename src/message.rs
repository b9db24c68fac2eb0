// Copyright 2024 Developers of the relaysim project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provides the [`Message`] wire codec and the [`RecvBuffer`] pull parser.

//! Each message is one JSON record followed by a single `#` delimiter byte.
//! The payload is numeric JSON, so the delimiter can never appear inside a
//! record. A record that fails to parse is dropped and parsing resumes at
//! the next delimiter.

use serde::{Deserialize, Serialize};

use crate::config::NodeMode;
use crate::TxId;

/// Record separator on the byte stream.
pub const DELIMITER: u8 = b'#';

const MODE_TAG: u8 = 0;
const INV_TAG: u8 = 1;
const RECONCILE_REQ_TAG: u8 = 2;
const RECONCILE_RESP_TAG: u8 = 3;
const TX_TAG: u8 = 4;

/// An atomic message of the relay protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// Announces the sender's behavioural class, once at startup.
    Mode { mode: NodeMode },
    /// Advertises transactions, tagged with the forwarding hop count.
    Inv { inv: Vec<TxId>, hop: u32 },
    /// Asks the peer for its outgoing reconciliation set.
    ReconcileReq { set_size: usize },
    /// The peer's outgoing reconciliation set; may be empty.
    ReconcileResp { transactions: Vec<TxId> },
    /// Reserved; ignored on receipt.
    Tx,
}

/// The JSON shape of a record. Key names are part of the wire format.
#[derive(Debug, Deserialize, Serialize)]
struct WireRecord {
    message: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inv: Option<Vec<TxId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hop: Option<u32>,
    #[serde(rename = "setSize", skip_serializing_if = "Option::is_none")]
    set_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transactions: Option<Vec<TxId>>,
}

impl WireRecord {
    fn empty(message: u8) -> WireRecord {
        WireRecord {
            message,
            mode: None,
            inv: None,
            hop: None,
            set_size: None,
            transactions: None,
        }
    }
}

#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    UnknownTag(u8),
    UnknownMode(u8),
    MissingField(&'static str),
    EmptyInv,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Json(err) => write!(f, "malformed record: {err}"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown message tag {tag}"),
            DecodeError::UnknownMode(mode) => write!(f, "unknown mode value {mode}"),
            DecodeError::MissingField(field) => write!(f, "missing field {field}"),
            DecodeError::EmptyInv => write!(f, "empty inv array"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}

impl Message {
    /// Append the framed encoding of this message to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let record = match self {
            Message::Mode { mode } => WireRecord {
                mode: Some(mode.as_u8()),
                ..WireRecord::empty(MODE_TAG)
            },
            Message::Inv { inv, hop } => {
                debug_assert!(!inv.is_empty());
                WireRecord {
                    inv: Some(inv.clone()),
                    hop: Some(*hop),
                    ..WireRecord::empty(INV_TAG)
                }
            }
            Message::ReconcileReq { set_size } => WireRecord {
                set_size: Some(*set_size),
                ..WireRecord::empty(RECONCILE_REQ_TAG)
            },
            Message::ReconcileResp { transactions } => WireRecord {
                transactions: Some(transactions.clone()),
                ..WireRecord::empty(RECONCILE_RESP_TAG)
            },
            Message::Tx => WireRecord::empty(TX_TAG),
        };
        serde_json::to_writer(&mut *buf, &record).unwrap();
        buf.push(DELIMITER);
    }

    /// Parse one unframed record.
    pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
        let record: WireRecord = serde_json::from_slice(frame)?;
        match record.message {
            MODE_TAG => {
                let mode = record.mode.ok_or(DecodeError::MissingField("mode"))?;
                let mode = NodeMode::from_u8(mode).ok_or(DecodeError::UnknownMode(mode))?;
                Ok(Message::Mode { mode })
            }
            INV_TAG => {
                let inv = record.inv.ok_or(DecodeError::MissingField("inv"))?;
                if inv.is_empty() {
                    return Err(DecodeError::EmptyInv);
                }
                let hop = record.hop.ok_or(DecodeError::MissingField("hop"))?;
                Ok(Message::Inv { inv, hop })
            }
            RECONCILE_REQ_TAG => {
                let set_size = record
                    .set_size
                    .ok_or(DecodeError::MissingField("setSize"))?;
                Ok(Message::ReconcileReq { set_size })
            }
            RECONCILE_RESP_TAG => {
                let transactions = record
                    .transactions
                    .ok_or(DecodeError::MissingField("transactions"))?;
                Ok(Message::ReconcileResp { transactions })
            }
            TX_TAG => Ok(Message::Tx),
            tag => Err(DecodeError::UnknownTag(tag)),
        }
    }
}

/// Per-peer receive buffer. Bytes go in as they arrive; complete frames come
/// out as they become available.
#[derive(Debug, Default)]
pub struct RecvBuffer {
    buf: Vec<u8>,
}

impl RecvBuffer {
    pub fn new() -> Self {
        RecvBuffer::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Remove and return the next complete frame, without its delimiter.
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == DELIMITER)?;
        let frame = self.buf[..pos].to_vec();
        self.buf.drain(..=pos);
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::NodeMode;

    use super::{Message, RecvBuffer, DELIMITER};

    fn round_trip(message: Message) {
        let mut buf = Vec::new();
        message.encode_into(&mut buf);
        assert_eq!(*buf.last().unwrap(), DELIMITER);
        // the delimiter must never appear inside a record
        assert_eq!(buf.iter().filter(|&&b| b == DELIMITER).count(), 1);
        let decoded = Message::decode(&buf[..buf.len() - 1]).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips() {
        round_trip(Message::Mode {
            mode: NodeMode::BlackHole,
        });
        round_trip(Message::Inv {
            inv: vec![1_000_001, 42],
            hop: 3,
        });
        round_trip(Message::ReconcileReq { set_size: 1601 });
        round_trip(Message::ReconcileResp {
            transactions: vec![],
        });
        round_trip(Message::Tx);
    }

    #[test]
    fn key_names_are_stable() {
        let mut buf = Vec::new();
        Message::ReconcileReq { set_size: 7 }.encode_into(&mut buf);
        let text = std::str::from_utf8(&buf[..buf.len() - 1]).unwrap();
        assert!(text.contains("\"setSize\":7"), "{text}");

        buf.clear();
        Message::Inv {
            inv: vec![5],
            hop: 999,
        }
        .encode_into(&mut buf);
        let text = std::str::from_utf8(&buf[..buf.len() - 1]).unwrap();
        assert!(text.contains("\"inv\":[5]"), "{text}");
        assert!(text.contains("\"hop\":999"), "{text}");
    }

    #[test]
    fn rejects_bad_records() {
        assert!(Message::decode(b"{").is_err());
        assert!(Message::decode(b"{\"message\":9}").is_err());
        assert!(Message::decode(b"{\"message\":1,\"inv\":[],\"hop\":0}").is_err());
        assert!(Message::decode(b"{\"message\":0}").is_err());
        assert!(Message::decode(b"{\"message\":0,\"mode\":7}").is_err());
    }

    #[test]
    fn buffer_reassembles_split_frames() {
        let mut bytes = Vec::new();
        Message::Inv {
            inv: vec![17],
            hop: 0,
        }
        .encode_into(&mut bytes);
        Message::ReconcileReq { set_size: 3 }.encode_into(&mut bytes);

        let mut buffer = RecvBuffer::new();
        let (head, tail) = bytes.split_at(5);
        buffer.push_bytes(head);
        assert!(buffer.pop_frame().is_none());
        buffer.push_bytes(tail);

        let first = buffer.pop_frame().unwrap();
        assert_eq!(
            Message::decode(&first).unwrap(),
            Message::Inv {
                inv: vec![17],
                hop: 0
            }
        );
        let second = buffer.pop_frame().unwrap();
        assert_eq!(
            Message::decode(&second).unwrap(),
            Message::ReconcileReq { set_size: 3 }
        );
        assert!(buffer.pop_frame().is_none());
    }

    #[test]
    fn corrupted_record_does_not_poison_the_stream() {
        let mut buffer = RecvBuffer::new();
        buffer.push_bytes(b"not json");
        buffer.push_bytes(&[DELIMITER]);
        let mut bytes = Vec::new();
        Message::Tx.encode_into(&mut bytes);
        buffer.push_bytes(&bytes);

        let bad = buffer.pop_frame().unwrap();
        assert!(Message::decode(&bad).is_err());
        let good = buffer.pop_frame().unwrap();
        assert_eq!(Message::decode(&good).unwrap(), Message::Tx);
    }
}
