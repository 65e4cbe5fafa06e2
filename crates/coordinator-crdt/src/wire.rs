//! Binary envelope framing for the doc channel.
//!
//! Every message on a peer's doc channel is `(messageType: u8, docIdLength: u16 BE,
//! docId: utf8, payload: remaining bytes)`.

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
	Sync,
	Awareness,
	Subscribe,
	Unsubscribe,
	InitialSync,
	Connected,
	Disconnected,
}

impl MessageType {
	fn to_byte(self) -> u8 {
		match self {
			MessageType::Sync => 0,
			MessageType::Awareness => 1,
			MessageType::Subscribe => 2,
			MessageType::Unsubscribe => 3,
			MessageType::InitialSync => 4,
			MessageType::Connected => 5,
			MessageType::Disconnected => 6,
		}
	}

	fn from_byte(b: u8) -> Option<Self> {
		match b {
			0 => Some(MessageType::Sync),
			1 => Some(MessageType::Awareness),
			2 => Some(MessageType::Subscribe),
			3 => Some(MessageType::Unsubscribe),
			4 => Some(MessageType::InitialSync),
			5 => Some(MessageType::Connected),
			6 => Some(MessageType::Disconnected),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Envelope {
	pub message_type: MessageType,
	pub doc_id: DocId,
	pub payload: Vec<u8>,
}

impl Envelope {
	pub fn new(message_type: MessageType, doc_id: DocId, payload: Vec<u8>) -> Self {
		Self { message_type, doc_id, payload }
	}

	pub fn encode(&self) -> Vec<u8> {
		let doc_id_bytes = self.doc_id.as_str().as_bytes();
		let mut out = Vec::with_capacity(1 + 2 + doc_id_bytes.len() + self.payload.len());
		out.push(self.message_type.to_byte());
		out.extend_from_slice(&(doc_id_bytes.len() as u16).to_be_bytes());
		out.extend_from_slice(doc_id_bytes);
		out.extend_from_slice(&self.payload);
		out
	}

	pub fn decode(bytes: &[u8]) -> CoordResult<Self> {
		let &[type_byte, len_hi, len_lo, ref rest @ ..] = bytes else {
			return Err(Error::ValidationError("envelope shorter than header".into()));
		};
		let message_type = MessageType::from_byte(type_byte)
			.ok_or_else(|| Error::ValidationError(format!("unknown message type {type_byte}")))?;
		let doc_id_len = u16::from_be_bytes([len_hi, len_lo]) as usize;
		if rest.len() < doc_id_len {
			return Err(Error::ValidationError("envelope truncated before docId".into()));
		}
		let (doc_id_bytes, payload) = rest.split_at(doc_id_len);
		let doc_id_str = std::str::from_utf8(doc_id_bytes)
			.map_err(|_| Error::ValidationError("docId is not valid utf8".into()))?;
		Ok(Self {
			message_type,
			doc_id: DocId::from(doc_id_str),
			payload: payload.to_vec(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_encode_decode() {
		let env = Envelope::new(MessageType::Sync, DocId::from("wf-1"), vec![1, 2, 3]);
		let bytes = env.encode();
		let decoded = Envelope::decode(&bytes).unwrap();
		assert_eq!(decoded.message_type, MessageType::Sync);
		assert_eq!(decoded.doc_id.as_str(), "wf-1");
		assert_eq!(decoded.payload, vec![1, 2, 3]);
	}

	#[test]
	fn empty_payload_is_valid() {
		let env = Envelope::new(MessageType::InitialSync, DocId::from("exec-wf-1"), vec![]);
		let decoded = Envelope::decode(&env.encode()).unwrap();
		assert!(decoded.payload.is_empty());
	}

	#[test]
	fn rejects_truncated_header() {
		assert!(Envelope::decode(&[0, 0]).is_err());
	}

	#[test]
	fn rejects_unknown_message_type() {
		let mut bytes = Envelope::new(MessageType::Sync, DocId::from("a"), vec![]).encode();
		bytes[0] = 200;
		assert!(Envelope::decode(&bytes).is_err());
	}

	#[test]
	fn rejects_docid_longer_than_remaining_bytes() {
		assert!(Envelope::decode(&[0, 0, 10, b'a']).is_err());
	}
}

// vim: ts=4
