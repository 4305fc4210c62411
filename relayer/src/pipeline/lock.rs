use bridge_common::{
    abi::{
        decode_words, encode_call, topic_to_address, word_to_u256, word_to_u64, AbiError, Token,
        WORD,
    },
    crypto::event_topic,
    types::RawEvent,
    H160, H256, U256,
};

use crate::chain::EventFilter;

use super::{Dispatch, EventKind, EventPayload, EventRecord, StreamHandler, Submission};

pub const LOCK_STREAM_ID: &str = "chainA_lock";
const SOURCE_EVENT: &str = "Locked(address,uint256,uint256)";
const DESTINATION_CALL: &str = "mintWrapped(address,uint256,uint256)";

// Locks on the settlement chain become wrapped-token mints on the
// execution chain.
pub struct LockHandler {
    source_address: H160,
    destination_address: H160,
    topic: H256,
}

impl LockHandler {
    pub fn new(source_address: H160, destination_address: H160) -> Self {
        Self {
            source_address,
            destination_address,
            topic: event_topic(SOURCE_EVENT),
        }
    }
}

impl StreamHandler for LockHandler {
    fn stream_id(&self) -> &'static str {
        LOCK_STREAM_ID
    }

    fn kind(&self) -> EventKind {
        EventKind::Locked
    }

    fn source_filter(&self) -> EventFilter {
        EventFilter {
            address: self.source_address,
            topic0: self.topic,
        }
    }

    fn decode(&self, event: &RawEvent) -> Result<EventRecord, AbiError> {
        decode_transfer_event(event, LOCK_STREAM_ID, EventKind::Locked)
    }

    fn dispatch(&self, record: &EventRecord) -> Dispatch {
        Dispatch::Submit(Submission::new(
            self.destination_address,
            transfer_calldata(DESTINATION_CALL, record),
        ))
    }
}

// Locked and Burned share a payload shape: the user is the single indexed
// argument, amount and nonce are the data words.
pub(super) fn decode_transfer_event(
    event: &RawEvent,
    stream_id: &'static str,
    kind: EventKind,
) -> Result<EventRecord, AbiError> {
    let user_topic = event.topics.get(1).ok_or(AbiError::MissingTopic(1))?;
    let words = decode_words(&event.data)?;
    if words.len() < 2 {
        return Err(AbiError::Truncated {
            expected: WORD * 2,
            got: event.data.len(),
        });
    }
    let amount = word_to_u256(&words[0]);
    let nonce = word_to_u64(&words[1])?;
    Ok(EventRecord {
        stream_id,
        kind,
        nonce,
        block_number: event.block_number,
        tx_hash: event.tx_hash,
        payload: EventPayload::Transfer {
            user: topic_to_address(user_topic),
            amount,
        },
    })
}

pub(super) fn transfer_calldata(signature: &str, record: &EventRecord) -> Vec<u8> {
    let EventPayload::Transfer { user, amount } = &record.payload else {
        unreachable!("transfer stream carries transfer payloads");
    };
    encode_call(
        signature,
        &[
            Token::Address(*user),
            Token::Uint(*amount),
            Token::Uint(U256::from(record.nonce)),
        ],
    )
}
