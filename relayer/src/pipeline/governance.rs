use bridge_common::{
    abi::{decode_single_bytes, topic_to_u256, AbiError},
    crypto::{event_topic, selector},
    types::RawEvent,
    H160, H256, U256,
};

use crate::chain::EventFilter;

use super::{Dispatch, EventKind, EventPayload, EventRecord, StreamHandler, Submission};

pub const GOVERNANCE_STREAM_ID: &str = "chainB_governance";
const SOURCE_EVENT: &str = "ProposalPassed(uint256,bytes)";

// The emergency actions governance may trigger on the settlement chain.
// Selectors are recomputed from the signatures; a proposal carrying
// anything else is logged and skipped.
const EMERGENCY_ACTIONS: &[&str] = &["pauseBridge()"];

// Passed proposals on the execution chain dispatch emergency actions on
// the settlement chain. The proposal data is the intended calldata; its
// leading selector is checked against the fixed action table.
pub struct GovernanceHandler {
    source_address: H160,
    emergency_address: H160,
    topic: H256,
}

impl GovernanceHandler {
    pub fn new(source_address: H160, emergency_address: H160) -> Self {
        Self {
            source_address,
            emergency_address,
            topic: event_topic(SOURCE_EVENT),
        }
    }

    fn action_for(head: &[u8; 4]) -> Option<&'static str> {
        EMERGENCY_ACTIONS
            .iter()
            .copied()
            .find(|signature| selector(signature) == *head)
    }
}

impl StreamHandler for GovernanceHandler {
    fn stream_id(&self) -> &'static str {
        GOVERNANCE_STREAM_ID
    }

    fn kind(&self) -> EventKind {
        EventKind::ProposalPassed
    }

    fn source_filter(&self) -> EventFilter {
        EventFilter {
            address: self.source_address,
            topic0: self.topic,
        }
    }

    fn decode(&self, event: &RawEvent) -> Result<EventRecord, AbiError> {
        let proposal_topic = event.topics.get(1).ok_or(AbiError::MissingTopic(1))?;
        let proposal_id = topic_to_u256(proposal_topic);
        if proposal_id > U256::from(u64::MAX) {
            return Err(AbiError::ValueTooLarge);
        }
        let data = decode_single_bytes(&event.data)?;
        Ok(EventRecord {
            stream_id: GOVERNANCE_STREAM_ID,
            kind: EventKind::ProposalPassed,
            nonce: proposal_id.as_u64(),
            block_number: event.block_number,
            tx_hash: event.tx_hash,
            payload: EventPayload::Governance { proposal_id, data },
        })
    }

    fn dispatch(&self, record: &EventRecord) -> Dispatch {
        let EventPayload::Governance { data, .. } = &record.payload else {
            unreachable!("governance stream carries governance payloads");
        };
        if data.len() < 4 {
            return Dispatch::Skip(format!(
                "proposal calldata is {} bytes, shorter than a selector",
                data.len()
            ));
        }
        let head: [u8; 4] = data[..4].try_into().expect("4-byte slice");
        match Self::action_for(&head) {
            Some(signature) => {
                log::debug!(
                    "proposal {} dispatches {} on the settlement chain",
                    record.nonce,
                    signature
                );
                Dispatch::Submit(Submission::new(self.emergency_address, data.clone()))
            }
            None => Dispatch::Skip(format!("unknown action selector 0x{}", hex::encode(head))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_common::{abi::WORD, crypto::keccak256};

    pub fn proposal_event(
        address: H160,
        proposal_id: u64,
        calldata: &[u8],
        block_number: u64,
    ) -> RawEvent {
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(WORD).to_big_endian());
        data.extend_from_slice(&U256::from(calldata.len()).to_big_endian());
        data.extend_from_slice(calldata);
        // payload padded to a word boundary, as the ABI demands
        let padded = data.len().div_ceil(WORD) * WORD;
        data.resize(padded, 0);

        let mut proposal_topic = H256::zero();
        proposal_topic
            .0
            .copy_from_slice(&U256::from(proposal_id).to_big_endian());
        RawEvent {
            address,
            topics: vec![event_topic("ProposalPassed(uint256,bytes)"), proposal_topic],
            data,
            block_number,
            tx_hash: keccak256(&proposal_id.to_be_bytes()),
            log_index: 0,
        }
    }

    fn handler() -> GovernanceHandler {
        GovernanceHandler::new(H160::repeat_byte(0x04), H160::repeat_byte(0x05))
    }

    #[test]
    fn pause_proposal_dispatches_to_emergency_contract() {
        let calldata = selector("pauseBridge()").to_vec();
        let event = proposal_event(H160::repeat_byte(0x04), 0, &calldata, 200);
        let record = handler().decode(&event).unwrap();
        assert_eq!(record.nonce, 0);
        assert_eq!(
            record.payload,
            EventPayload::Governance {
                proposal_id: U256::zero(),
                data: calldata.clone()
            }
        );

        let Dispatch::Submit(submission) = handler().dispatch(&record) else {
            panic!("pause proposals must submit");
        };
        assert_eq!(submission.to, H160::repeat_byte(0x05));
        assert_eq!(submission.calldata, calldata);
    }

    #[test]
    fn unknown_selector_is_skipped_not_errored() {
        let event = proposal_event(H160::repeat_byte(0x04), 1, &[0xde, 0xad, 0xbe, 0xef], 210);
        let record = handler().decode(&event).unwrap();
        let Dispatch::Skip(reason) = handler().dispatch(&record) else {
            panic!("unknown selectors must be skipped");
        };
        assert!(reason.contains("deadbeef"));
    }

    #[test]
    fn short_calldata_is_skipped() {
        let event = proposal_event(H160::repeat_byte(0x04), 2, &[0x01], 220);
        let record = handler().decode(&event).unwrap();
        assert!(matches!(handler().dispatch(&record), Dispatch::Skip(_)));
    }

    #[test]
    fn selector_table_matches_canonical_signature() {
        // the signature's keccak, recomputed here, must agree with the
        // selector the governance contract emits for the pause action
        assert_eq!(selector("pauseBridge()"), [0x6b, 0x9a, 0x13, 0xe3]);
        assert!(GovernanceHandler::action_for(&[0x6b, 0x9a, 0x13, 0xe3]).is_some());
        assert!(GovernanceHandler::action_for(&[0xde, 0xad, 0xbe, 0xef]).is_none());
    }
}
