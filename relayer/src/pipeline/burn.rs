use bridge_common::{abi::AbiError, crypto::event_topic, types::RawEvent, H160, H256};

use crate::chain::EventFilter;

use super::{
    lock::{decode_transfer_event, transfer_calldata},
    Dispatch, EventKind, EventRecord, StreamHandler, Submission,
};

pub const BURN_STREAM_ID: &str = "chainB_burn";
const SOURCE_EVENT: &str = "Burned(address,uint256,uint256)";
const DESTINATION_CALL: &str = "unlock(address,uint256,uint256)";

// Wrapped-token burns on the execution chain release the locked
// collateral on the settlement chain.
pub struct BurnHandler {
    source_address: H160,
    destination_address: H160,
    topic: H256,
}

impl BurnHandler {
    pub fn new(source_address: H160, destination_address: H160) -> Self {
        Self {
            source_address,
            destination_address,
            topic: event_topic(SOURCE_EVENT),
        }
    }
}

impl StreamHandler for BurnHandler {
    fn stream_id(&self) -> &'static str {
        BURN_STREAM_ID
    }

    fn kind(&self) -> EventKind {
        EventKind::Burned
    }

    fn source_filter(&self) -> EventFilter {
        EventFilter {
            address: self.source_address,
            topic0: self.topic,
        }
    }

    fn decode(&self, event: &RawEvent) -> Result<EventRecord, AbiError> {
        decode_transfer_event(event, BURN_STREAM_ID, EventKind::Burned)
    }

    fn dispatch(&self, record: &EventRecord) -> Dispatch {
        Dispatch::Submit(Submission::new(
            self.destination_address,
            transfer_calldata(DESTINATION_CALL, record),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{lock::tests::transfer_event, EventPayload};
    use bridge_common::{abi::WORD, crypto::selector, U256};

    #[test]
    fn burn_round_trips_to_unlock() {
        let user = H160::repeat_byte(0x42);
        let event = transfer_event(
            H160::repeat_byte(0x03),
            "Burned(address,uint256,uint256)",
            user,
            100,
            0,
            120,
        );
        let handler = BurnHandler::new(H160::repeat_byte(0x03), H160::repeat_byte(0x01));
        let record = handler.decode(&event).unwrap();
        assert_eq!(record.stream_id, "chainB_burn");
        assert_eq!(record.kind, EventKind::Burned);
        assert_eq!(
            record.payload,
            EventPayload::Transfer {
                user,
                amount: U256::from(100u64)
            }
        );

        let Dispatch::Submit(submission) = handler.dispatch(&record) else {
            panic!("burn events always submit");
        };
        assert_eq!(submission.to, H160::repeat_byte(0x01));
        assert_eq!(
            &submission.calldata[..4],
            &selector("unlock(address,uint256,uint256)")[..]
        );
        assert_eq!(submission.calldata.len(), 4 + WORD * 3);
    }

    #[test]
    fn filter_targets_burn_topic() {
        let handler = BurnHandler::new(H160::repeat_byte(0x03), H160::repeat_byte(0x01));
        let filter = handler.source_filter();
        assert_eq!(filter.address, H160::repeat_byte(0x03));
        assert_eq!(filter.topic0, event_topic("Burned(address,uint256,uint256)"));
    }
}
