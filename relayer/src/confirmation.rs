use log::{trace, warn};
use tokio::time::sleep;

use crate::{chain::Ledger, config::HEAD_POLL_INTERVAL};

// An event at block B is settled once the head H satisfies H - B >= depth
pub fn is_confirmed(event_block: u64, head: u64, depth: u64) -> bool {
    head.saturating_sub(event_block) >= depth
}

// Stateless confirmation policy: a pure function of the event block, the
// current head and the configured depth.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationGate {
    depth: u64,
}

impl ConfirmationGate {
    pub fn new(depth: u64) -> Self {
        Self { depth }
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    // Batch mode: checked against a head captured by the caller
    pub fn check(&self, event_block: u64, head: u64) -> bool {
        is_confirmed(event_block, head, self.depth)
    }

    // Polling mode: re-read the head every second until the event settles.
    // Endpoint hiccups are tolerated; cancellation is the caller's job.
    // Returns the head that satisfied the depth.
    pub async fn wait(&self, ledger: &dyn Ledger, event_block: u64) -> u64 {
        loop {
            match ledger.head_block().await {
                Ok(head) if self.check(event_block, head) => return head,
                Ok(head) => {
                    trace!(
                        "block {} not yet settled (head {}, depth {})",
                        event_block,
                        head,
                        self.depth
                    );
                }
                Err(e) => {
                    warn!("head poll failed while awaiting confirmations: {}", e);
                }
            }
            sleep(HEAD_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_depth_is_confirmed() {
        // head - B == D settles, one block less does not
        assert!(is_confirmed(52, 55, 3));
        assert!(!is_confirmed(53, 55, 3));
    }

    #[test]
    fn zero_depth_confirms_the_head_itself() {
        assert!(is_confirmed(55, 55, 0));
    }

    #[test]
    fn head_behind_event_never_confirms() {
        // reorged-away or not-yet-seen block
        assert!(!is_confirmed(60, 55, 3));
    }

    #[test]
    fn gate_uses_configured_depth() {
        let gate = ConfirmationGate::new(5);
        assert_eq!(gate.depth(), 5);
        assert!(gate.check(50, 55));
        assert!(!gate.check(51, 55));
    }
}
