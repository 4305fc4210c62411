//! Legacy (pre-typed-envelope) transaction encoding with replay-protected
//! signing. The relayer only ever submits contract calls, so value transfers
//! and contract creation are not modelled.

use primitive_types::{H160, H256, U256};

use crate::{
    crypto::{keccak256, CryptoError, RelayerKey},
    rlp,
};

#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    // Sign with the replay-protection scheme: the signing digest commits to
    // the chain id, and the recovery id is folded into v as
    // `recovery + chain_id * 2 + 35`
    pub fn sign(&self, key: &RelayerKey, chain_id: u64) -> Result<Vec<u8>, CryptoError> {
        let digest = self.signing_digest(chain_id);
        let signature = key.sign_digest(digest)?;
        let v = u64::from(signature.recovery_id) + chain_id * 2 + 35;

        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        rlp::encode_u64(&mut payload, v);
        encode_signature_scalar(&mut payload, &signature.r);
        encode_signature_scalar(&mut payload, &signature.s);

        let mut raw = Vec::new();
        rlp::encode_list(&mut raw, &payload);
        Ok(raw)
    }

    fn signing_digest(&self, chain_id: u64) -> H256 {
        let mut payload = Vec::new();
        self.encode_fields(&mut payload);
        rlp::encode_u64(&mut payload, chain_id);
        rlp::encode_bytes(&mut payload, &[]);
        rlp::encode_bytes(&mut payload, &[]);

        let mut envelope = Vec::new();
        rlp::encode_list(&mut envelope, &payload);
        keccak256(&envelope)
    }

    fn encode_fields(&self, out: &mut Vec<u8>) {
        rlp::encode_u64(out, self.nonce);
        rlp::encode_u256(out, self.gas_price);
        rlp::encode_u64(out, self.gas_limit);
        rlp::encode_bytes(out, self.to.as_bytes());
        rlp::encode_u256(out, self.value);
        rlp::encode_bytes(out, &self.data);
    }
}

// r and s are unsigned scalars: leading zero bytes must be stripped
fn encode_signature_scalar(out: &mut Vec<u8>, scalar: &H256) {
    rlp::encode_u256(out, U256::from_big_endian(scalar.as_bytes()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::selector;

    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn sample() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: 300_000,
            to: H160::repeat_byte(0x35),
            value: U256::zero(),
            data: selector("pauseBridge()").to_vec(),
        }
    }

    #[test]
    fn raw_transaction_is_a_list() {
        let key = RelayerKey::from_hex(DEV_KEY).unwrap();
        let raw = sample().sign(&key, 31337).unwrap();
        // top-level RLP list header
        assert!(raw[0] >= 0xc0);
        // same fields, different chain id, different bytes (replay protection)
        let other = sample().sign(&key, 1).unwrap();
        assert_ne!(raw, other);
    }

    #[test]
    fn digest_commits_to_payload() {
        let mut a = sample();
        let base = a.signing_digest(31337);
        a.nonce = 10;
        assert_ne!(a.signing_digest(31337), base);
    }

    #[test]
    fn v_encodes_chain_id() {
        let key = RelayerKey::from_hex(DEV_KEY).unwrap();
        let tx = sample();
        let digest = tx.signing_digest(31337);
        let sig = key.sign_digest(digest).unwrap();
        let v = u64::from(sig.recovery_id) + 31337 * 2 + 35;
        assert!(v == 62709 || v == 62710);
    }
}
