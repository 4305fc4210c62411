use libsecp256k1::{Message, PublicKey, SecretKey};
use primitive_types::{H160, H256};
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid private key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("secp256k1 failure: {0}")]
    Secp(String),
}

// Keccak-256 digest of arbitrary bytes
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256::from_slice(&hasher.finalize())
}

// First 4 bytes of the keccak-256 of a canonical function or error signature.
// Selectors are always recomputed from the signature, never written as literals.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}

// Full keccak-256 of an event signature, used as log topic0
pub fn event_topic(signature: &str) -> H256 {
    keccak256(signature.as_bytes())
}

// An ECDSA recoverable signature over a 32-byte digest
#[derive(Debug, Clone, Copy)]
pub struct RecoverableSignature {
    pub r: H256,
    pub s: H256,
    pub recovery_id: u8,
}

// The relayer signing key. Wraps the secp256k1 secret and caches the
// derived account address.
pub struct RelayerKey {
    secret: SecretKey,
    address: H160,
}

impl RelayerKey {
    // Parse from a hex string, with or without 0x prefix
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let stripped = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(stripped)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        let secret = SecretKey::parse_slice(&bytes)
            .map_err(|e| CryptoError::Secp(format!("{:?}", e)))?;
        let address = address_of(&PublicKey::from_secret_key(&secret));
        Ok(Self { secret, address })
    }

    pub fn address(&self) -> H160 {
        self.address
    }

    pub fn sign_digest(&self, digest: H256) -> Result<RecoverableSignature, CryptoError> {
        let message = Message::parse_slice(digest.as_bytes())
            .map_err(|e| CryptoError::Secp(format!("{:?}", e)))?;
        let (signature, recovery_id) = libsecp256k1::sign(&message, &self.secret);
        let serialized = signature.serialize();
        Ok(RecoverableSignature {
            r: H256::from_slice(&serialized[..32]),
            s: H256::from_slice(&serialized[32..]),
            recovery_id: recovery_id.serialize(),
        })
    }
}

// Account address: last 20 bytes of keccak-256 over the uncompressed
// public key without its 0x04 tag byte
fn address_of(public: &PublicKey) -> H160 {
    let serialized = public.serialize();
    let digest = keccak256(&serialized[1..]);
    H160::from_slice(&digest.as_bytes()[12..])
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known dev-chain account 0
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "f39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn keccak_empty_input() {
        // keccak256("") is a fixed constant
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn well_known_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("Error(string)"), [0x08, 0xc3, 0x79, 0xa0]);
    }

    #[test]
    fn key_address_derivation() {
        let key = RelayerKey::from_hex(DEV_KEY).unwrap();
        assert_eq!(hex::encode(key.address()), DEV_ADDRESS);
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            RelayerKey::from_hex("0xdeadbeef"),
            Err(CryptoError::InvalidKeyLength(4))
        ));
    }

    #[test]
    fn signature_recovers_to_signer() {
        let key = RelayerKey::from_hex(DEV_KEY).unwrap();
        let digest = keccak256(b"relay me");
        let sig = key.sign_digest(digest).unwrap();

        let mut raw = [0u8; 64];
        raw[..32].copy_from_slice(sig.r.as_bytes());
        raw[32..].copy_from_slice(sig.s.as_bytes());
        let parsed = libsecp256k1::Signature::parse_standard(&raw).unwrap();
        let recovery = libsecp256k1::RecoveryId::parse(sig.recovery_id).unwrap();
        let message = Message::parse_slice(digest.as_bytes()).unwrap();
        let recovered = libsecp256k1::recover(&message, &parsed, &recovery).unwrap();
        assert_eq!(address_of(&recovered), key.address());
    }
}
