//! ABI encoding and decoding for the fixed call and event set the relayer
//! handles. Static arguments only, plus the single dynamic `bytes` argument
//! carried by governance proposals and `Error(string)` revert payloads.

use primitive_types::{H160, H256, U256};
use thiserror::Error;

use crate::crypto::selector;

pub const WORD: usize = 32;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("event data truncated: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("event data is not word aligned: {0} bytes")]
    Misaligned(usize),
    #[error("value does not fit in 64 bits")]
    ValueTooLarge,
    #[error("missing indexed topic {0}")]
    MissingTopic(usize),
    #[error("invalid dynamic offset")]
    InvalidOffset,
}

// A static ABI value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(H160),
    Uint(U256),
}

impl Token {
    fn to_word(&self) -> [u8; WORD] {
        let mut word = [0u8; WORD];
        match self {
            Token::Address(address) => word[12..].copy_from_slice(address.as_bytes()),
            Token::Uint(value) => word = value.to_big_endian(),
        }
        word
    }
}

// Calldata for a function with static arguments: 4-byte selector
// followed by one 32-byte word per argument
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + tokens.len() * WORD);
    out.extend_from_slice(&selector(signature));
    for token in tokens {
        out.extend_from_slice(&token.to_word());
    }
    out
}

// Split ABI data into its 32-byte words
pub fn decode_words(data: &[u8]) -> Result<Vec<[u8; WORD]>, AbiError> {
    if data.len() % WORD != 0 {
        return Err(AbiError::Misaligned(data.len()));
    }
    Ok(data
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

pub fn word_to_u256(word: &[u8; WORD]) -> U256 {
    U256::from_big_endian(word)
}

pub fn word_to_u64(word: &[u8; WORD]) -> Result<u64, AbiError> {
    let value = word_to_u256(word);
    if value > U256::from(u64::MAX) {
        return Err(AbiError::ValueTooLarge);
    }
    Ok(value.as_u64())
}

pub fn word_to_address(word: &[u8; WORD]) -> H160 {
    H160::from_slice(&word[12..])
}

pub fn topic_to_address(topic: &H256) -> H160 {
    H160::from_slice(&topic.as_bytes()[12..])
}

pub fn topic_to_u256(topic: &H256) -> U256 {
    U256::from_big_endian(topic.as_bytes())
}

// Decode a single dynamic `bytes` argument from event data:
// one offset word, then a length word and the payload at that offset
pub fn decode_single_bytes(data: &[u8]) -> Result<Vec<u8>, AbiError> {
    if data.len() < WORD * 2 {
        return Err(AbiError::Truncated {
            expected: WORD * 2,
            got: data.len(),
        });
    }
    let offset = word_to_u64(&data[..WORD].try_into().expect("word sized"))
        .map_err(|_| AbiError::InvalidOffset)? as usize;
    if offset + WORD > data.len() {
        return Err(AbiError::InvalidOffset);
    }
    let length = word_to_u64(
        &data[offset..offset + WORD]
            .try_into()
            .expect("word sized"),
    )
    .map_err(|_| AbiError::InvalidOffset)? as usize;
    let start = offset + WORD;
    if start + length > data.len() {
        return Err(AbiError::Truncated {
            expected: start + length,
            got: data.len(),
        });
    }
    Ok(data[start..start + length].to_vec())
}

// Decode the message of an `Error(string)` revert payload.
// Returns None when the payload is not a string revert.
pub fn decode_revert_string(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != selector("Error(string)") {
        return None;
    }
    let message = decode_single_bytes(&data[4..]).ok()?;
    String::from_utf8(message).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_static_call_layout() {
        let user = H160::repeat_byte(0x11);
        let calldata = encode_call(
            "mintWrapped(address,uint256,uint256)",
            &[
                Token::Address(user),
                Token::Uint(U256::from(100u64)),
                Token::Uint(U256::from(7u64)),
            ],
        );
        assert_eq!(calldata.len(), 4 + 3 * WORD);
        // address is right-aligned in its word
        assert_eq!(&calldata[4..16], &[0u8; 12]);
        assert_eq!(&calldata[16..36], user.as_bytes());
        // trailing words carry the integers
        assert_eq!(U256::from_big_endian(&calldata[36..68]), U256::from(100u64));
        assert_eq!(U256::from_big_endian(&calldata[68..100]), U256::from(7u64));
    }

    #[test]
    fn decode_words_rejects_ragged_data() {
        assert!(matches!(decode_words(&[0u8; 31]), Err(AbiError::Misaligned(31))));
        assert_eq!(decode_words(&[0u8; 64]).unwrap().len(), 2);
    }

    #[test]
    fn u64_overflow_detected() {
        let word = U256::MAX.to_big_endian();
        assert!(matches!(word_to_u64(&word), Err(AbiError::ValueTooLarge)));
    }

    #[test]
    fn round_trip_single_bytes() {
        // offset word (0x20), length word, payload padded to a word
        let payload = b"\x6b\x9a\x13\xe3";
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(WORD).to_big_endian());
        data.extend_from_slice(&U256::from(payload.len()).to_big_endian());
        data.extend_from_slice(payload);
        data.resize(WORD * 3, 0);
        assert_eq!(decode_single_bytes(&data).unwrap(), payload.to_vec());
    }

    #[test]
    fn decode_single_bytes_rejects_bad_offset() {
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(1024u64).to_big_endian());
        data.extend_from_slice(&U256::from(4u64).to_big_endian());
        assert!(decode_single_bytes(&data).is_err());
    }

    #[test]
    fn revert_string_round_trip() {
        let message = b"AccessControl: account is missing role";
        let mut data = Vec::new();
        data.extend_from_slice(&selector("Error(string)"));
        data.extend_from_slice(&U256::from(WORD).to_big_endian());
        data.extend_from_slice(&U256::from(message.len()).to_big_endian());
        data.extend_from_slice(message);
        data.resize(4 + WORD * 4, 0);
        assert_eq!(
            decode_revert_string(&data).as_deref(),
            Some("AccessControl: account is missing role")
        );
        // arbitrary custom error payloads are not string reverts
        assert_eq!(decode_revert_string(&[0xde, 0xad, 0xbe, 0xef]), None);
    }
}
