pub mod abi;
pub mod crypto;
pub mod rlp;
pub mod rpc;
pub mod transaction;
pub mod types;

pub use primitive_types::{H160, H256, U256};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
