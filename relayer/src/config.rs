use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use bridge_common::H160;
use clap::Parser;
use log::{debug, info};
use serde::Deserialize;
use tokio::time::{sleep, Instant};

// Poll interval while waiting for an event to settle under the head
pub const HEAD_POLL_INTERVAL: Duration = Duration::from_secs(1);
// Submission retry policy
pub const SUBMIT_ATTEMPTS: u32 = 3;
pub const SUBMIT_RETRY_DELAY: Duration = Duration::from_secs(2);
// Poll interval of the live log scanner
pub const SUBSCRIBE_POLL_INTERVAL: Duration = Duration::from_secs(1);
// Poll interval while waiting for a submitted transaction to be mined
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
// Startup readiness probing of the ledger endpoints
pub const READY_MAX_RETRIES: u32 = 30;
pub const READY_RETRY_INTERVAL: Duration = Duration::from_secs(2);
// Bounded wait for the deployment-address files to appear
pub const DEPLOYMENTS_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEPLOYMENTS_POLL_INTERVAL: Duration = Duration::from_secs(2);
// Supervisor heartbeat period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
// Gas ceiling for relayed calls; every destination call is a small
// storage write, far below this
pub const SUBMIT_GAS_LIMIT: u64 = 500_000;

// Well-known dev-chain account 0, for local deployments only
pub const DEFAULT_DEV_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Debug, Clone, Parser)]
#[clap(name = "bridge-relayer", version, about)]
pub struct Config {
    /// Settlement chain (Chain A) JSON-RPC endpoint
    #[clap(long, env = "CHAIN_A_RPC_URL", default_value = "http://localhost:8545")]
    pub chain_a_rpc_url: String,

    /// Execution chain (Chain B) JSON-RPC endpoint
    #[clap(long, env = "CHAIN_B_RPC_URL", default_value = "http://localhost:9545")]
    pub chain_b_rpc_url: String,

    /// Blocks an event must be buried under the head before it is relayed
    #[clap(long, env = "CONFIRMATION_DEPTH", default_value_t = 3)]
    pub confirmation_depth: u64,

    /// Durable store location
    #[clap(long, env = "DB_PATH", default_value = "./relayer/data/relayer.db")]
    pub db_path: PathBuf,

    /// Relayer signing key as 32 bytes of hex
    #[clap(
        long,
        env = "DEPLOYER_PRIVATE_KEY",
        default_value = DEFAULT_DEV_KEY,
        hide_default_value = true
    )]
    pub deployer_private_key: String,

    /// Directory containing the chainA.json and chainB.json address files
    #[clap(long, env = "DEPLOYMENTS_PATH", default_value = "./deployments")]
    pub deployments_path: PathBuf,
}

// Contract addresses deployed on the settlement chain
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainADeployment {
    pub bridge_lock: H160,
    pub governance_emergency: H160,
}

// Contract addresses deployed on the execution chain
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBDeployment {
    pub wrapped_token: H160,
    pub governance: H160,
}

// Wait for both deployment-address files to appear and parse them.
// The deployer container writes them after its migration finishes, so a
// freshly started relayer may have to wait; a file that exists but does
// not parse yet is treated the same way (it may be mid-write).
pub async fn load_deployments(dir: &Path) -> Result<(ChainADeployment, ChainBDeployment)> {
    let chain_a_path = dir.join("chainA.json");
    let chain_b_path = dir.join("chainB.json");
    let deadline = Instant::now() + DEPLOYMENTS_WAIT_TIMEOUT;

    loop {
        match (read_deployment(&chain_a_path), read_deployment(&chain_b_path)) {
            (Ok(chain_a), Ok(chain_b)) => {
                info!(
                    "loaded deployment addresses from {} and {}",
                    chain_a_path.display(),
                    chain_b_path.display()
                );
                return Ok((chain_a, chain_b));
            }
            (a, b) => {
                if Instant::now() >= deadline {
                    if let Err(e) = a {
                        return Err(e);
                    }
                    if let Err(e) = b {
                        return Err(e);
                    }
                    bail!("deployment files missing after timeout");
                }
                debug!(
                    "deployment files not ready yet in {}, retrying",
                    dir.display()
                );
            }
        }
        sleep(DEPLOYMENTS_POLL_INTERVAL).await;
    }
}

fn read_deployment<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("deployment file {} not readable", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("deployment file {} not parseable", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_topology() {
        let config = Config::try_parse_from(["bridge-relayer"]).unwrap();
        assert_eq!(config.chain_a_rpc_url, "http://localhost:8545");
        assert_eq!(config.chain_b_rpc_url, "http://localhost:9545");
        assert_eq!(config.confirmation_depth, 3);
        assert_eq!(config.db_path, PathBuf::from("./relayer/data/relayer.db"));
        assert_eq!(config.deployments_path, PathBuf::from("./deployments"));
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "bridge-relayer",
            "--confirmation-depth",
            "12",
            "--chain-a-rpc-url",
            "http://10.0.0.1:8545",
        ])
        .unwrap();
        assert_eq!(config.confirmation_depth, 12);
        assert_eq!(config.chain_a_rpc_url, "http://10.0.0.1:8545");
    }

    #[tokio::test]
    async fn deployments_parse_once_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("chainA.json"),
            r#"{"bridgeLock":"0x1111111111111111111111111111111111111111",
                "governanceEmergency":"0x2222222222222222222222222222222222222222"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("chainB.json"),
            r#"{"wrappedToken":"0x3333333333333333333333333333333333333333",
                "governance":"0x4444444444444444444444444444444444444444"}"#,
        )
        .unwrap();

        let (chain_a, chain_b) = load_deployments(dir.path()).await.unwrap();
        assert_eq!(chain_a.bridge_lock, H160::repeat_byte(0x11));
        assert_eq!(chain_a.governance_emergency, H160::repeat_byte(0x22));
        assert_eq!(chain_b.wrapped_token, H160::repeat_byte(0x33));
        assert_eq!(chain_b.governance, H160::repeat_byte(0x44));
    }
}
