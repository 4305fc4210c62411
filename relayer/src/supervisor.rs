use std::sync::Arc;

use anyhow::{Context, Result};
use bridge_common::crypto::RelayerKey;
use log::{error, info, warn};
use tokio::{task::JoinHandle, time::interval};

use crate::{
    chain::{EthLedger, Ledger},
    config::{
        load_deployments, Config, HEARTBEAT_INTERVAL, READY_MAX_RETRIES, READY_RETRY_INTERVAL,
    },
    confirmation::ConfirmationGate,
    pipeline::{BurnHandler, GovernanceHandler, LockHandler, Pipeline, PipelineError},
    storage::RelayerStorage,
};

// Owns the pipelines: builds them, drives recovery strictly before any
// live subscription, keeps a heartbeat, and orchestrates shutdown.
pub struct Supervisor {
    config: Config,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let key = Arc::new(
            RelayerKey::from_hex(&self.config.deployer_private_key)
                .context("relayer signing key is not a 32-byte hex string")?,
        );
        info!("relayer account {:#x}", key.address());
        info!("confirmation depth {}", self.config.confirmation_depth);

        let depth = self.config.confirmation_depth;
        let chain_a: Arc<dyn Ledger> = Arc::new(EthLedger::new(
            "chainA",
            &self.config.chain_a_rpc_url,
            Arc::clone(&key),
            depth,
        ));
        let chain_b: Arc<dyn Ledger> = Arc::new(EthLedger::new(
            "chainB",
            &self.config.chain_b_rpc_url,
            Arc::clone(&key),
            depth,
        ));

        chain_a
            .wait_ready(READY_MAX_RETRIES, READY_RETRY_INTERVAL)
            .await
            .context("settlement chain endpoint never became ready")?;
        chain_b
            .wait_ready(READY_MAX_RETRIES, READY_RETRY_INTERVAL)
            .await
            .context("execution chain endpoint never became ready")?;

        let (deploy_a, deploy_b) = load_deployments(&self.config.deployments_path)
            .await
            .context("deployment addresses unavailable")?;

        let storage = Arc::new(
            RelayerStorage::open(&self.config.db_path).context("relayer store failed to open")?,
        );
        for (stream_id, cursor) in storage.cursors()? {
            info!("stream {} resumes after block {}", stream_id, cursor);
        }

        let gate = ConfirmationGate::new(depth);
        let pipelines = vec![
            Pipeline::new(
                Box::new(LockHandler::new(deploy_a.bridge_lock, deploy_b.wrapped_token)),
                Arc::clone(&chain_a),
                Arc::clone(&chain_b),
                Arc::clone(&storage),
                gate,
            ),
            Pipeline::new(
                Box::new(BurnHandler::new(deploy_b.wrapped_token, deploy_a.bridge_lock)),
                Arc::clone(&chain_b),
                Arc::clone(&chain_a),
                Arc::clone(&storage),
                gate,
            ),
            Pipeline::new(
                Box::new(GovernanceHandler::new(
                    deploy_b.governance,
                    deploy_a.governance_emergency,
                )),
                Arc::clone(&chain_b),
                Arc::clone(&chain_a),
                Arc::clone(&storage),
                gate,
            ),
        ];

        // all recoveries complete before the first live subscription starts
        for pipeline in &pipelines {
            pipeline
                .recover()
                .await
                .with_context(|| format!("recovery failed for stream {}", pipeline.stream_id()))?;
        }
        info!("recovery complete on all streams");

        let mut live_tasks: Vec<JoinHandle<Result<(), PipelineError>>> = pipelines
            .into_iter()
            .map(|pipeline| {
                tokio::spawn(async move { pipeline.start_live().await })
            })
            .collect();

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&chain_a),
            Arc::clone(&chain_b),
        ));

        let outcome = tokio::select! {
            signal = shutdown_signal() => {
                signal.context("signal handler failed")?;
                info!("shutdown signal received, stopping live subscriptions");
                Ok(())
            }
            (result, index, _) = futures::future::select_all(live_tasks.iter_mut()) => {
                match result {
                    Ok(Ok(())) => {
                        warn!("live subscription {} ended unexpectedly", index);
                        Ok(())
                    }
                    Ok(Err(e)) => {
                        error!("pipeline failed fatally: {}", e);
                        Err(anyhow::Error::new(e))
                    }
                    Err(join_error) => {
                        error!("pipeline task crashed: {}", join_error);
                        Err(anyhow::Error::new(join_error))
                    }
                }
            }
        };

        for task in &live_tasks {
            task.abort();
        }
        heartbeat.abort();
        storage.stop().await;
        if outcome.is_ok() {
            info!("shutdown complete");
        }
        outcome
    }
}

// Logs both heads every 30 seconds. A failed query is worth a warning,
// never a shutdown.
async fn heartbeat_loop(chain_a: Arc<dyn Ledger>, chain_b: Arc<dyn Ledger>) {
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        for ledger in [&chain_a, &chain_b] {
            match ledger.head_block().await {
                Ok(head) => info!("heartbeat: {} at block {}", ledger.name(), head),
                Err(e) => warn!("heartbeat: {} head query failed: {}", ledger.name(), e),
            }
        }
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
