//! Simulate command implementation.
//!
//! Starts one store manager per contender over a shared in-memory backend,
//! so each contender writes claims under its own rid as if it were a separate
//! process. Every contender locks the same position expecting it absent and
//! tries to write its name there. Exactly one may succeed.

use crate::core::config::Config;
use crate::core::error::LockResult;
use crate::core::time::{SystemTimestamps, TimestampProvider};
use crate::locking::claim::display_rid;
use crate::store::memory::InMemoryStoreManager;
use crate::store::{Entry, StoreManager, TxConfig};
use crate::txn::ExpectedValueCheckingStoreManager;
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use serde::Serialize;
use std::sync::{Arc, Barrier};

const SIMULATION_STORE: &str = "simulation";

/// Race transactions from simulated processes on one key.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of competing processes.
    #[arg(long, default_value_t = 3)]
    pub contenders: usize,
    /// Override locking.wait_ms.
    #[arg(long)]
    pub wait_ms: Option<u64>,
    /// Override locking.expire_ms.
    #[arg(long)]
    pub expire_ms: Option<u64>,
    /// Row key to contend on.
    #[arg(long, default_value = "key")]
    pub key: String,
    /// Column to contend on.
    #[arg(long, default_value = "column")]
    pub column: String,
}

/// Result of one contender.
#[derive(Debug, Clone, Serialize)]
pub struct ContenderOutcome {
    pub contender: usize,
    pub rid: String,
    pub won: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retriable: Option<bool>,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub key: String,
    pub column: String,
    pub contenders: usize,
    pub winners: Vec<ContenderOutcome>,
    pub losers: Vec<ContenderOutcome>,
    pub final_value: Option<String>,
    pub leftover_claims: usize,
}

/// Run the simulate command.
pub fn run_simulate(args: SimulateArgs, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if let Some(wait_ms) = args.wait_ms {
        config.locking.wait_ms = wait_ms;
    }
    if let Some(expire_ms) = args.expire_ms {
        config.locking.expire_ms = expire_ms;
    }
    config.validate()?;

    let times: Arc<dyn TimestampProvider> =
        Arc::new(SystemTimestamps::new(config.storage.timestamp_resolution));
    let report = simulate(&config, times, args.contenders, &args.key, &args.column)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.winners.len() != 1 {
        anyhow::bail!(
            "expected exactly one winner, got {}",
            report.winners.len()
        );
    }
    Ok(())
}

/// Race `contenders` simulated processes on `(key, column)`.
pub fn simulate(
    config: &Config,
    times: Arc<dyn TimestampProvider>,
    contenders: usize,
    key: &str,
    column: &str,
) -> Result<SimulationReport> {
    if contenders == 0 {
        anyhow::bail!("--contenders must be >= 1");
    }

    let backend = Arc::new(InMemoryStoreManager::with_name("simulation-backend"));
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let mut config = config.clone();
            config.locking.instance_id = Some(format!("sim-{i}"));
            let manager = ExpectedValueCheckingStoreManager::new(
                backend.clone() as Arc<dyn StoreManager>,
                config,
                times.clone(),
            );
            let barrier = barrier.clone();
            let key = Bytes::copy_from_slice(key.as_bytes());
            let column = Bytes::copy_from_slice(column.as_bytes());

            std::thread::Builder::new()
                .name(format!("contender-{i}"))
                .spawn(move || {
                    barrier.wait();
                    let result = contend(&manager, i, key, column);
                    let rid = display_rid(manager.rid());
                    match result {
                        Ok(()) => ContenderOutcome {
                            contender: i,
                            rid,
                            won: true,
                            error: None,
                            retriable: None,
                        },
                        Err(e) => ContenderOutcome {
                            contender: i,
                            rid,
                            won: false,
                            retriable: Some(e.is_retriable()),
                            error: Some(e.to_string()),
                        },
                    }
                })
                .context("failed to spawn contender thread")
        })
        .collect::<Result<_>>()?;

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for handle in handles {
        let outcome = handle
            .join()
            .map_err(|_| anyhow::anyhow!("contender thread panicked"))?;
        tracing::info!(contender = outcome.contender, won = outcome.won, "contender finished");
        if outcome.won {
            winners.push(outcome);
        } else {
            losers.push(outcome);
        }
    }

    let data = backend.store(SIMULATION_STORE);
    let locks = backend.store(&format!(
        "{SIMULATION_STORE}{}",
        crate::txn::LOCK_STORE_SUFFIX
    ));

    Ok(SimulationReport {
        key: key.to_string(),
        column: column.to_string(),
        contenders,
        winners,
        losers,
        final_value: data
            .value(key.as_bytes(), column.as_bytes())
            .map(|v| String::from_utf8_lossy(&v).into_owned()),
        leftover_claims: locks.column_count(),
    })
}

fn contend(
    manager: &ExpectedValueCheckingStoreManager,
    contender: usize,
    key: Bytes,
    column: Bytes,
) -> LockResult<()> {
    let store = manager.open_locking(SIMULATION_STORE)?;
    let mut tx = manager.begin_transaction(TxConfig::default())?;

    let attempt = store
        .acquire_lock(key.clone(), column.clone(), None, &mut tx)
        .and_then(|()| {
            let value = Bytes::from(format!("sim-{contender}"));
            store.mutate(&key, &[Entry::new(column, value)], &[], &mut tx)
        });

    match attempt {
        Ok(()) => tx.commit(),
        Err(e) => {
            if let Err(rollback) = tx.rollback() {
                tracing::warn!(contender, error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::{ManualTimestamps, Timestamp, TimestampResolution};

    #[test]
    fn test_single_contender_wins() {
        let times: Arc<dyn TimestampProvider> = Arc::new(ManualTimestamps::new(
            Timestamp::from_millis(1_000),
            TimestampResolution::Micro,
        ));
        let report = simulate(&Config::default(), times, 1, "k", "c").unwrap();
        assert_eq!(report.winners.len(), 1);
        assert_eq!(report.final_value.as_deref(), Some("sim-0"));
        assert_eq!(report.leftover_claims, 0);
    }

    #[test]
    fn test_zero_contenders_rejected() {
        let times: Arc<dyn TimestampProvider> = Arc::new(SystemTimestamps::default());
        assert!(simulate(&Config::default(), times, 0, "k", "c").is_err());
    }
}
