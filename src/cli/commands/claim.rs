//! Claim command implementation.

use crate::core::time::{Timestamp, TimestampResolution};
use crate::locking::claim::display_rid;
use crate::locking::codec::ConsistentKeyLockerSerializer;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

/// Encode or decode lock claim columns.
#[derive(Args, Debug)]
pub struct ClaimArgs {
    #[command(subcommand)]
    pub command: ClaimCommand,
}

/// Claim subcommands.
#[derive(Subcommand, Debug)]
pub enum ClaimCommand {
    /// Encode a claim column, and optionally the lock key it belongs under.
    Encode {
        /// Claim timestamp in nanoseconds since the epoch.
        #[arg(long)]
        timestamp: u64,
        /// Requester id.
        #[arg(long)]
        rid: String,
        /// Timestamp resolution (nano, micro, milli).
        #[arg(long, default_value = "micro")]
        resolution: String,
        /// Target row key, hex encoded.
        #[arg(long, requires = "column")]
        key: Option<String>,
        /// Target column, hex encoded.
        #[arg(long, requires = "key")]
        column: Option<String>,
    },
    /// Decode a hex-encoded claim column.
    Decode {
        /// Claim column, hex encoded.
        column: String,
        /// Timestamp resolution (nano, micro, milli).
        #[arg(long, default_value = "micro")]
        resolution: String,
    },
}

/// Run the claim command.
pub fn run_claim(args: ClaimArgs) -> Result<()> {
    let output = match args.command {
        ClaimCommand::Encode {
            timestamp,
            rid,
            resolution,
            key,
            column,
        } => encode(timestamp, &rid, &resolution, key.as_deref(), column.as_deref())?,
        ClaimCommand::Decode { column, resolution } => decode(&column, &resolution)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn encode(
    timestamp: u64,
    rid: &str,
    resolution: &str,
    key: Option<&str>,
    column: Option<&str>,
) -> Result<serde_json::Value> {
    let resolution: TimestampResolution = resolution.parse()?;
    let serializer = ConsistentKeyLockerSerializer;
    let ts = resolution.truncate(Timestamp::from_nanos(timestamp));
    let encoded = serializer.encode_with(ts, rid.as_bytes(), resolution);

    let mut output = json!({
        "column": hex::encode(&encoded),
        "timestamp_nanos": ts.as_nanos(),
        "resolution": resolution.to_string(),
    });

    if let (Some(key), Some(column)) = (key, column) {
        let key = hex::decode(key).context("--key is not valid hex")?;
        let column = hex::decode(column).context("--column is not valid hex")?;
        output["lock_key"] = json!(hex::encode(serializer.to_lock_key(&key, &column)));
    }
    Ok(output)
}

fn decode(column: &str, resolution: &str) -> Result<serde_json::Value> {
    let resolution: TimestampResolution = resolution.parse()?;
    let raw = hex::decode(column.trim_start_matches("0x")).context("column is not valid hex")?;
    let claim = ConsistentKeyLockerSerializer.decode_with(&raw, resolution)?;
    Ok(json!({
        "timestamp_nanos": claim.timestamp().as_nanos(),
        "rid": display_rid(claim.rid()),
        "rid_hex": hex::encode(claim.rid()),
    }))
}
