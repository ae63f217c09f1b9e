//! Configuration for the rep.

use std::time::Duration;

use anyhow::{Context, Result};
use cell_models::StackPathMap;

use crate::auction_cell::AuctionCellConfig;
use crate::harmonizer::HarmonizerConfig;

/// Rep configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this cell.
    pub cell_id: String,

    /// Availability zone of this cell.
    pub zone: String,

    /// Address the HTTP API listens on.
    pub listen_addr: String,

    /// Executor API URL.
    pub executor_url: String,

    /// BBS API URL.
    pub bbs_url: String,

    /// Preloaded stacks, from `stack:path` entries.
    pub stack_path_map: StackPathMap,

    /// RootFS schemes accepted with any URL.
    pub root_fs_providers: Vec<String>,

    /// Placement tags every placement must request.
    pub placement_tags: Vec<String>,

    /// Placement tags a placement may additionally request.
    pub optional_placement_tags: Vec<String>,

    /// Bulk sync interval in seconds.
    pub polling_interval_secs: u64,

    /// Bulk sync interval while evacuating, in seconds.
    pub evacuation_polling_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Cell ID can be provided or auto-generated
        let cell_id = lookup("REP_CELL_ID")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("cell-{}", uuid::Uuid::new_v4()));

        let zone = lookup("REP_ZONE").unwrap_or_default();

        let listen_addr = lookup("REP_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:1800".to_string());

        let executor_url =
            lookup("REP_EXECUTOR_URL").unwrap_or_else(|| "http://127.0.0.1:1700".to_string());

        let bbs_url = lookup("REP_BBS_URL").unwrap_or_else(|| "http://127.0.0.1:8889".to_string());

        let preloaded = list(lookup("REP_PRELOADED_ROOTFS"));
        let stack_path_map =
            StackPathMap::parse_entries(&preloaded).context("invalid REP_PRELOADED_ROOTFS")?;

        let root_fs_providers = match lookup("REP_ROOTFS_PROVIDERS") {
            Some(value) => list(Some(value)),
            None => vec!["docker".to_string()],
        };

        let placement_tags = list(lookup("REP_PLACEMENT_TAGS"));
        let optional_placement_tags = list(lookup("REP_OPTIONAL_PLACEMENT_TAGS"));

        let polling_interval_secs = seconds(&lookup, "REP_POLLING_INTERVAL_SECS", 30)?;
        let evacuation_polling_interval_secs =
            seconds(&lookup, "REP_EVACUATION_POLLING_INTERVAL_SECS", 10)?;

        let log_level = lookup("REP_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            cell_id,
            zone,
            listen_addr,
            executor_url,
            bbs_url,
            stack_path_map,
            root_fs_providers,
            placement_tags,
            optional_placement_tags,
            polling_interval_secs,
            evacuation_polling_interval_secs,
            log_level,
        })
    }

    pub fn auction_cell_config(&self) -> AuctionCellConfig {
        AuctionCellConfig {
            cell_id: self.cell_id.clone(),
            zone: self.zone.clone(),
            stack_path_map: self.stack_path_map.clone(),
            arbitrary_root_fs_schemes: self.root_fs_providers.clone(),
            placement_tags: self.placement_tags.clone(),
            optional_placement_tags: self.optional_placement_tags.clone(),
        }
    }

    pub fn harmonizer_config(&self) -> HarmonizerConfig {
        HarmonizerConfig {
            poll_interval: Duration::from_secs(self.polling_interval_secs),
            evacuation_poll_interval: Duration::from_secs(self.evacuation_polling_interval_secs),
            ..HarmonizerConfig::default()
        }
    }
}

/// Comma-separated values, blanks dropped.
fn list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid {key}: {raw:?}"))?;
    if secs == 0 {
        anyhow::bail!("invalid {key}: must be positive");
    }
    Ok(secs)
}
