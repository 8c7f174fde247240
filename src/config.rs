//! Configuration for AtlasWAL
//!
//! Centralized configuration with sensible defaults. A `Config` can be built
//! with [`Config::builder`] or read from `key=value` properties using the
//! option names understood by master and slave nodes.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WalError};

/// Main configuration for an AtlasWAL log (master or slave)
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the segment files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segment_00000000.wal
    ///     ├── segment_00000001.wal
    ///     └── ...              (last one is the active segment)
    pub data_dir: PathBuf,

    /// Maximum size of one segment file in bytes
    pub segment_size: u32,

    /// Sync strategy: how often to fsync the active segment
    pub wal_sync_strategy: WalSyncStrategy,

    /// Number of recent entries kept in memory for tail readers (0 disables)
    pub fetch_size: usize,

    /// Warm the tail cache with the last entries on open
    pub fetch_last: bool,

    // -------------------------------------------------------------------------
    // Replication Configuration
    // -------------------------------------------------------------------------
    /// Bound on blocking reads against the master (milliseconds)
    pub wait_timeout_ms: u64,

    /// Sleep between reconnect attempts (milliseconds, negative = no sleep)
    pub reconnect_period_ms: i64,

    /// Flush replicated entries automatically
    pub auto_flush: bool,

    /// Minimum interval between replication flushes
    /// (milliseconds, <= 0 flushes after every append)
    pub flush_period_ms: i64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },

    /// Never fsync on append; the owner calls `sync()` itself
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./atlaswal_data"),
            segment_size: 64 * 1024 * 1024, // 64 MB
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            fetch_size: 0,
            fetch_last: false,
            wait_timeout_ms: 1000,
            reconnect_period_ms: 100,
            auto_flush: true,
            flush_period_ms: 100,
            listen_addr: "127.0.0.1:7070".to_string(),
            max_connections: 64,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a config from `key=value` properties
    ///
    /// Recognized keys: `dataDir`, `segmentSize`, `fetchSize`, `fetchLast`,
    /// `waitTimeoutMillis`, `reconnectPeriodMillis`, `autoFlush`,
    /// `flushPeriodMillis`, `listenAddr`, `maxConnections`,
    /// `readTimeoutMillis`, `writeTimeoutMillis`. Unknown keys are ignored.
    pub fn from_properties<I, K, V>(props: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Config::default();

        for (key, value) in props {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();
            match key {
                "dataDir" => config.data_dir = PathBuf::from(value),
                "segmentSize" => {
                    config.segment_size = u32::try_from(parse_int(key, value)?).map_err(|_| {
                        WalError::Config(format!("{} out of range: {}", key, value))
                    })?
                }
                "fetchSize" => config.fetch_size = parse_unsigned(key, value)? as usize,
                "fetchLast" => config.fetch_last = parse_bool(key, value)?,
                "waitTimeoutMillis" => config.wait_timeout_ms = parse_unsigned(key, value)?,
                "reconnectPeriodMillis" => config.reconnect_period_ms = parse_int(key, value)?,
                "autoFlush" => config.auto_flush = parse_bool(key, value)?,
                "flushPeriodMillis" => config.flush_period_ms = parse_int(key, value)?,
                "listenAddr" => config.listen_addr = value.to_string(),
                "maxConnections" => config.max_connections = parse_unsigned(key, value)? as usize,
                "readTimeoutMillis" => config.read_timeout_ms = parse_unsigned(key, value)?,
                "writeTimeoutMillis" => config.write_timeout_ms = parse_unsigned(key, value)?,
                _ => tracing::debug!("Ignoring unknown property {}", key),
            }
        }

        Ok(config)
    }

    /// Parse properties text: one `key=value` per line, `#` comments
    pub fn from_properties_str(text: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                WalError::Config(format!("line {}: expected key=value", n + 1))
            })?;
            pairs.push((key.to_string(), value.to_string()));
        }
        Self::from_properties(pairs)
    }

    /// Wait timeout as a Duration
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Reconnect backoff, or None when reconnects should not sleep
    pub fn reconnect_period(&self) -> Option<Duration> {
        u64::try_from(self.reconnect_period_ms)
            .ok()
            .map(Duration::from_millis)
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let parsed = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .or_else(|| digits.strip_prefix('#'))
    {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    };
    let n = parsed.map_err(|_| WalError::Config(format!("{} is not an integer: {}", key, value)))?;
    Ok(if negative { -n } else { n })
}

fn parse_unsigned(key: &str, value: &str) -> Result<u64> {
    let n = parse_int(key, value)?;
    u64::try_from(n).map_err(|_| WalError::Config(format!("{} must not be negative: {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(WalError::Config(format!("{} is not a boolean: {}", key, value))),
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the maximum segment file size (in bytes)
    pub fn segment_size(mut self, size: u32) -> Self {
        self.config.segment_size = size;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the number of cached tail entries
    pub fn fetch_size(mut self, size: usize) -> Self {
        self.config.fetch_size = size;
        self
    }

    /// Warm the tail cache on open
    pub fn fetch_last(mut self, enabled: bool) -> Self {
        self.config.fetch_last = enabled;
        self
    }

    /// Set the blocking read timeout (in milliseconds)
    pub fn wait_timeout_ms(mut self, ms: u64) -> Self {
        self.config.wait_timeout_ms = ms;
        self
    }

    /// Set the reconnect backoff (in milliseconds, negative disables sleeping)
    pub fn reconnect_period_ms(mut self, ms: i64) -> Self {
        self.config.reconnect_period_ms = ms;
        self
    }

    /// Enable or disable automatic replication flushes
    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.config.auto_flush = enabled;
        self
    }

    /// Set the replication flush period (in milliseconds)
    pub fn flush_period_ms(mut self, ms: i64) -> Self {
        self.config.flush_period_ms = ms;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
