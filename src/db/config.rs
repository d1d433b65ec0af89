//! Engine configuration.

use crate::storage::idgen::DEFAULT_BLOCK_SIZE;
use crate::wal::DEFAULT_WAL_CAPACITY;

/// Tunables for a [`crate::db::GraphStore`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Soft byte capacity of the write-ahead log. Appends past it are
    /// still accepted; `is_full` turning true is the flush signal.
    pub wal_capacity: u64,
    /// Ids handed out per generator range.
    pub id_block_size: u64,
    /// Sync file data after every durable write. Turning this off trades
    /// crash safety for speed.
    pub sync_writes: bool,
    /// Zero-fill ring regions as they are released.
    pub zero_on_release: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal_capacity: DEFAULT_WAL_CAPACITY,
            id_block_size: DEFAULT_BLOCK_SIZE,
            sync_writes: true,
            zero_on_release: true,
        }
    }
}

impl Config {
    /// Fully durable settings; identical to `Default`.
    pub fn durable() -> Self {
        Self::default()
    }

    /// Skips per-write syncs and release zeroing. Suitable for bulk
    /// loads and tests where the host outlives the workload.
    pub fn fast() -> Self {
        Self {
            sync_writes: false,
            zero_on_release: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_durable() {
        let config = Config::default();
        assert!(config.sync_writes);
        assert!(config.zero_on_release);
        assert_eq!(config.wal_capacity, DEFAULT_WAL_CAPACITY);
        assert_eq!(config.id_block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn fast_preset_drops_syncs() {
        let config = Config::fast();
        assert!(!config.sync_writes);
        assert!(!config.zero_on_release);
    }
}
