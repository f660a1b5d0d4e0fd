use crate::error::{HistoryError, Result};
use std::time::Duration;

/// Back/forward cache configuration shared by every history of a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySettings {
    /// Cap on cached viewers across all histories; negative derives it from memory
    pub max_total_viewers: i32,
    /// Positions on either side of the current index whose viewers survive window eviction
    pub safe_radius: usize,
    /// Idle time after which a cached viewer is evicted
    pub eviction_timeout_ms: u64,
    /// Longest history kept; older entries are purged
    pub max_entries: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_total_viewers: -1,
            safe_radius: 3,
            eviction_timeout_ms: 30 * 60 * 1000,
            max_entries: 50,
        }
    }
}

impl HistorySettings {
    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_millis(self.eviction_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.eviction_timeout_ms < 2 {
            return Err(HistoryError::InvalidArgument(format!(
                "eviction_timeout_ms must be at least 2, got {}",
                self.eviction_timeout_ms
            )));
        }
        if self.max_entries == 0 {
            return Err(HistoryError::InvalidArgument(
                "max_entries must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = HistorySettings::default();
        assert_eq!(settings.max_total_viewers, -1);
        assert_eq!(settings.safe_radius, 3);
        assert_eq!(settings.eviction_timeout(), Duration::from_secs(1800));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_degenerate_values() {
        let settings = HistorySettings {
            eviction_timeout_ms: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = HistorySettings {
            max_entries: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
