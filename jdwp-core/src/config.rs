// Connection configuration
//
// Defaults follow the reference JDI implementation: dispose batches of 50,
// hold events above 10000 queued batches and release below 100.

use crate::error::{JdwpError, JdwpResult};
use crate::types::IdSizes;
use serde::{Deserialize, Serialize};

/// Default number of reclaimed objects batched into one DisposeObjects
pub const DEFAULT_DISPOSE_THRESHOLD: usize = 50;

/// Queue depth above which the debuggee is asked to hold events
pub const DEFAULT_HIGH_WATERMARK: usize = 10_000;

/// Queue depth below which held events are released
pub const DEFAULT_LOW_WATERMARK: usize = 100;

pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Maximum allowed JDWP packet size (10MB)
/// This prevents memory exhaustion from malicious or buggy JVMs
pub const DEFAULT_MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub dispose_threshold: usize,
    pub event_queue_high_watermark: usize,
    pub event_queue_low_watermark: usize,
    /// Size of the pool that runs reply continuations
    pub worker_threads: usize,
    pub max_packet_size: usize,
    /// Identifier widths until negotiated with the VM
    pub id_sizes: IdSizes,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dispose_threshold: DEFAULT_DISPOSE_THRESHOLD,
            event_queue_high_watermark: DEFAULT_HIGH_WATERMARK,
            event_queue_low_watermark: DEFAULT_LOW_WATERMARK,
            worker_threads: DEFAULT_WORKER_THREADS,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            id_sizes: IdSizes::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> JdwpResult<()> {
        if self.dispose_threshold == 0 {
            return Err(JdwpError::InvalidConfig(
                "dispose_threshold must be at least 1".to_string(),
            ));
        }
        if self.event_queue_low_watermark >= self.event_queue_high_watermark {
            return Err(JdwpError::InvalidConfig(format!(
                "event_queue_low_watermark ({}) must be below event_queue_high_watermark ({})",
                self.event_queue_low_watermark, self.event_queue_high_watermark
            )));
        }
        if self.worker_threads == 0 {
            return Err(JdwpError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.max_packet_size < crate::protocol::HEADER_SIZE {
            return Err(JdwpError::InvalidConfig(format!(
                "max_packet_size ({}) is smaller than a packet header",
                self.max_packet_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdSize;

    #[test]
    fn test_default_is_valid() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispose_threshold, 50);
        assert_eq!(config.event_queue_high_watermark, 10_000);
        assert_eq!(config.event_queue_low_watermark, 100);
    }

    #[test]
    fn test_watermarks_need_hysteresis() {
        let config = ConnectionConfig {
            event_queue_high_watermark: 10,
            event_queue_low_watermark: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(JdwpError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"dispose_threshold": 8, "worker_threads": 2}"#).unwrap();

        assert_eq!(config.dispose_threshold, 8);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(config.id_sizes.object, IdSize::Eight);
    }
}
