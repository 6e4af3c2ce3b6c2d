//! Centralized configuration for Slipstream.
//!
//! All tunable parameters live here to avoid hard-coded values scattered
//! throughout the codebase. Supports environment variable overrides for
//! runtime customization.

/// Central configuration for all Slipstream components.
#[derive(Debug, Clone, Default)]
pub struct SlipstreamConfig {
    pub buffering: BufferingConfig,
    pub delivery: DeliveryConfig,
}

/// How the tail-metadata special case is handled.
///
/// Some container formats keep essential metadata at the end of the file;
/// a consumer may fetch it out of band before linear playback starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailPolicy {
    /// Tail seeks behave like any other seek.
    #[default]
    Disabled,
    /// A pre-playback seek into the final bytes is treated as a metadata
    /// fetch: after its last piece is delivered, the stream resets to its
    /// true start instead of ending.
    ReturnToStart,
}

/// Look-ahead window behavior.
#[derive(Debug, Clone)]
pub struct BufferingConfig {
    /// Number of pieces kept at top priority ahead of the cursor.
    pub window_size: usize,
    /// Tail-metadata handling policy.
    pub tail_policy: TailPolicy,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            window_size: 3,
            tail_policy: TailPolicy::Disabled,
        }
    }
}

/// Per-stream delivery task behavior.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Capacity of the inbound piece-read queue. Reads are issued one at a
    /// time, so this only needs headroom for seek races.
    pub channel_capacity: usize,
    /// How many flushing rejections to ride out before giving up on a slice.
    pub flushing_retry_limit: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4,
            flushing_retry_limit: 32,
        }
    }
}

impl SlipstreamConfig {
    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(window) = std::env::var("SLIPSTREAM_WINDOW_SIZE")
            && let Ok(size) = window.parse::<usize>()
            && size >= 1
        {
            config.buffering.window_size = size;
        }

        if let Ok(capacity) = std::env::var("SLIPSTREAM_CHANNEL_CAPACITY")
            && let Ok(value) = capacity.parse::<usize>()
            && value >= 1
        {
            config.delivery.channel_capacity = value;
        }

        if let Ok(policy) = std::env::var("SLIPSTREAM_TAIL_POLICY") {
            config.buffering.tail_policy = match policy.as_str() {
                "return-to-start" => TailPolicy::ReturnToStart,
                _ => TailPolicy::Disabled,
            };
        }

        config
    }

    /// Creates a configuration optimized for tests: default window, tail
    /// policy enabled so the return-to-start path is exercised on demand.
    pub fn for_testing() -> Self {
        Self {
            buffering: BufferingConfig {
                window_size: 3,
                tail_policy: TailPolicy::ReturnToStart,
            },
            delivery: DeliveryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = SlipstreamConfig::default();
        assert_eq!(config.buffering.window_size, 3);
        assert_eq!(config.buffering.tail_policy, TailPolicy::Disabled);
        assert_eq!(config.delivery.channel_capacity, 4);
    }

    #[test]
    fn env_override() {
        unsafe {
            std::env::set_var("SLIPSTREAM_WINDOW_SIZE", "5");
            std::env::set_var("SLIPSTREAM_TAIL_POLICY", "return-to-start");
        }

        let config = SlipstreamConfig::from_env();
        assert_eq!(config.buffering.window_size, 5);
        assert_eq!(config.buffering.tail_policy, TailPolicy::ReturnToStart);

        // Cleanup
        unsafe {
            std::env::remove_var("SLIPSTREAM_WINDOW_SIZE");
            std::env::remove_var("SLIPSTREAM_TAIL_POLICY");
        }
    }

    #[test]
    fn zero_capacity_override_is_ignored() {
        unsafe {
            std::env::set_var("SLIPSTREAM_CHANNEL_CAPACITY", "0");
        }
        let config = SlipstreamConfig::from_env();
        assert_eq!(config.delivery.channel_capacity, 4);
        unsafe {
            std::env::remove_var("SLIPSTREAM_CHANNEL_CAPACITY");
        }
    }
}
