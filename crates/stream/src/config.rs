use serde::{Deserialize, Serialize};

use crate::error::AreaError;

/// Largest accepted window edge, in chunks.
pub const MAX_WINDOW_SIZE: u32 = 255;

/// Observable area configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaConfig {
    /// Edge length of the observed window in chunks. Must be odd.
    pub window_size: u32,
    /// How long `dispose` waits for the worker before detaching it.
    pub dispose_timeout_ms: u64,
    /// Number of compute passes kept for timing statistics.
    pub timing_history: usize,
}

impl Default for AreaConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            dispose_timeout_ms: 500,
            timing_history: 32,
        }
    }
}

impl AreaConfig {
    pub fn validate(&self) -> Result<(), AreaError> {
        if self.window_size % 2 == 0 {
            return Err(AreaError::EvenWindow(self.window_size));
        }
        if self.window_size > MAX_WINDOW_SIZE {
            return Err(AreaError::WindowTooLarge {
                size: self.window_size,
                max: MAX_WINDOW_SIZE,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_config_defaults() {
        let config = AreaConfig::default();
        assert_eq!(config.window_size, 5);
        assert_eq!(config.dispose_timeout_ms, 500);
        assert_eq!(config.timing_history, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_window_is_rejected() {
        let config = AreaConfig {
            window_size: u32::MAX,
            ..AreaConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AreaError::WindowTooLarge { size, max }) if size == u32::MAX && max == MAX_WINDOW_SIZE
        ));
    }
}
