use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceWatchConfig {
    /// Quiet period after the last change before the file is read again.
    pub debounce_window: Duration,
    pub poll_interval: Duration,
    pub idle_sleep: Duration,
    pub event_capacity: usize,
}

impl Default for ReferenceWatchConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            idle_sleep: Duration::from_millis(5),
            event_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceWatchConfigError {
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("idle sleep must be non-zero")]
    ZeroIdleSleep,
    #[error("file event ring must hold at least one event")]
    ZeroEventCapacity,
}

impl ReferenceWatchConfig {
    pub fn validate(&self) -> Result<(), ReferenceWatchConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ReferenceWatchConfigError::ZeroPollInterval);
        }
        if self.idle_sleep.is_zero() {
            return Err(ReferenceWatchConfigError::ZeroIdleSleep);
        }
        if self.event_capacity == 0 {
            return Err(ReferenceWatchConfigError::ZeroEventCapacity);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditLoopConfig {
    pub message_capacity: usize,
    pub max_messages_per_tick: usize,
    /// How long [`crate::EditLoop::run`] waits for a message before checking again.
    pub idle_wait: Duration,
}

impl Default for EditLoopConfig {
    fn default() -> Self {
        Self {
            message_capacity: 256,
            max_messages_per_tick: 32,
            idle_wait: Duration::from_millis(16),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EditLoopConfigError {
    #[error("message channel must hold at least one message")]
    ZeroMessageCapacity,
    #[error("a tick must handle at least one message")]
    ZeroMessagesPerTick,
    #[error("idle wait must be non-zero")]
    ZeroIdleWait,
    #[error("reference watch config is invalid: {0}")]
    Watch(#[from] ReferenceWatchConfigError),
}

impl EditLoopConfig {
    pub fn validate(&self) -> Result<(), EditLoopConfigError> {
        if self.message_capacity == 0 {
            return Err(EditLoopConfigError::ZeroMessageCapacity);
        }
        if self.max_messages_per_tick == 0 {
            return Err(EditLoopConfigError::ZeroMessagesPerTick);
        }
        if self.idle_wait.is_zero() {
            return Err(EditLoopConfigError::ZeroIdleWait);
        }
        Ok(())
    }
}
