//! Tunable values, read fresh on every use.
//!
//! The core never caches a setting beyond one use: it holds
//! [`LiveValue`] cells and calls [`LiveValue::get`] each time. An
//! application that wants to reconfigure a running communicator keeps an
//! `Arc<InMemoryValue<_>>` and calls [`InMemoryValue::set`].
//!
//! [`CommunicatorConfig`] and [`PasserConfig`] are the plain serde
//! snapshots you load from a file and convert into live settings.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A source of a configuration value that may change at any time.
pub trait LiveValue<T>: Send + Sync {
    /// Returns the current value.
    fn get(&self) -> T;
}

/// A value that can be changed while it is being used.
#[derive(Debug, Default)]
pub struct InMemoryValue<T> {
    value: RwLock<T>,
}

impl<T> InMemoryValue<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
        }
    }

    /// Replaces the value; the next `get` anywhere sees it.
    pub fn set(&self, value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

impl<T: Clone + Send + Sync> LiveValue<T> for InMemoryValue<T> {
    fn get(&self) -> T {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A value that never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedValue<T>(pub T);

impl<T: Clone + Send + Sync> LiveValue<T> for FixedValue<T> {
    fn get(&self) -> T {
        self.0.clone()
    }
}

fn live<T: Clone + Send + Sync + 'static>(value: T) -> Arc<dyn LiveValue<T>> {
    Arc::new(InMemoryValue::new(value))
}

// ---------------------------------------------------------------------------
// CommunicatorSettings
// ---------------------------------------------------------------------------

/// The live settings a [`Communicator`](crate::Communicator) reads.
#[derive(Clone)]
pub struct CommunicatorSettings {
    /// How many sent and received messages each history keeps.
    pub history_depth: Arc<dyn LiveValue<usize>>,

    /// Outbound backlog above which the peer is treated as lost.
    /// 0 disables the check.
    pub queue_depth_for_timeout: Arc<dyn LiveValue<usize>>,

    /// Seconds without a received message before the connection is
    /// marked lost. Also bounds each individual receive.
    pub receive_timeout_secs: Arc<dyn LiveValue<u64>>,

    /// Seconds without a sent message before a ping goes out.
    pub ping_interval_secs: Arc<dyn LiveValue<u64>>,

    /// Seconds `close` gives the sender to drain the backlog.
    pub close_grace_secs: Arc<dyn LiveValue<u64>>,
}

impl CommunicatorSettings {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs.get())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.get())
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs.get())
    }

    /// The current values as a plain config.
    pub fn snapshot(&self) -> CommunicatorConfig {
        CommunicatorConfig {
            history_depth: self.history_depth.get(),
            queue_depth_for_timeout: self.queue_depth_for_timeout.get(),
            receive_timeout_secs: self.receive_timeout_secs.get(),
            ping_interval_secs: self.ping_interval_secs.get(),
            close_grace_secs: self.close_grace_secs.get(),
        }
    }
}

impl Default for CommunicatorSettings {
    fn default() -> Self {
        CommunicatorConfig::default().into()
    }
}

impl std::fmt::Debug for CommunicatorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CommunicatorSettings")
            .field(&self.snapshot())
            .finish()
    }
}

/// Serializable snapshot of [`CommunicatorSettings`].
///
/// Missing fields take their default, so a config file only needs the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorConfig {
    /// Default: 10.
    pub history_depth: usize,
    /// Default: 100. 0 disables the check.
    pub queue_depth_for_timeout: usize,
    /// Default: 10 seconds.
    pub receive_timeout_secs: u64,
    /// Default: 3 seconds.
    pub ping_interval_secs: u64,
    /// Default: 5 seconds.
    pub close_grace_secs: u64,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            history_depth: 10,
            queue_depth_for_timeout: 100,
            receive_timeout_secs: 10,
            ping_interval_secs: 3,
            close_grace_secs: 5,
        }
    }
}

impl From<CommunicatorConfig> for CommunicatorSettings {
    fn from(config: CommunicatorConfig) -> Self {
        Self {
            history_depth: live(config.history_depth),
            queue_depth_for_timeout: live(config.queue_depth_for_timeout),
            receive_timeout_secs: live(config.receive_timeout_secs),
            ping_interval_secs: live(config.ping_interval_secs),
            close_grace_secs: live(config.close_grace_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// PasserSettings
// ---------------------------------------------------------------------------

/// The live settings a [`MessagePasser`](crate::MessagePasser) reads.
#[derive(Clone)]
pub struct PasserSettings {
    /// Largest frame accepted, in bytes.
    pub max_message_size: Arc<dyn LiveValue<usize>>,

    /// Milliseconds to sleep between polls while waiting for bytes.
    pub backoff_ms: Arc<dyn LiveValue<u64>>,
}

impl PasserSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.get())
    }

    /// The current values as a plain config.
    pub fn snapshot(&self) -> PasserConfig {
        PasserConfig {
            max_message_size: self.max_message_size.get(),
            backoff_ms: self.backoff_ms.get(),
        }
    }
}

impl Default for PasserSettings {
    fn default() -> Self {
        PasserConfig::default().into()
    }
}

impl std::fmt::Debug for PasserSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasserSettings")
            .field(&self.snapshot())
            .finish()
    }
}

/// Serializable snapshot of [`PasserSettings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasserConfig {
    /// Default: 10240 bytes.
    pub max_message_size: usize,
    /// Default: 500 milliseconds.
    pub backoff_ms: u64,
}

impl Default for PasserConfig {
    fn default() -> Self {
        Self {
            max_message_size: 10_240,
            backoff_ms: 500,
        }
    }
}

impl From<PasserConfig> for PasserSettings {
    fn from(config: PasserConfig) -> Self {
        Self {
            max_message_size: live(config.max_message_size),
            backoff_ms: live(config.backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_value_set_is_visible_through_trait_object() {
        let cell = Arc::new(InMemoryValue::new(3u64));
        let shared: Arc<dyn LiveValue<u64>> = cell.clone();

        assert_eq!(shared.get(), 3);
        cell.set(7);
        assert_eq!(shared.get(), 7);
    }

    #[test]
    fn test_settings_read_live_values() {
        let ping = Arc::new(InMemoryValue::new(3u64));
        let settings = CommunicatorSettings {
            ping_interval_secs: ping.clone(),
            ..CommunicatorSettings::default()
        };

        assert_eq!(settings.ping_interval(), Duration::from_secs(3));
        ping.set(1);
        assert_eq!(settings.ping_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_defaults() {
        let config = CommunicatorSettings::default().snapshot();
        assert_eq!(config, CommunicatorConfig::default());
        assert_eq!(config.history_depth, 10);
        assert_eq!(config.queue_depth_for_timeout, 100);
        assert_eq!(config.receive_timeout_secs, 10);
        assert_eq!(config.ping_interval_secs, 3);
        assert_eq!(config.close_grace_secs, 5);

        let passer = PasserSettings::default();
        assert_eq!(passer.max_message_size.get(), 10_240);
        assert_eq!(passer.backoff(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json_config_fills_defaults() {
        let config: CommunicatorConfig =
            serde_json::from_str(r#"{ "ping_interval_secs": 1 }"#).unwrap();
        assert_eq!(config.ping_interval_secs, 1);
        assert_eq!(config.history_depth, 10);

        let passer: PasserConfig =
            serde_json::from_str(r#"{ "backoff_ms": 20 }"#).unwrap();
        assert_eq!(passer.backoff_ms, 20);
        assert_eq!(passer.max_message_size, 10_240);
    }

    #[test]
    fn test_fixed_value() {
        let fixed: Arc<dyn LiveValue<usize>> = Arc::new(FixedValue(4));
        assert_eq!(fixed.get(), 4);
    }
}
