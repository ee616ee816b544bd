//! Client and engine configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Configuration of a broadcasting client connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Simulator broadcasting endpoint
    pub remote_addr: SocketAddr,
    /// Name shown by the simulator for this client
    pub display_name: String,
    /// Password required to register
    pub connection_password: String,
    /// Password required to send commands
    pub command_password: String,
    /// Interval between realtime updates requested from the simulator
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub update_interval: Duration,
    /// Socket receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Minimum time between two entry list refresh requests
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub entry_list_cooldown: Duration,
    /// Registration retry policy
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            remote_addr: SocketAddr::from(([127, 0, 0, 1], super::DEFAULT_PORT)),
            display_name: "acc_leaderboard".to_string(),
            connection_password: "asd".to_string(),
            command_password: String::new(),
            update_interval: Duration::from_millis(100),
            recv_buffer_size: 256 * 1024,
            entry_list_cooldown: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Applies the port and passwords configured in the simulator
    pub fn with_broadcasting_settings(mut self, settings: &BroadcastingSettings) -> Self {
        self.remote_addr.set_port(settings.udp_listener_port);
        self.connection_password = settings.connection_password.clone();
        self.command_password = settings.command_password.clone();
        self
    }

    /// Update interval in the wire representation
    pub fn update_interval_ms(&self) -> i32 {
        i32::try_from(self.update_interval.as_millis())
            .unwrap_or(i32::MAX)
            .max(1)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.update_interval.is_zero() {
            return Err(Error::config("update interval must be positive"));
        }
        if self.display_name.len() > u16::MAX as usize {
            return Err(Error::config("display name is too long"));
        }
        self.retry.validate()
    }
}

/// Bounded exponential backoff for rejected registrations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub initial_backoff: Duration,
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub max_backoff: Duration,
    /// Rejections tolerated before the connection gives up
    pub max_attempts: u32,
    /// Upper bound of the random delay added to each backoff
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            max_attempts: 8,
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay before registration attempt `attempt + 1`
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay before the next registration attempt, jitter included
    pub fn backoff(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_backoff(attempt) + Duration::from_millis(jitter)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("registration needs at least one attempt"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::config("initial backoff exceeds max backoff"));
        }
        Ok(())
    }
}

/// Method used for time gaps between cars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GapPolicy {
    /// Interpolate reference laps for each car class
    ReferenceCurve,
    /// Compare when both cars passed the same 1/100th lap marker
    LiveBuckets,
}

/// Ordering used for overall positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankingOrder {
    /// Position reported by the simulator
    OfficialPosition,
    /// Laps plus spline position during races, official position otherwise
    TotalSplinePosition,
}

/// Configuration of the gap and ranking engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gap_policy: GapPolicy,
    pub ranking: RankingOrder,
    /// Simulation time per real second
    pub time_multiplier: f64,
    /// Speed assumed when no reference lap exists
    pub fallback_speed_kmh: f64,
    /// Session updates a car may miss before it is removed
    pub missed_update_limit: u32,
    /// Directory holding `<track>_<class>.txt` reference laps
    pub reference_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            gap_policy: GapPolicy::ReferenceCurve,
            ranking: RankingOrder::OfficialPosition,
            time_multiplier: 1.0,
            fallback_speed_kmh: 175.0,
            missed_update_limit: 10,
            reference_dir: None,
        }
    }
}

impl EngineConfig {
    /// Checks that gap arithmetic stays finite
    pub fn validate(&self) -> Result<()> {
        if !(self.time_multiplier.is_finite() && self.time_multiplier > 0.0) {
            return Err(Error::config("time multiplier must be positive"));
        }
        if !(self.fallback_speed_kmh.is_finite() && self.fallback_speed_kmh > 0.0) {
            return Err(Error::config("fallback speed must be positive"));
        }
        Ok(())
    }
}

/// Contents of the simulator's `broadcasting.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastingSettings {
    #[serde(rename = "updListenerPort", alias = "udpListenerPort")]
    pub udp_listener_port: u16,
    #[serde(rename = "connectionPassword", default)]
    pub connection_password: String,
    #[serde(rename = "commandPassword", default)]
    pub command_password: String,
}

impl Default for BroadcastingSettings {
    fn default() -> Self {
        BroadcastingSettings {
            udp_listener_port: super::DEFAULT_PORT,
            connection_password: "asd".to_string(),
            command_password: String::new(),
        }
    }
}

impl BroadcastingSettings {
    /// Reads the settings file written by the simulator
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        Self::from_json_bytes(&raw)
    }

    /// Parses settings encoded as UTF-16LE with BOM or plain UTF-8
    pub fn from_json_bytes(raw: &[u8]) -> Result<Self> {
        let text = decode_settings_text(raw)?;
        let settings: BroadcastingSettings = serde_json::from_str(text.trim_start_matches('\u{feff}'))
            .map_err(|e| Error::config(format!("invalid broadcasting.json: {}", e)))?;

        if settings.udp_listener_port < 1024 {
            return Err(Error::config(format!(
                "listener port {} must be between 1024 and 65535",
                settings.udp_listener_port
            )));
        }
        Ok(settings)
    }
}

fn decode_settings_text(raw: &[u8]) -> Result<String> {
    if let Some(body) = raw.strip_prefix(&[0xFF, 0xFE]) {
        if body.len() % 2 != 0 {
            return Err(Error::config("odd length UTF-16 settings file"));
        }
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16(&units)
            .map_err(|e| Error::config(format!("invalid UTF-16 in settings: {}", e)));
    }

    String::from_utf8(raw.to_vec()).map_err(|e| Error::config(format!("invalid UTF-8 in settings: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16_with_bom(text: &str) -> Vec<u8> {
        let mut raw = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        raw
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.remote_addr.port(), 9000);
        assert_eq!(config.update_interval_ms(), 100);
    }

    #[test]
    fn test_config_round_trip() {
        let config = ClientConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.update_interval, config.update_interval);
        assert_eq!(parsed.retry.max_attempts, config.retry.max_attempts);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: EngineConfig = serde_json::from_str(r#"{"gap_policy":"LiveBuckets"}"#).unwrap();
        assert_eq!(parsed.gap_policy, GapPolicy::LiveBuckets);
        assert_eq!(parsed.fallback_speed_kmh, 175.0);
        assert!(parsed.validate().is_ok());

        let stalled = EngineConfig {
            time_multiplier: 0.0,
            ..EngineConfig::default()
        };
        assert!(stalled.validate().is_err());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            max_attempts: 10,
            jitter: Duration::from_millis(50),
        };
        assert_eq!(policy.base_backoff(1), Duration::from_millis(100));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(200));
        assert_eq!(policy.base_backoff(4), Duration::from_millis(800));
        assert_eq!(policy.base_backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.base_backoff(40), Duration::from_millis(1000));

        for attempt in 1..10 {
            let delay = policy.backoff(attempt);
            assert!(delay >= policy.base_backoff(attempt));
            assert!(delay <= policy.base_backoff(attempt) + policy.jitter);
        }
    }

    #[test]
    fn test_utf16_broadcasting_settings() {
        let raw = utf16_with_bom(
            r#"{"updListenerPort": 9232, "connectionPassword": "pw", "commandPassword": "cmd"}"#,
        );
        let settings = BroadcastingSettings::from_json_bytes(&raw).unwrap();
        assert_eq!(settings.udp_listener_port, 9232);

        let config = ClientConfig::default().with_broadcasting_settings(&settings);
        assert_eq!(config.remote_addr.port(), 9232);
        assert_eq!(config.connection_password, "pw");
        assert_eq!(config.command_password, "cmd");
    }

    #[test]
    fn test_listener_port_accepts_both_spellings() {
        for key in ["updListenerPort", "udpListenerPort"] {
            let raw = format!(r#"{{"{}": 9232, "connectionPassword": "pw"}}"#, key);
            let settings = BroadcastingSettings::from_json_bytes(raw.as_bytes()).unwrap();
            assert_eq!(settings.udp_listener_port, 9232, "key {}", key);
            assert_eq!(settings.command_password, "");
        }
    }

    #[test]
    fn test_oversized_cooldown_rejected() {
        let result = serde_json::from_str::<ClientConfig>(r#"{"entry_list_cooldown":1e30}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_privileged_port_rejected() {
        let raw = br#"{"updListenerPort": 80, "connectionPassword": "", "commandPassword": ""}"#;
        let err = BroadcastingSettings::from_json_bytes(raw).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
