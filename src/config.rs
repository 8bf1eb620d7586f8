//! Process configuration: loaded once at startup from a YAML file into the
//! [`TargetSpec`]/[`NetworkConfig`]/[`NotifyConfig`] the FSM and its
//! collaborators run against (SPEC_FULL.md §6).

use crate::core_types::{ProjectId, SessionId, SkuId};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// An opaque, identity-verified attendee record. The crate never inspects
/// its shape — it is echoed verbatim into the `buyer_info` order payload,
/// exactly as `original_source` serializes its `buyer` dict untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attendee(pub serde_json::Value);

/// Structured paper-delivery address, serialized into `deliver_info` only
/// when the project's snapshot reports `requiresPaperDelivery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub name: String,
    pub phone: String,
    pub province: String,
    pub city: String,
    pub district: String,
    pub addr_detail: String,
}

/// Immutable target description supplied by configuration (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub project_id: ProjectId,
    pub session_id: SessionId,
    pub sku_id: SkuId,
    #[serde(default = "default_order_type")]
    pub order_type: u32,
    #[serde(default = "default_count")]
    pub count: u32,
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub delivery: Option<DeliveryAddress>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub uid: u64,
}

fn default_order_type() -> u32 {
    1
}

fn default_count() -> u32 {
    1
}

impl TargetSpec {
    /// Config-time validation: fatal conditions must never reach the FSM
    /// (Testable Property: "Empty attendee list: fatal at configuration
    /// time, never reaches the FSM").
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attendees.is_empty() {
            return Err(ConfigError::EmptyAttendees);
        }
        if self.count as usize != self.attendees.len() {
            return Err(ConfigError::CountMismatch {
                count: self.count,
                attendees: self.attendees.len(),
            });
        }
        if !self.phone.is_empty() && !(self.phone.len() == 11 && self.phone.bytes().all(|b| b.is_ascii_digit())) {
            return Err(ConfigError::InvalidPhone(self.phone.clone()));
        }
        Ok(())
    }
}

/// HTTP timing and proxy configuration (SPEC_FULL.md §6 "Network").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default = "default_sleep")]
    pub sleep: f64,
    #[serde(default = "default_rest")]
    pub rest: f64,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_timeout() -> f64 {
    5.0
}
fn default_sleep() -> f64 {
    0.8
}
fn default_rest() -> f64 {
    30.0
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            sleep: default_sleep(),
            rest: default_rest(),
            proxy: None,
        }
    }
}

/// Session bootstrap: cookies and extra headers to seed the HTTP client with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub cookie: HashMap<String, String>,
    #[serde(default)]
    pub header: HashMap<String, String>,
}

/// Which challenge resolver provider to use and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMode {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    pub mode: ChallengeMode,
    /// Automatic mode: external solver endpoint, `POST {gt, challenge} -> {validate}`.
    #[serde(default)]
    pub solver_url: Option<String>,
    /// Manual mode: WebDriver endpoint (e.g. `http://localhost:9515`).
    #[serde(default)]
    pub webdriver_url: Option<String>,
    /// Vendor's public geetest site key. Baked-in default, overridable.
    #[serde(default = "default_gt")]
    pub gt: String,
}

fn default_gt() -> String {
    "ac597a4506fee079629df5d8b66dd4fe".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub sender: String,
    pub receivers: Vec<String>,
}

fn default_smtp_port() -> u16 {
    25
}

/// Notification channels fired once the FSM reaches `Done` (SPEC_FULL.md §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub sound: bool,
    #[serde(default)]
    pub pushplus: Option<String>,
    #[serde(default)]
    pub bark: Option<String>,
    #[serde(default)]
    pub dingding: Option<String>,
    #[serde(default)]
    pub wx: Option<String>,
    #[serde(default)]
    pub ftqq: Option<String>,
    #[serde(default)]
    pub mail: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_log_file() -> String {
    "ticket-sentinel.log".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            rotation: default_rotation(),
            json: false,
        }
    }
}

/// Top-level process configuration, loaded from a single YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    pub target: TargetSpec,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: bool,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.display().to_string())
            } else {
                ConfigError::Io(e)
            }
        })?;
        let config: AppConfig = serde_yaml::from_str(&text)?;
        config.target.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_target() -> TargetSpec {
        TargetSpec {
            project_id: 1,
            session_id: 1,
            sku_id: 1,
            order_type: 1,
            count: 1,
            attendees: vec![Attendee(serde_json::json!({"name": "a"}))],
            delivery: None,
            phone: String::new(),
            username: String::new(),
            uid: 0,
        }
    }

    #[test]
    fn rejects_empty_attendee_list() {
        let mut target = minimal_target();
        target.attendees.clear();
        target.count = 0;
        assert!(matches!(target.validate(), Err(ConfigError::EmptyAttendees)));
    }

    #[test]
    fn rejects_count_attendee_mismatch() {
        let mut target = minimal_target();
        target.count = 2;
        assert!(matches!(
            target.validate(),
            Err(ConfigError::CountMismatch { count: 2, attendees: 1 })
        ));
    }

    #[test]
    fn rejects_malformed_phone() {
        let mut target = minimal_target();
        target.phone = "12345".to_string();
        assert!(matches!(target.validate(), Err(ConfigError::InvalidPhone(_))));
    }

    #[test]
    fn accepts_empty_phone() {
        let target = minimal_target();
        assert!(target.validate().is_ok());
    }

    #[test]
    fn accepts_valid_11_digit_phone() {
        let mut target = minimal_target();
        target.phone = "13800001234".to_string();
        assert!(target.validate().is_ok());
    }
}
