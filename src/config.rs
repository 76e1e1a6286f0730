use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;

/// Which AI CLI a command should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
}

impl Provider {
    pub fn binary_name(self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Codex => "codex",
        }
    }
}

/// Process-wide configuration, loaded once at startup from the environment.
///
/// Mirrors the environment table in the system's external-interfaces
/// specification: ports, work directories, provider selection, legacy and
/// platform credential sources, and the session/workspace lifetime knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default = "default_provider")]
    pub ai_executor: Provider,

    #[serde(default = "default_provider")]
    pub code_review_executor: Provider,

    #[serde(default)]
    pub anthropic_base_url: Option<String>,
    #[serde(default)]
    pub anthropic_auth_token: Option<String>,

    // Legacy, process-wide credential fallback.
    #[serde(default)]
    pub gitlab_base_url: Option<String>,
    #[serde(default)]
    pub gitlab_token: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,

    // Recognized but advisory: see SPEC_FULL.md section 6.1.
    #[serde(default)]
    pub mongodb_uri: Option<String>,
    #[serde(default)]
    pub mongodb_db: Option<String>,

    /// Passphrase the secret vault's AES-256 key is derived from (SHA-256 of
    /// this string). Required: without it no tenant secret can be read back.
    pub encryption_key: String,

    #[serde(default = "default_true")]
    pub session_enabled: bool,
    #[serde(
        default = "default_session_max_idle",
        deserialize_with = "deserialize_duration"
    )]
    pub session_max_idle_time: Duration,
    #[serde(default = "default_max_sessions")]
    pub session_max_sessions: usize,
    #[serde(
        default = "default_session_cleanup_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub session_cleanup_interval: Duration,
    #[serde(default)]
    pub session_store_path: Option<String>,

    #[serde(
        default = "default_workspace_max_idle",
        deserialize_with = "deserialize_duration"
    )]
    pub workspace_max_idle_time: Duration,
    #[serde(
        default = "default_workspace_cleanup_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub workspace_cleanup_interval: Duration,
}

fn default_port() -> u16 {
    3000
}
fn default_work_dir() -> String {
    "/tmp/gitlab-copilot-work".to_string()
}
fn default_database_path() -> String {
    "./data/dispatcher.db".to_string()
}
fn default_provider() -> Provider {
    Provider::Claude
}
fn default_true() -> bool {
    true
}
fn default_session_max_idle() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}
fn default_max_sessions() -> usize {
    1000
}
fn default_session_cleanup_interval() -> Duration {
    Duration::from_secs(60 * 60)
}
fn default_workspace_max_idle() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}
fn default_workspace_cleanup_interval() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

/// Timer precision bound common async runtimes accept for a single interval.
const MAX_TIMER_MS: u128 = i32::MAX as u128;

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration_string(&raw).map_err(serde::de::Error::custom)
}

/// Parses `<n>{d|h|m|s}` (e.g. `"7d"`, `"90m"`) or a plain integer number of
/// milliseconds.
pub fn parse_duration_string(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("duration string is empty".to_string());
    }

    let (digits, unit_ms) = match raw.chars().last().unwrap() {
        'd' => (&raw[..raw.len() - 1], 24 * 60 * 60 * 1000),
        'h' => (&raw[..raw.len() - 1], 60 * 60 * 1000),
        'm' => (&raw[..raw.len() - 1], 60 * 1000),
        's' => (&raw[..raw.len() - 1], 1000),
        _ => (raw, 1),
    };

    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration string: {raw:?}"))?;
    Ok(Duration::from_millis(n * unit_ms))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration from environment: {0}")]
    Env(#[from] envy::Error),
    #[error(
        "neither legacy credentials (GITLAB_BASE_URL/GITLAB_TOKEN/WEBHOOK_SECRET) nor platform \
         credentials are configured; at least one tenant source is required"
    )]
    NoCredentialSource,
    #[error("{field} must be at least one minute, got {millis}ms")]
    DurationTooShort { field: &'static str, millis: u128 },
    #[error("{field} exceeds the maximum interval a timer can represent ({millis}ms)")]
    DurationTooLong { field: &'static str, millis: u128 },
    #[error("PORT {0} is out of range")]
    PortOutOfRange(u16),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let legacy_complete = self.gitlab_base_url.is_some()
            && self.gitlab_token.is_some()
            && self.webhook_secret.is_some();
        // Platform-mode credentials are read per-tenant from the tenant
        // store; a configured encryption key is the signal that the
        // platform credential source is available at all.
        let platform_available = !self.encryption_key.is_empty();
        if !legacy_complete && !platform_available {
            return Err(ConfigError::NoCredentialSource);
        }

        if self.port == 0 {
            return Err(ConfigError::PortOutOfRange(self.port));
        }

        let one_minute = Duration::from_secs(60).as_millis();
        for (field, d) in [
            ("SESSION_MAX_IDLE_TIME", self.session_max_idle_time),
            ("WORKSPACE_MAX_IDLE_TIME", self.workspace_max_idle_time),
        ] {
            if d.as_millis() < one_minute {
                return Err(ConfigError::DurationTooShort {
                    field,
                    millis: d.as_millis(),
                });
            }
        }

        for (field, d) in [
            ("SESSION_CLEANUP_INTERVAL", self.session_cleanup_interval),
            (
                "WORKSPACE_CLEANUP_INTERVAL",
                self.workspace_cleanup_interval,
            ),
        ] {
            if d.as_millis() < one_minute {
                return Err(ConfigError::DurationTooShort {
                    field,
                    millis: d.as_millis(),
                });
            }
            if d.as_millis() > MAX_TIMER_MS {
                return Err(ConfigError::DurationTooLong {
                    field,
                    millis: d.as_millis(),
                });
            }
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_hour_minute_second_suffixes() {
        assert_eq!(parse_duration_string("7d").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(parse_duration_string("2h").unwrap(), Duration::from_secs(2 * 3600));
        assert_eq!(parse_duration_string("90m").unwrap(), Duration::from_secs(90 * 60));
        assert_eq!(parse_duration_string("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parses_plain_milliseconds() {
        assert_eq!(parse_duration_string("1500").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration_string("soon").is_err());
        assert!(parse_duration_string("").is_err());
    }

    fn base() -> Config {
        Config {
            port: 3000,
            work_dir: "/tmp/work".into(),
            database_path: ":memory:".into(),
            log_level: None,
            ai_executor: Provider::Claude,
            code_review_executor: Provider::Claude,
            anthropic_base_url: None,
            anthropic_auth_token: None,
            gitlab_base_url: None,
            gitlab_token: None,
            webhook_secret: None,
            mongodb_uri: None,
            mongodb_db: None,
            encryption_key: "k".into(),
            session_enabled: true,
            session_max_idle_time: Duration::from_secs(86400),
            session_max_sessions: 1000,
            session_cleanup_interval: Duration::from_secs(3600),
            session_store_path: None,
            workspace_max_idle_time: Duration::from_secs(86400),
            workspace_cleanup_interval: Duration::from_secs(3600),
        }
    }

    #[test]
    fn rejects_when_no_credential_source_is_configured() {
        let mut c = base();
        c.encryption_key = String::new();
        assert!(matches!(c.validate(), Err(ConfigError::NoCredentialSource)));
    }

    #[test]
    fn accepts_legacy_only_configuration() {
        let mut c = base();
        c.encryption_key = String::new();
        c.gitlab_base_url = Some("https://gitlab.example.com".into());
        c.gitlab_token = Some("tok".into());
        c.webhook_secret = Some("sec".into());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn rejects_too_short_idle_time() {
        let mut c = base();
        c.session_max_idle_time = Duration::from_secs(5);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::DurationTooShort { .. })
        ));
    }
}
