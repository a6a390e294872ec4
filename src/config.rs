//! Runtime configuration

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PDS_HOST: &str = "https://bsky.social";
pub const DEFAULT_CONSTELLATION_URL: &str = "https://constellation.microcosm.blue";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

const SESSION_FILE: &str = "hc/auth-session.json";

#[derive(Debug, Clone)]
pub struct Config {
    /// PDS used for login and, after login, for every repository call
    pub pds_host: String,

    /// Base URL of the remote backlink index
    pub constellation_url: String,

    /// Filter directive for the tracing subscriber
    pub log_level: String,

    /// Ephemeral credentials; when both are set no session file is read or written
    pub username: Option<String>,
    pub password: Option<String>,

    /// Location of the persisted auth session
    pub session_file: PathBuf,

    /// Timeout applied to every backlink index request
    pub index_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pds_host: DEFAULT_PDS_HOST.to_string(),
            constellation_url: DEFAULT_CONSTELLATION_URL.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            username: None,
            password: None,
            session_file: default_session_file(),
            index_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn user_agent(&self) -> String {
        format!("hc/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Username and password, when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }
}

/// `$XDG_STATE_HOME/hc/auth-session.json`, falling back to the local data
/// directory on platforms without a state dir.
pub fn default_session_file() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(SESSION_FILE)
}
