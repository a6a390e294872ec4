//! Persisted login session.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{SessionTokens, XrpcClient};
use crate::config::Config;
use crate::error::{HcError, Result};

/// Everything needed to resume, refresh or redo a password login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub did: String,
    pub pds: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub password: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthSession {
    fn apply(&mut self, tokens: SessionTokens) {
        self.did = tokens.did;
        if !tokens.handle.is_empty() {
            self.handle = tokens.handle;
        }
        self.access_token = tokens.access_jwt;
        self.refresh_token = tokens.refresh_jwt;
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<AuthSession> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(HcError::NotLoggedIn),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the session, readable by the current user only.
    pub fn persist(&self, session: &AuthSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.path)?;
        file.write_all(serde_json::to_string_pretty(session)?.as_bytes())?;
        file.flush()?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Remove the session file; a missing file is not an error.
    pub fn wipe(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist_refreshed(&self, session: &AuthSession) {
        if let Err(e) = self.persist(session) {
            warn!(error = %e, "failed to save refreshed auth session data");
        }
    }
}

/// Log in with a password and save the resulting session.
pub async fn login(
    config: &Config,
    store: &SessionStore,
    identifier: &str,
    password: &str,
) -> Result<(XrpcClient, AuthSession)> {
    let client = XrpcClient::new(&config.pds_host, &config.user_agent())?;
    let tokens = client.create_session(identifier, password).await?;

    let mut session = AuthSession {
        pds: client.host().to_string(),
        password: password.to_string(),
        ..Default::default()
    };
    session.apply(tokens);
    store.persist(&session)?;
    info!(did = %session.did, "logged in");

    let client = client.with_session(&session.did, &session.access_token);
    Ok((client, session))
}

/// An authenticated client.
///
/// Explicit credentials in `config` give an ephemeral login that never
/// touches the session file. Otherwise the saved session is resumed,
/// refreshed, or as a last resort replayed with the stored password.
pub async fn login_or_load(config: &Config, store: &SessionStore) -> Result<XrpcClient> {
    let user_agent = config.user_agent();

    if let Some((username, password)) = config.credentials() {
        let client = XrpcClient::new(&config.pds_host, &user_agent)?;
        let tokens = client.create_session(username, password).await?;
        return Ok(client.with_session(tokens.did, tokens.access_jwt));
    }

    let mut session = store.load()?;
    let host = if session.pds.is_empty() {
        config.pds_host.as_str()
    } else {
        session.pds.as_str()
    };
    let base = XrpcClient::new(host, &user_agent)?;

    let resumed = base.clone().with_session(&session.did, &session.access_token);
    match resumed.get_session().await {
        Ok(_) => return Ok(resumed),
        Err(e) => debug!(error = %e, "saved access token rejected"),
    }

    match base.refresh_session(&session.refresh_token).await {
        Ok(tokens) => {
            session.apply(tokens);
            store.persist_refreshed(&session);
            return Ok(base.with_session(&session.did, &session.access_token));
        }
        Err(e) => debug!(error = %e, "refresh token rejected"),
    }

    if session.password.is_empty() {
        return Err(HcError::Auth("session expired (run: hc account login)".into()));
    }
    let tokens = base.create_session(&session.did, &session.password).await?;
    session.apply(tokens);
    store.persist_refreshed(&session);
    Ok(base.with_session(&session.did, &session.access_token))
}
