//! Configuration loading.
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! JSON file, and environment variables. The result is validated before any
//! component is built from it.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{PushError, PushResult};
use crate::notifications::dispatcher::DEFAULT_MAX_CONCURRENT_PUSHES;
use crate::notifications::provider::{TokenLifetimes, APPLE_MAX_TOKEN_TTL};
use crate::notifications::signer::{normalize_subject, DEFAULT_SUBJECT};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "pushem.json";

/// Longest token lifetime any provider accepts.
const MAX_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Configuration for the push engine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// VAPID `sub` claim (contact for the push service operator).
    pub vapid_subject: String,
    /// Where the VAPID keypair is persisted.
    pub key_file: PathBuf,
    /// SQLite subscriber database.
    pub database_path: PathBuf,
    /// Ceiling on in-flight deliveries per publish.
    pub max_concurrent_pushes: usize,
    /// Per-request timeout for push delivery, seconds.
    pub request_timeout_secs: u64,
    /// `TTL` header: how long providers keep undelivered messages, seconds.
    pub message_ttl_secs: u32,
    /// Assertion lifetime for standards-following providers, seconds.
    pub token_ttl_secs: u64,
    /// Assertion lifetime for Apple, seconds. Must stay under one hour.
    pub apple_token_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let lifetimes = TokenLifetimes::default();
        Self {
            vapid_subject: DEFAULT_SUBJECT.to_string(),
            key_file: PathBuf::from("vapid_keys.json"),
            database_path: PathBuf::from("pushem.db"),
            max_concurrent_pushes: DEFAULT_MAX_CONCURRENT_PUSHES,
            request_timeout_secs: 30,
            message_ttl_secs: 86400,
            token_ttl_secs: lifetimes.generic.as_secs(),
            apple_token_ttl_secs: lifetimes.apple.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// With `path`, that file must exist. Without it, [`DEFAULT_CONFIG_FILE`]
    /// is read if present. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> PushResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.vapid_subject = normalize_subject(&config.vapid_subject);
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> PushResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| PushError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| PushError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(subject) = var("VAPID_SUBJECT") {
            self.vapid_subject = subject;
        }
        if let Some(key_file) = var("PUSHEM_KEY_FILE") {
            self.key_file = PathBuf::from(key_file);
        }
        if let Some(database_path) = var("PUSHEM_DATABASE_PATH") {
            self.database_path = PathBuf::from(database_path);
        }
        override_parsed(&var, "PUSHEM_MAX_CONCURRENT_PUSHES", &mut self.max_concurrent_pushes);
        override_parsed(&var, "PUSHEM_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        override_parsed(&var, "PUSHEM_MESSAGE_TTL_SECS", &mut self.message_ttl_secs);
        override_parsed(&var, "PUSHEM_TOKEN_TTL_SECS", &mut self.token_ttl_secs);
        override_parsed(&var, "PUSHEM_APPLE_TOKEN_TTL_SECS", &mut self.apple_token_ttl_secs);
    }

    /// Reject values that would produce silently failing deliveries.
    pub fn validate(&self) -> PushResult<()> {
        if self.max_concurrent_pushes == 0 {
            return Err(PushError::Config("max_concurrent_pushes must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(PushError::Config("request_timeout_secs must be at least 1".into()));
        }
        if self.token_ttl_secs == 0 || self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(PushError::Config(format!(
                "token_ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}"
            )));
        }
        let apple_max = APPLE_MAX_TOKEN_TTL.as_secs();
        if self.apple_token_ttl_secs == 0 || self.apple_token_ttl_secs >= apple_max {
            return Err(PushError::Config(format!(
                "apple_token_ttl_secs must be between 1 and {}",
                apple_max - 1
            )));
        }
        Ok(())
    }

    /// Per-request delivery timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Assertion lifetimes per provider family.
    pub fn token_lifetimes(&self) -> TokenLifetimes {
        TokenLifetimes {
            generic: Duration::from_secs(self.token_ttl_secs),
            apple: Duration::from_secs(self.apple_token_ttl_secs),
        }
    }
}

/// Replace `target` with the parsed env value, ignoring unparseable input.
fn override_parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = var(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring invalid {}={:?}", key, raw),
        }
    }
}
