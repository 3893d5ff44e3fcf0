//! Short-lived credentials authorizing a realtime session
//!
//! Issuing credentials is an external concern; the engine only asks a
//! `CredentialProvider` for one per connect and never refreshes it.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Bearer credential for the realtime backend
#[derive(Clone)]
pub struct Credential {
    pub api_key: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(api_key: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            api_key: api_key.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining(&self) -> Option<std::time::Duration> {
        (self.expires_at - Utc::now()).to_std().ok()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of realtime credentials
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn issue_realtime_credential(&self) -> Result<Credential>;
}

/// Hands out a fixed key with a rolling expiry
pub struct StaticCredentialProvider {
    api_key: String,
    ttl: chrono::Duration,
}

impl StaticCredentialProvider {
    pub fn new(api_key: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            api_key: api_key.into(),
            ttl,
        }
    }

    /// Read the key from an environment variable
    pub fn from_env(var: &str, ttl: chrono::Duration) -> Result<Self> {
        let api_key = std::env::var(var)
            .map_err(|_| Error::Config(format!("environment variable {var} is not set")))?;
        Ok(Self::new(api_key, ttl))
    }
}

#[async_trait::async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn issue_realtime_credential(&self) -> Result<Credential> {
        if self.api_key.is_empty() {
            return Err(Error::Config("realtime API key is empty".to_string()));
        }
        Ok(Credential::new(self.api_key.clone(), Utc::now() + self.ttl))
    }
}
