//! HTTP Basic authentication fallback
//!
//! Checks username/password pairs against a JSON secrets file, a flat
//! `{"user": "password"}` object. The file is read on every attempt so
//! edits take effect without a restart.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use super::AuthError;

pub struct BasicAuthenticator {
    secrets_path: PathBuf,
}

impl BasicAuthenticator {
    pub fn new(secrets_path: &Path) -> Self {
        Self {
            secrets_path: secrets_path.to_path_buf(),
        }
    }

    /// Verify the base64 payload of a `Basic` Authorization header and
    /// return the authenticated username.
    pub fn authenticate(&self, payload: &str) -> Result<String, AuthError> {
        let decoded = BASE64
            .decode(payload.trim())
            .map_err(|_| AuthError::Unauthorized)?;
        let text = String::from_utf8(decoded).map_err(|_| AuthError::Unauthorized)?;
        let (username, password) = text.split_once(':').ok_or(AuthError::Unauthorized)?;

        let secrets = self.load_secrets()?;
        match secrets.get(username) {
            Some(expected) if expected == password => Ok(username.to_string()),
            _ => Err(AuthError::Unauthorized),
        }
    }

    fn load_secrets(&self) -> Result<HashMap<String, String>, AuthError> {
        let content = fs::read_to_string(&self.secrets_path).map_err(|e| {
            debug!("unable to read secrets file {:?}: {}", self.secrets_path, e);
            AuthError::Unauthorized
        })?;
        serde_json::from_str(&content).map_err(|e| {
            debug!("secrets file {:?} is not valid JSON: {}", self.secrets_path, e);
            AuthError::Unauthorized
        })
    }
}
