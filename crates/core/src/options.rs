// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - Options Module
// Construction options shared by tunnels and entrypoints

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::TunnelConfig;

/// Option values for one tunnel or entrypoint
///
/// Constructors normalize these once; afterwards they never change for the
/// lifetime of the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Lowercase UUID; generated when empty
    pub id: String,
    pub name: String,
    /// Local resource: a directory, or the address to expose or listen on
    pub endpoint: String,
    /// Remote bind address or Host header override
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub enable_tls: bool,
    pub keepalive: bool,
    /// UDP session idle timeout
    pub ttl: Duration,
    pub created_at: Option<DateTime<Utc>>,
}

impl Options {
    /// Options as persisted in a config record
    pub fn from_record(record: &TunnelConfig) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            endpoint: record.endpoint.clone(),
            hostname: record.hostname.clone(),
            username: record.username.clone(),
            password: record.password.clone(),
            enable_tls: record.enable_tls,
            keepalive: record.keepalive,
            ttl: Duration::from_secs(record.ttl),
            created_at: record.created_at,
        }
    }

    /// Fill in identity and defaults
    pub(crate) fn normalize(mut self, default_endpoint: impl FnOnce() -> String) -> Self {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        self.id = self.id.to_lowercase();

        if self.endpoint.is_empty() {
            self.endpoint = default_endpoint();
        }
        if self.name.is_empty() {
            self.name = endpoint_token(&self.id);
        }
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
        self
    }

    /// Short public token for this id
    pub fn token(&self) -> String {
        endpoint_token(&self.id)
    }
}

/// First 8 hex chars of `md5(id)`; part of the public relay address
pub fn endpoint_token(id: &str) -> String {
    let digest = format!("{:x}", md5::compute(id.as_bytes()));
    digest[..8].to_string()
}
