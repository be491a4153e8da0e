// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Error types for Gost Plus

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("tunnel closed")]
    TunnelClosed,

    #[error("entrypoint closed")]
    EntryPointClosed,

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("Unknown service type: {0}")]
    UnknownType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Forwarding error: {0}")]
    Forward(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
