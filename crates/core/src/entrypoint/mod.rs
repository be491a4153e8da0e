// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Gost Plus Contributors

// Gost Plus - EntryPoint Module
// Local listeners that connect into a remote tunnel through the relay

mod tcp;
mod udp;

pub use tcp::TcpEntryPoint;
pub use udp::UdpEntryPoint;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::options::Options;
use crate::tunnel::{Backend, EntryPoint};

/// Type tags accepted by [`new_entrypoint`]
pub const ENTRYPOINT_TYPES: [&str; 2] = ["tcp", "udp"];

pub(crate) const DEFAULT_ENDPOINT: &str = "localhost:8000";

/// Construct an entrypoint variant from its type tag
pub fn new_entrypoint(kind: &str, options: Options, backend: Backend) -> Result<Arc<EntryPoint>> {
    let entrypoint: Arc<EntryPoint> = match kind {
        "tcp" => Arc::new(TcpEntryPoint::new(options, backend)),
        "udp" => Arc::new(UdpEntryPoint::new(options, backend)),
        other => return Err(Error::UnknownType(other.to_string())),
    };
    Ok(entrypoint)
}

fn closed() -> Error {
    Error::EntryPointClosed
}
