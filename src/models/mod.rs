// SPDX-License-Identifier: GPL-2.0-or-later

//! Declarative template data model. The YAML loader is an external
//! collaborator; the serde derives on these types are its contract.

mod dns;
mod http;
mod network;
mod target;

pub use dns::{DnsRecordType, DnsRequest};
pub use http::{HttpMethod, HttpRequest, SignatureType};
pub use network::{AddressEntry, NetworkInput, NetworkInputKind, NetworkRequest};
pub use target::Target;

use std::fmt::Display;

/// Protocol of a template request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Dns,
    Http,
    Network,
}

impl AsRef<str> for Protocol {
    fn as_ref(&self) -> &str {
        match self {
            Protocol::Dns => "dns",
            Protocol::Http => "http",
            Protocol::Network => "network",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}
