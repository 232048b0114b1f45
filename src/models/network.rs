// SPDX-License-Identifier: GPL-2.0-or-later

use serde::Deserialize;

use crate::generators::PayloadSet;

/// One address entry of a network template. The host part may embed
/// template variables (typically `{{Hostname}}`).
#[derive(Debug, Clone, Deserialize)]
pub struct AddressEntry {
    pub address: String,
    #[serde(default)]
    pub tls: bool,
}

/// Encoding of a network input's data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkInputKind {
    #[default]
    Plain,
    Hex,
}

/// A single write (and optional sized read) on the raw TCP conversation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInput {
    /// Data to send; evaluated against the merged variables first.
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "type")]
    pub kind: NetworkInputKind,
    /// Bytes to read back after the write; 0 reads nothing.
    #[serde(default)]
    pub read: usize,
    /// Capture name: the bytes read are bound to this variable for
    /// later inputs and the emitted event.
    #[serde(default)]
    pub name: Option<String>,
}

/// A raw TCP protocol request template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkRequest {
    /// Candidate ports; more than one triggers the open-port scan.
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default, rename = "exclude-ports")]
    pub exclude_ports: Vec<u16>,
    /// Addresses to talk to, usually referring to `{{Hostname}}`.
    #[serde(default, rename = "host")]
    pub addresses: Vec<AddressEntry>,
    #[serde(default)]
    pub inputs: Vec<NetworkInput>,
    /// Size of the final read; defaults to 1024 bytes.
    #[serde(default, rename = "read-size")]
    pub read_size: usize,
    /// Drain the connection instead of a sized final read.
    #[serde(default, rename = "read-all")]
    pub read_all: bool,
    /// The template carries its own absolute addresses.
    #[serde(default, rename = "self-contained")]
    pub self_contained: bool,
    /// Worker pool size for payload iteration.
    #[serde(default)]
    pub threads: usize,
    #[serde(default, flatten)]
    pub payloads: PayloadSet,
}
