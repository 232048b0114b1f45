// SPDX-License-Identifier: GPL-2.0-or-later

use hickory_resolver::proto::rr::RecordType;
use serde::Deserialize;

use crate::generators::PayloadSet;

/// DNS record types a template may query for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DnsRecordType {
    #[default]
    A,
    Aaaa,
    Cname,
    Ns,
    Txt,
    Soa,
    Ptr,
    Mx,
    Srv,
    Caa,
    Any,
}

impl From<DnsRecordType> for RecordType {
    fn from(value: DnsRecordType) -> Self {
        match value {
            DnsRecordType::A => RecordType::A,
            DnsRecordType::Aaaa => RecordType::AAAA,
            DnsRecordType::Cname => RecordType::CNAME,
            DnsRecordType::Ns => RecordType::NS,
            DnsRecordType::Txt => RecordType::TXT,
            DnsRecordType::Soa => RecordType::SOA,
            DnsRecordType::Ptr => RecordType::PTR,
            DnsRecordType::Mx => RecordType::MX,
            DnsRecordType::Srv => RecordType::SRV,
            DnsRecordType::Caa => RecordType::CAA,
            DnsRecordType::Any => RecordType::ANY,
        }
    }
}

/// A DNS protocol request template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsRequest {
    /// Question name template, e.g. `{{FQDN}}`.
    pub name: String,
    #[serde(default, rename = "type")]
    pub record_type: DnsRecordType,
    /// Resolver override list; entries may contain template variables.
    #[serde(default)]
    pub resolvers: Vec<String>,
    /// Number of retries per query.
    #[serde(default = "default_retries")]
    pub retries: usize,
    /// Whether to ask for recursive resolution.
    #[serde(default = "default_recursion")]
    pub recursion: bool,
    /// Perform an iterative trace from the root servers.
    #[serde(default)]
    pub trace: bool,
    #[serde(default = "default_trace_max_recursion", rename = "trace-max-recursion")]
    pub trace_max_recursion: usize,
    /// Worker pool size for payload iteration.
    #[serde(default)]
    pub threads: usize,
    #[serde(default, flatten)]
    pub payloads: PayloadSet,
}

fn default_retries() -> usize {
    1
}

fn default_recursion() -> bool {
    true
}

fn default_trace_max_recursion() -> usize {
    32
}
