// SPDX-License-Identifier: GPL-2.0-or-later

use serde::Deserialize;

use crate::generators::PayloadSet;

/// HTTP request methods supported by templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Trace,
}

impl AsRef<str> for HttpMethod {
    fn as_ref(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
        }
    }
}

/// Request signing kinds. Signing itself happens outside the core; the
/// kind determines which placeholders the unresolved check ignores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureType {
    Aws,
}

impl SignatureType {
    /// Placeholders the signer fills in later.
    pub fn skip_list(&self) -> &'static [&'static str] {
        match self {
            SignatureType::Aws => &["region", "service"],
        }
    }

    /// Default values applied when the template misses them.
    pub fn variable_defaults(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            SignatureType::Aws => &[("region", "us-east-2")],
        }
    }
}

/// An HTTP protocol request template: either a list of paths relative to
/// the input URL or a list of raw request blobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpRequest {
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub raw: Vec<String>,
    #[serde(default)]
    pub method: HttpMethod,
    /// Headers in declaration order.
    #[serde(default, deserialize_with = "ordered_headers")]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
    /// Use the non-conforming framer, preserving malformed constructions.
    #[serde(default, rename = "unsafe")]
    pub unsafe_raw: bool,
    /// Gate parallel request bodies to approximate simultaneous arrival.
    #[serde(default)]
    pub race: bool,
    #[serde(default, rename = "race_count")]
    pub race_count: usize,
    /// The raw request embeds its own absolute URL.
    #[serde(default, rename = "self-contained")]
    pub self_contained: bool,
    #[serde(default, rename = "digest-username")]
    pub digest_username: String,
    #[serde(default, rename = "digest-password")]
    pub digest_password: String,
    #[serde(default)]
    pub signature: Option<SignatureType>,
    /// Worker pool size for payload iteration.
    #[serde(default)]
    pub threads: usize,
    #[serde(default, flatten)]
    pub payloads: PayloadSet,
}

impl HttpRequest {
    pub fn is_raw(&self) -> bool {
        !self.raw.is_empty()
    }

    /// The template iterations: paths for model requests, blobs for raw.
    pub fn iterations(&self) -> &[String] {
        if self.is_raw() {
            &self.raw
        } else {
            &self.path
        }
    }
}

/// Deserializes the header mapping while keeping declaration order;
/// headers are applied to requests in the order the template wrote them.
fn ordered_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Headers;

    impl<'de> serde::de::Visitor<'de> for Headers {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a mapping of header names to values")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                out.push(entry);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(Headers)
}
