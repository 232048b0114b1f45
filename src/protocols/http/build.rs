// SPDX-License-Identifier: GPL-2.0-or-later

//! Compilation of one HTTP template iteration into a concrete request.
//!
//! Two paths exist: the model path composes a URL from `{{BaseURL}}`
//! style templates with query parameter merging, the raw path parses a
//! raw request blob. Unsafe requests additionally keep the evaluated
//! blob verbatim for wire replay through the non-conforming framer.

use lazy_regex::{lazy_regex, Lazy};
use rand::seq::SliceRandom;
use regex::Regex;
use url::Url;

use crate::models::{HttpRequest, Target};
use crate::vars::{self, Variables};

use super::super::{utils, ExecutorOptions, RequestError};
use super::raw;

static URL_WITH_PORT: Lazy<Regex> = lazy_regex!(r"\{\{BaseURL\}\}:(\d+)");

/// User agents picked for requests that neither run unsafe nor carry
/// their own User-Agent header.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.2365.92",
];

/// A compiled request ready for dispatch.
#[derive(Debug, Clone)]
pub struct GeneratedRequest {
    pub method: String,
    pub url: Url,
    /// Headers in application order.
    pub headers: Vec<(String, String)>,
    /// Explicit request host, set by a `Host` header.
    pub host: Option<String>,
    pub body: Vec<u8>,
    /// The evaluated blob for unsafe wire replay.
    pub raw_bytes: Option<Vec<u8>>,
    pub close_connection: bool,
    pub digest_auth: Option<(String, String)>,
    /// The payload values this variant was generated from.
    pub meta: Variables,
    /// The final merged variable mapping used during construction.
    pub dynamic_values: Variables,
    pub interactsh_urls: Vec<String>,
}

/// Builds generated requests for one template iteration.
pub struct RequestBuilder<'a> {
    request: &'a HttpRequest,
    options: &'a ExecutorOptions,
    interactsh_urls: Vec<String>,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(request: &'a HttpRequest, options: &'a ExecutorOptions) -> Self {
        Self {
            request,
            options,
            interactsh_urls: Vec::new(),
        }
    }

    /// Compiles `data` (a path template or raw blob) for the input.
    pub fn make(
        mut self,
        input: &Target,
        data: &str,
        mut payloads: Variables,
        dynamic: &Variables,
    ) -> Result<GeneratedRequest, RequestError> {
        if self.request.self_contained {
            return self.make_self_contained(data, payloads, dynamic);
        }
        let mut data = data.to_string();
        if let Some(oast) = &self.options.interactsh {
            let (rewritten, urls) = oast.replace(&data, std::mem::take(&mut self.interactsh_urls));
            data = rewritten;
            self.interactsh_urls = urls;
            payloads = self.replace_payload_markers(payloads);
        }
        let mut parsed = Url::parse(&input.input)
            .map_err(|e| RequestError::Configuration(format!("invalid target url: {e}")))?;

        // a {{BaseURL}}:port token overrides the input port
        data = use_port_from_payload(&mut parsed, &data);
        if !self.request.is_raw() {
            data = add_params_to_base_url(&data, &mut parsed);
        }
        let trailing_slash =
            !self.request.is_raw() && parsed.path().ends_with('/') && data.contains("{{BaseURL}}/");

        let url_vars =
            utils::generate_variables_with_url(&parsed, trailing_slash, Some(&input.template_ctx));
        let values = Variables::merged(&[
            &Variables::merged(&[dynamic, &url_vars]),
            &self.options.options.vars,
        ]);

        if self.request.is_raw() {
            self.make_from_raw(&parsed, &data, values, payloads)
        } else {
            self.make_from_model(&data, values, payloads)
        }
    }

    fn make_self_contained(
        mut self,
        data: &str,
        payloads: Variables,
        dynamic: &Variables,
    ) -> Result<GeneratedRequest, RequestError> {
        if self.request.is_raw() {
            let (_, target) = raw::request_line(data)?;
            let mut values = Variables::merged(&[&payloads, &self.options.options.vars]);
            if let Some(signature) = self.request.signature {
                // signing variables fall back to defaults when missing
                let mut defaults = Variables::new();
                for (name, value) in signature.variable_defaults() {
                    if !values.contains(name) {
                        defaults.insert(*name, *value);
                    }
                }
                values = Variables::merged(&[&defaults, &values]);
            }
            let mut target = vars::replace(&target, &values);
            if !dynamic.is_empty() {
                target = vars::replace(&target, dynamic);
            }
            match self.request.signature {
                Some(signature) => {
                    vars::contains_variables_with_ignore_list(signature.skip_list(), &target)?
                }
                None => vars::contains_unresolved_variables(&target)?,
            }
            let parsed = Url::parse(&target)
                .map_err(|e| RequestError::Build(format!("could not parse request URL: {e}")))?;
            let url_vars = utils::generate_variables_with_url(&parsed, false, None);
            let values =
                Variables::merged(&[&Variables::merged(&[dynamic, &url_vars]), &values]);
            self.make_from_raw(&parsed, data, values, payloads)
        } else {
            let values = Variables::merged(&[dynamic, &self.options.options.vars]);
            self.make_from_model(data, values, payloads)
        }
    }

    fn make_from_model(
        mut self,
        data: &str,
        values: Variables,
        payloads: Variables,
    ) -> Result<GeneratedRequest, RequestError> {
        let mut data = data.to_string();
        if let Some(oast) = &self.options.interactsh {
            let (rewritten, urls) = oast.replace(&data, std::mem::take(&mut self.interactsh_urls));
            data = rewritten;
            self.interactsh_urls = urls;
        }
        let final_values = Variables::merged(&[&payloads, &values]);
        let data = vars::evaluate(&data, &final_values)
            .map_err(|e| RequestError::Build(format!("could not evaluate helper expressions: {e}")))?;
        let method = vars::evaluate(self.request.method.as_ref(), &final_values)
            .map_err(|e| RequestError::Build(format!("could not evaluate helper expressions: {e}")))?;
        let url = Url::parse(&data)
            .map_err(|e| RequestError::Build(format!("could not parse built url {data}: {e}")))?;
        self.fill_request(method, url, Vec::new(), None, final_values, payloads)
    }

    fn make_from_raw(
        mut self,
        parsed: &Url,
        data: &str,
        values: Variables,
        payloads: Variables,
    ) -> Result<GeneratedRequest, RequestError> {
        let mut data = data.to_string();
        if let Some(oast) = &self.options.interactsh {
            let (rewritten, urls) = oast.replace(&data, std::mem::take(&mut self.interactsh_urls));
            data = rewritten;
            self.interactsh_urls = urls;
        }
        let final_values = Variables::merged(&[&payloads, &values]);
        let evaluated = vars::evaluate(&data, &final_values)
            .map_err(|e| RequestError::Build(format!("could not evaluate helper expressions: {e}")))?;
        let raw_request = raw::parse(&evaluated, parsed)?;
        let url = Url::parse(&raw_request.full_url)
            .map_err(|e| RequestError::Build(format!("could not parse raw url: {e}")))?;

        if self.request.unsafe_raw {
            let blob: String = evaluated
                .lines()
                .filter(|line| !line.starts_with('@'))
                .collect::<Vec<_>>()
                .join("\r\n");
            return Ok(GeneratedRequest {
                method: raw_request.method,
                url,
                headers: raw_request.headers,
                host: None,
                body: raw_request.body.into_bytes(),
                raw_bytes: Some(blob.into_bytes()),
                close_connection: false,
                digest_auth: self.digest_auth(),
                meta: payloads,
                dynamic_values: final_values,
                interactsh_urls: self.interactsh_urls,
            });
        }

        let mut host = None;
        for (name, value) in &raw_request.headers {
            if name.eq_ignore_ascii_case("Host") {
                host = Some(value.clone());
            }
        }
        let mut generated = self.fill_request(
            raw_request.method,
            url,
            raw_request.headers,
            Some(raw_request.body),
            final_values,
            payloads,
        )?;
        if generated.host.is_none() {
            generated.host = host;
        }
        Ok(generated)
    }

    /// Applies headers, body and implicit request attributes.
    fn fill_request(
        self,
        method: String,
        url: Url,
        mut headers: Vec<(String, String)>,
        raw_body: Option<String>,
        values: Variables,
        payloads: Variables,
    ) -> Result<GeneratedRequest, RequestError> {
        let digest_auth = self.digest_auth();
        let mut host = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("Host"))
            .map(|(_, value)| value.clone());
        let mut interactsh_urls = self.interactsh_urls;

        for (name, value) in &self.request.headers {
            let mut value = value.clone();
            if let Some(oast) = &self.options.interactsh {
                let (rewritten, urls) = oast.replace(&value, std::mem::take(&mut interactsh_urls));
                value = rewritten;
                interactsh_urls = urls;
            }
            let value = vars::evaluate(&value, &values).map_err(|e| {
                RequestError::Build(format!("could not evaluate helper expressions: {e}"))
            })?;
            set_or_replace(&mut headers, name, &value);
            if name.eq_ignore_ascii_case("Host") {
                host = Some(value);
            }
        }

        // with multiple threads the underlying connection should remain
        // open to allow reuse
        let close_connection =
            self.request.threads == 0 && !has_header(&headers, "Connection");

        let mut body = raw_body.unwrap_or_default();
        if !self.request.body.is_empty() {
            let mut template_body = self.request.body.clone();
            if let Some(oast) = &self.options.interactsh {
                let (rewritten, urls) =
                    oast.replace(&template_body, std::mem::take(&mut interactsh_urls));
                template_body = rewritten;
                interactsh_urls = urls;
            }
            body = vars::evaluate(&template_body, &values).map_err(|e| {
                RequestError::Build(format!("could not evaluate helper expressions: {e}"))
            })?;
        }

        if !self.request.unsafe_raw && !has_header(&headers, "User-Agent") {
            let agent = USER_AGENTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(USER_AGENTS[0]);
            headers.push(("User-Agent".to_string(), agent.to_string()));
        }
        if !self.request.is_raw() && !self.request.unsafe_raw {
            if !has_header(&headers, "Accept") {
                headers.push(("Accept".to_string(), "*/*".to_string()));
            }
            if !has_header(&headers, "Accept-Language") {
                headers.push(("Accept-Language".to_string(), "en".to_string()));
            }
        }

        if let Some(h) = &host {
            let stripped = match url.scheme() {
                "http" => h.strip_suffix(":80"),
                "https" => h.strip_suffix(":443"),
                _ => None,
            };
            if let Some(stripped) = stripped {
                host = Some(stripped.to_string());
            }
        }

        if self.options.auth.is_some() && !has_header(&headers, "Authorization") {
            if let Some(strategy) = self
                .options
                .auth
                .as_ref()
                .and_then(|provider| provider.lookup_url(&url))
            {
                let (name, value) = strategy.header();
                headers.push((name, value));
            }
        }

        Ok(GeneratedRequest {
            method,
            url,
            headers,
            host,
            body: body.into_bytes(),
            raw_bytes: None,
            close_connection,
            digest_auth,
            meta: payloads,
            dynamic_values: values,
            interactsh_urls,
        })
    }

    fn digest_auth(&self) -> Option<(String, String)> {
        if self.request.digest_username.is_empty() {
            None
        } else {
            Some((
                self.request.digest_username.clone(),
                self.request.digest_password.clone(),
            ))
        }
    }

    fn replace_payload_markers(&mut self, payloads: Variables) -> Variables {
        let Some(oast) = &self.options.interactsh else {
            return payloads;
        };
        let mut out = Variables::new();
        for (name, value) in payloads.iter() {
            let (rewritten, urls) = oast.replace(
                &value.to_string(),
                std::mem::take(&mut self.interactsh_urls),
            );
            self.interactsh_urls = urls;
            out.insert(name.clone(), rewritten);
        }
        out
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

fn set_or_replace(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    for (n, v) in headers.iter_mut() {
        if n.eq_ignore_ascii_case(name) {
            *v = value.to_string();
            return;
        }
    }
    headers.push((name.to_string(), value.to_string()));
}

/// Overrides the input port when the template data carries a
/// `{{BaseURL}}:port` token; the token's port suffix is removed from the
/// template before substitution.
fn use_port_from_payload(parsed: &mut Url, data: &str) -> String {
    if let Some(caps) = URL_WITH_PORT.captures(data) {
        let port = caps.get(1).unwrap().as_str();
        let _ = parsed.set_port(port.parse().ok());
        return data.replacen(&format!(":{port}"), "", 1);
    }
    data.to_string()
}

/// Merges input URL query parameters into the template data, keeping the
/// template's parameter order; a colliding key only takes the input
/// value when the template declared it empty.
fn add_params_to_base_url(data: &str, parsed: &mut Url) -> String {
    let payload_path = match data.strip_prefix("{{BaseURL}}") {
        Some(path) => path,
        None => return data.to_string(),
    };
    if parsed.path().ends_with('/') && payload_path.starts_with('/') {
        // keep the payload intact, trim the extra slash from the input
        let trimmed = parsed.path().trim_end_matches('/').to_string();
        parsed.set_path(&trimmed);
    }
    if payload_path.is_empty() {
        return data.to_string();
    }
    let input_params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if input_params.is_empty() {
        return data.to_string();
    }

    let (path, template_query) = match payload_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (payload_path, ""),
    };
    let mut params: Vec<(String, String)> = template_query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect();
    for (key, value) in input_params {
        match params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) if existing.is_empty() => *existing = value,
            Some(_) => {}
            None => params.push((key, value)),
        }
    }
    let query = params
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join("&");
    parsed.set_query(None);
    format!("{{{{BaseURL}}}}{path}?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_from_payload_overrides_input() {
        let mut parsed = Url::parse("http://host.example").unwrap();
        let data = use_port_from_payload(&mut parsed, "{{BaseURL}}:8080/admin");
        assert_eq!(data, "{{BaseURL}}/admin");
        assert_eq!(parsed.port(), Some(8080));
    }

    #[test]
    fn param_merge_keeps_template_order() {
        let mut parsed = Url::parse("http://host.example/?input=1&shared=from_input").unwrap();
        let data = add_params_to_base_url("{{BaseURL}}/search?tpl=a&shared=from_template", &mut parsed);
        assert_eq!(
            data,
            "{{BaseURL}}/search?tpl=a&shared=from_template&input=1"
        );
    }

    #[test]
    fn empty_template_param_is_filled_from_input() {
        let mut parsed = Url::parse("http://host.example/?shared=input_value").unwrap();
        let data = add_params_to_base_url("{{BaseURL}}/search?shared=", &mut parsed);
        assert_eq!(data, "{{BaseURL}}/search?shared=input_value");
    }

    #[test]
    fn trailing_slash_is_deduplicated() {
        let mut parsed = Url::parse("http://host.example/app/?x=1").unwrap();
        let _ = add_params_to_base_url("{{BaseURL}}/admin", &mut parsed);
        assert_eq!(parsed.path(), "/app");
    }
}
