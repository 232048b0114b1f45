// SPDX-License-Identifier: GPL-2.0-or-later

//! Placeholder substitution. Both `{{name}}` and `§name§` markers are
//! recognized; unknown names are left untouched so that the unresolved
//! variable check can reject the request later.

use lazy_regex::{lazy_regex, Lazy};
use regex::bytes::Regex as BytesRegex;
use regex::Regex;

use super::Variables;

static MARKER: Lazy<Regex> =
    lazy_regex!(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|§\s*([A-Za-z_][A-Za-z0-9_]*)\s*§");

static MARKER_BYTES: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|§\s*([A-Za-z_][A-Za-z0-9_]*)\s*§")
        .unwrap()
});

fn marker_name<'a>(caps: &'a regex::Captures) -> &'a str {
    caps.get(1).or_else(|| caps.get(2)).unwrap().as_str()
}

/// Substitutes all known placeholders in `template` against `vars`.
pub fn replace(template: &str, vars: &Variables) -> String {
    MARKER
        .replace_all(template, |caps: &regex::Captures| {
            let name = marker_name(caps);
            match vars.get(name) {
                Some(value) => value.to_string(),
                None => caps.get(0).unwrap().as_str().to_string(),
            }
        })
        .into_owned()
}

/// Byte-level variant of [`replace`] for input data that is not valid
/// UTF-8. Marker names themselves are always ASCII.
pub fn replace_bytes(template: &[u8], vars: &Variables) -> Vec<u8> {
    MARKER_BYTES
        .replace_all(template, |caps: &regex::bytes::Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).unwrap();
            let name = std::str::from_utf8(name.as_bytes()).unwrap_or_default();
            match vars.get(name) {
                Some(value) => value.to_string().into_bytes(),
                None => caps.get(0).unwrap().as_bytes().to_vec(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_known_markers() {
        let vars: Variables = [("Host", "example.com"), ("Port", "8080")]
            .into_iter()
            .collect();
        assert_eq!(
            replace("{{Host}}:{{Port}}/path", &vars),
            "example.com:8080/path"
        );
    }

    #[test]
    fn keeps_unknown_markers() {
        let vars: Variables = [("Host", "example.com")].into_iter().collect();
        assert_eq!(replace("{{Host}}/{{missing}}", &vars), "example.com/{{missing}}");
    }

    #[test]
    fn alternate_marker_form() {
        let vars: Variables = [("name", "value")].into_iter().collect();
        assert_eq!(replace("x=§name§", &vars), "x=value");
    }

    #[test]
    fn byte_replacement_preserves_invalid_utf8() {
        let vars: Variables = [("v", "ok")].into_iter().collect();
        let data = b"\xff\xfe{{v}}\x00".to_vec();
        assert_eq!(replace_bytes(&data, &vars), b"\xff\xfeok\x00".to_vec());
    }
}
