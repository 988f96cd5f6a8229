//! Best-effort visitor country from trusted edge headers.

use leadfunnel_types::config::CountryHeaderConfig;
use std::collections::HashMap;

/// Read access to request headers. Lookups are case-insensitive.
pub trait HeaderSource {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Headers of a request that carried none.
pub struct NoHeaders;

impl HeaderSource for NoHeaders {
    fn header(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// Values edge networks send when they could not place the client.
/// `XX` is Cloudflare's unknown marker and `T1` its Tor marker.
const SENTINELS: [&str; 3] = ["UNKNOWN", "XX", "T1"];

/// Resolves a country code from a primary header, then a secondary one.
#[derive(Debug, Clone)]
pub struct CountryDetector {
    primary: String,
    secondary: String,
}

impl CountryDetector {
    pub fn new(config: &CountryHeaderConfig) -> Self {
        Self {
            primary: config.primary_header.clone(),
            secondary: config.secondary_header.clone(),
        }
    }

    /// Upper-case ISO 3166 alpha-2 code, or `None` when unknown.
    pub fn detect(&self, headers: &dyn HeaderSource) -> Option<String> {
        [&self.primary, &self.secondary]
            .into_iter()
            .filter(|name| !name.is_empty())
            .find_map(|name| headers.header(name).and_then(clean_country))
    }
}

impl Default for CountryDetector {
    fn default() -> Self {
        Self::new(&CountryHeaderConfig::default())
    }
}

fn clean_country(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() || SENTINELS.contains(&code.as_str()) {
        return None;
    }
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(code)
}
