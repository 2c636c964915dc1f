//! Client Resolver Service
//!
//! Derives the anonymous rate-limit identity from trusted proxy headers.

use crate::domain::value_objects::ClientId;

/// Header names checked in order when resolving the client address.
pub const DEFAULT_TRUSTED_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

/// Resolves a [`ClientId`] from request headers.
#[derive(Debug, Clone)]
pub struct ClientResolver {
    trusted_headers: Vec<String>,
}

impl ClientResolver {
    pub fn new(trusted_headers: Vec<String>) -> Self {
        Self {
            trusted_headers: trusted_headers
                .into_iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn trusted_headers(&self) -> &[String] {
        &self.trusted_headers
    }

    /// Resolve a client from a header lookup function.
    ///
    /// The first non-empty trusted header wins. Comma-separated values
    /// (`x-forwarded-for` chains) resolve to their first element.
    pub fn resolve<'a, F>(&self, lookup: F) -> ClientId
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        for name in &self.trusted_headers {
            let Some(value) = lookup(name) else {
                continue;
            };
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return ClientId::new(first);
            }
        }
        ClientId::unknown()
    }
}

impl Default for ClientResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TRUSTED_HEADERS.iter().map(|h| h.to_string()).collect())
    }
}
