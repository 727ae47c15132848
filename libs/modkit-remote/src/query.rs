//! URL assembly from scheme, host, resolved path and query parameters.

use crate::error::RemoteError;
use std::fmt;
use url::Url;

/// URL scheme of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-valued query parameters.
///
/// Keeps parameters in first-insertion order and, within a parameter,
/// values in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, Vec<String>)>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, name: &str) -> &mut Vec<String> {
        let idx = match self.entries.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.entries.push((name.to_owned(), Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    /// Append one value to `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.slot(name).push(value.into());
    }

    /// Append several values to `name`, in order.
    pub fn extend<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.slot(name).extend(values.into_iter().map(Into::into));
    }

    /// Replace the values of `name`, keeping its original position.
    pub fn replace<I, V>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let slot = self.slot(name);
        slot.clear();
        slot.extend(values.into_iter().map(Into::into));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, values)| values.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Percent-encoded `name=value` pairs joined by `&`.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut pairs = Vec::new();
        for (name, values) in &self.entries {
            let name = urlencoding::encode(name);
            for value in values {
                pairs.push(format!("{name}={}", urlencoding::encode(value)));
            }
        }
        pairs.join("&")
    }
}

/// Assemble the request URL.
///
/// # Errors
///
/// Returns `RemoteError::UrlConstruction` when `host` is not a bare network
/// authority or the combination does not parse as a URL.
pub fn build_url(
    scheme: Scheme,
    host: &str,
    path: &str,
    query: &QueryParams,
) -> Result<Url, RemoteError> {
    let base = format!("{scheme}://{host}");
    let invalid = |reason: String| RemoteError::UrlConstruction {
        url: base.clone(),
        reason,
    };

    if host.is_empty() || host.contains(['/', '?', '#', '@', '\\']) {
        return Err(invalid("host is not a valid network authority".to_owned()));
    }

    let mut url = Url::parse(&base).map_err(|e| invalid(e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }

    if path.starts_with('/') {
        url.set_path(path);
    } else {
        url.set_path(&format!("/{path}"));
    }

    if !query.is_empty() {
        url.set_query(Some(&query.encode()));
    }
    Ok(url)
}
