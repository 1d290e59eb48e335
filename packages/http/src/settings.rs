//! Connection settings carried by a request descriptor.
//!
//! Descriptors store settings as string pairs so they can be filled from
//! configuration files or command lines without knowing the typed form.
//! `ConnectionSettings::from_map` turns them into the options the transport
//! applies; a value that does not parse fails the exchange.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Error;

/// Recognized setting names.
pub mod keys {
    pub const REQUEST_TIMEOUT: &str = "RequestTimeout";
    pub const ALLOW_USER_INTERACTION: &str = "AllowUserInteraction";
    pub const DO_INPUT: &str = "DoInput";
    pub const DO_OUTPUT: &str = "DoOutput";
    pub const IF_MODIFIED_SINCE: &str = "IfModifiedSince";
    pub const USE_CACHES: &str = "UseCaches";
}

/// Timeout applied to both connecting and reading when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Typed view of a descriptor's connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Connect and read timeout. Zero disables both.
    pub timeout: Duration,

    /// Whether the response body is read.
    pub do_input: bool,

    /// Whether a request body is written. `None` keeps the method default
    /// (GET writes nothing, POST writes its body).
    pub do_output: Option<bool>,

    /// Whether intermediaries may answer from cache.
    pub use_caches: bool,

    /// Conditional-GET timestamp in milliseconds since the Unix epoch.
    pub if_modified_since: Option<i64>,

    /// Accepted for compatibility; there is no interactive authentication
    /// to allow or forbid.
    pub allow_user_interaction: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            do_input: true,
            do_output: None,
            use_caches: true,
            if_modified_since: None,
            allow_user_interaction: false,
        }
    }
}

impl ConnectionSettings {
    /// Apply every present entry over the defaults.
    ///
    /// Unknown names are ignored. Booleans follow the lenient rule of the
    /// string form: `"true"` in any case is true, anything else is false.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, Error> {
        let mut settings = Self::default();

        for (key, value) in map {
            match key.as_str() {
                keys::REQUEST_TIMEOUT => {
                    let millis: u64 = value.trim().parse().map_err(|e| Error::InvalidSetting {
                        key: key.clone(),
                        value: value.clone(),
                        message: format!("{}", e),
                    })?;
                    settings.timeout = Duration::from_millis(millis);
                }
                keys::DO_INPUT => settings.do_input = parse_flag(value),
                keys::DO_OUTPUT => settings.do_output = Some(parse_flag(value)),
                keys::USE_CACHES => settings.use_caches = parse_flag(value),
                keys::ALLOW_USER_INTERACTION => {
                    settings.allow_user_interaction = parse_flag(value)
                }
                keys::IF_MODIFIED_SINCE => {
                    let millis: i64 = value.trim().parse().map_err(|e| Error::InvalidSetting {
                        key: key.clone(),
                        value: value.clone(),
                        message: format!("{}", e),
                    })?;
                    settings.if_modified_since = Some(millis);
                }
                other => log::debug!("Ignoring unknown connection setting {}", other),
            }
        }

        Ok(settings)
    }

    /// Timeout to install on the connection, `None` when disabled.
    pub fn transport_timeout(&self) -> Option<Duration> {
        if self.timeout.is_zero() {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// `If-Modified-Since` header value, if a timestamp is set.
    pub fn if_modified_since_header(&self) -> Result<Option<String>, Error> {
        let Some(millis) = self.if_modified_since else {
            return Ok(None);
        };
        let date = chrono::DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            Error::InvalidSetting {
                key: keys::IF_MODIFIED_SINCE.to_string(),
                value: millis.to_string(),
                message: "timestamp out of range".to_string(),
            }
        })?;
        Ok(Some(date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()))
    }
}

fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}
