use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;
use crate::settings::keys;

/// HTTP method for requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("GET") {
            Ok(Method::GET)
        } else if s.eq_ignore_ascii_case("POST") {
            Ok(Method::POST)
        } else {
            Err(Error::UnsupportedMethod {
                method: s.to_string(),
            })
        }
    }
}

impl From<Method> for http::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::GET => http::Method::GET,
            Method::POST => http::Method::POST,
        }
    }
}

/// URL scheme chosen by the entry point, never inferred from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// A declarative HTTP request.
///
/// Build one, hand it to [`crate::HttpClient`] or a
/// [`crate::RequestExecutor`], and read the outcome from the returned
/// envelope. The executor only borrows the descriptor for the duration of
/// one exchange; callers that share a descriptor across threads must not
/// mutate it while a request built from it is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    host: String,
    path: Option<String>,
    method: Option<Method>,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    files: BTreeMap<String, PathBuf>,
    settings: BTreeMap<String, String>,
}

impl RequestDescriptor {
    /// Create a descriptor for `host` (optionally with a port) and an
    /// optional path such as `/api/users`.
    pub fn new(host: impl Into<String>, path: Option<&str>) -> Result<Self, Error> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::InvalidHost {
                message: "host must not be empty".to_string(),
            });
        }

        Ok(Self {
            host,
            path: path.filter(|p| !p.is_empty()).map(str::to_string),
            method: None,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            files: BTreeMap::new(),
            settings: BTreeMap::new(),
        })
    }

    pub fn get(host: impl Into<String>, path: Option<&str>) -> Result<Self, Error> {
        Ok(Self::new(host, path)?.with_method(Method::GET))
    }

    pub fn post(host: impl Into<String>, path: Option<&str>) -> Result<Self, Error> {
        Ok(Self::new(host, path)?.with_method(Method::POST))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: Option<&str>) {
        self.path = path.filter(|p| !p.is_empty()).map(str::to_string);
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = Some(method);
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.set_method(method);
        self
    }

    // Headers

    /// Set a header. Empty names or values are ignored.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        if !name.is_empty() && !value.is_empty() {
            self.headers.insert(name, value);
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// Look a header up by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    // Parameters

    /// Add a query/body parameter. Empty keys are ignored; empty values
    /// are kept.
    pub fn add_param(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !key.is_empty() {
            self.params.insert(key, value.into());
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_param(key, value);
        self
    }

    pub fn add_params<K, V>(&mut self, params: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in params {
            self.add_param(key, value);
        }
    }

    /// Replace every parameter with `params`.
    pub fn set_params<K, V>(&mut self, params: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.params.clear();
        self.add_params(params);
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    // File attachments

    /// Attach a file under form field `field`. Only POST requests upload
    /// attachments.
    pub fn add_file(&mut self, field: impl Into<String>, file: impl AsRef<Path>) {
        let field = field.into();
        if !field.is_empty() {
            self.files.insert(field, file.as_ref().to_path_buf());
        }
    }

    pub fn with_file(mut self, field: impl Into<String>, file: impl AsRef<Path>) -> Self {
        self.add_file(field, file);
        self
    }

    pub fn files(&self) -> &BTreeMap<String, PathBuf> {
        &self.files
    }

    // Connection settings

    /// Set a connection setting by name (see [`crate::settings::keys`]).
    /// Empty names or values are ignored.
    pub fn set_setting(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        if !key.is_empty() && !value.is_empty() {
            self.settings.insert(key, value);
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_setting(key, value);
        self
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.set_setting(keys::REQUEST_TIMEOUT, timeout.as_millis().to_string());
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn set_use_caches(&mut self, use_caches: bool) {
        self.set_setting(keys::USE_CACHES, use_caches.to_string());
    }

    pub fn set_do_input(&mut self, do_input: bool) {
        self.set_setting(keys::DO_INPUT, do_input.to_string());
    }

    pub fn set_do_output(&mut self, do_output: bool) {
        self.set_setting(keys::DO_OUTPUT, do_output.to_string());
    }

    pub fn set_allow_user_interaction(&mut self, allow: bool) {
        self.set_setting(keys::ALLOW_USER_INTERACTION, allow.to_string());
    }

    pub fn set_if_modified_since(&mut self, epoch_millis: i64) {
        self.set_setting(keys::IF_MODIFIED_SINCE, epoch_millis.to_string());
    }

    /// Whether this request is sent as `multipart/form-data`.
    pub fn is_multipart(&self) -> bool {
        self.method == Some(Method::POST) && !self.files.is_empty()
    }
}

/// Outcome classification of one exchange.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    /// Transport, I/O or unexpected fault.
    RequestFailed,
    /// The consumer stopped waiting.
    TimedOut,
    /// The resolver faulted on a non-empty body.
    ResolveFailed,
    /// Non-200 status and no resolver verdict.
    HttpError,
    /// The resolver ran and reported a business failure.
    ServerError,
}

impl Status {
    /// Numeric code of this status in the legacy wire contract.
    pub fn code(&self) -> i32 {
        match self {
            Status::Success => 0,
            Status::RequestFailed => -100,
            Status::TimedOut => -101,
            Status::ResolveFailed => -102,
            Status::HttpError => -103,
            Status::ServerError => -104,
        }
    }
}

/// The outcome of one execution.
///
/// Built once at the end of an exchange (or synthesized by a session) and
/// never modified afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope<T> {
    status: Status,

    /// Legacy numeric form of `status`.
    code: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    http_status: Option<u16>,

    result_code: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    raw_body: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
}

impl<T> ResponseEnvelope<T> {
    pub(crate) fn new(status: Status, message: Option<String>, raw_body: Option<String>) -> Self {
        Self {
            status,
            code: status.code(),
            http_status: None,
            result_code: 0,
            message,
            raw_body,
            result: None,
        }
    }

    pub(crate) fn request_failed(message: impl Into<String>) -> Self {
        Self::new(Status::RequestFailed, Some(message.into()), None)
    }

    pub(crate) fn timed_out(message: impl Into<String>) -> Self {
        Self::new(Status::TimedOut, Some(message.into()), None)
    }

    pub(crate) fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub(crate) fn with_result_code(mut self, code: i32) -> Self {
        self.result_code = code;
        self
    }

    /// Attach a typed result. Ignored unless the envelope is a success.
    pub(crate) fn with_result(mut self, result: Option<T>) -> Self {
        if self.status == Status::Success {
            self.result = result;
        }
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Status line code of the exchange, if one completed.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Resolver-assigned code, or the HTTP code for [`Status::HttpError`].
    pub fn result_code(&self) -> i32 {
        self.result_code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn raw_body(&self) -> Option<&str> {
        self.raw_body.as_deref()
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<T> {
        self.result
    }
}
