//! One HTTP exchange per call.
//!
//! [`RequestExecutor`] turns a [`RequestDescriptor`] into a
//! [`PreparedRequest`], hands it to an [`HttpTransport`], and classifies the
//! [`RawResponse`] into a [`ResponseEnvelope`]. The transport is a trait so
//! tests can substitute canned responses for the network.

use std::sync::Arc;

use http::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE,
    IF_MODIFIED_SINCE, PRAGMA,
};
use reqwest::blocking::{Body, Client};
use url::Url;

use crate::body::{encode_form, encode_multipart, Boundary, RequestBody};
use crate::error::Error;
use crate::resolver::{ResolveError, ResponseResolver};
use crate::settings::ConnectionSettings;
use crate::tls::{self, TlsPolicy};
use crate::types::{Method, RequestDescriptor, ResponseEnvelope, Scheme, Status};

/// A request ready for the wire.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub settings: ConnectionSettings,
}

/// What came back over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    /// `None` when input was disabled for the exchange.
    pub body: Option<String>,
}

/// Trait for performing a single exchange.
///
/// Implementations open one connection, send the request, read the
/// response, and release the connection before returning, whatever the
/// outcome.
pub trait HttpTransport: Send + Sync {
    fn exchange(
        &self,
        request: &PreparedRequest,
        tls: Option<&Arc<dyn TlsPolicy>>,
    ) -> Result<RawResponse, Error>;
}

/// Production transport using a reqwest blocking client built per
/// exchange, so timeouts and TLS policy are scoped to one request and no
/// connection outlives it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    pub fn new() -> Self {
        Self
    }
}

impl HttpTransport for ReqwestTransport {
    fn exchange(
        &self,
        request: &PreparedRequest,
        tls: Option<&Arc<dyn TlsPolicy>>,
    ) -> Result<RawResponse, Error> {
        let timeout = request.settings.transport_timeout();
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0);

        if request.url.scheme() == Scheme::Https.as_str() {
            if let Some(policy) = tls {
                if let Some(config) = tls::client_config(policy)? {
                    builder = builder.use_preconfigured_tls(config);
                }
            }
        }

        let client = builder.build()?;

        let mut req_builder = client
            .request(request.method.into(), request.url.clone())
            .headers(request.headers.clone());

        match &request.body {
            Some(RequestBody::Bytes(bytes)) => {
                req_builder = req_builder.body(bytes.clone());
            }
            Some(RequestBody::Multipart(multipart)) => {
                let reader = multipart.reader()?;
                req_builder = req_builder.body(Body::sized(reader, multipart.len()));
            }
            None => {}
        }

        let response = req_builder.send()?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("Unknown")
            .to_string();

        let body = if request.settings.do_input {
            Some(join_lines(&response.text()?))
        } else {
            None
        };

        log::debug!("{} {} -> {}", request.method, request.url, status);

        Ok(RawResponse {
            status,
            status_text,
            body,
        })
    }
}

/// Concatenate the lines of `text`, dropping the line terminators.
pub(crate) fn join_lines(text: &str) -> String {
    text.split(&['\r', '\n'][..]).collect()
}

/// Performs exactly one exchange per [`execute`](Self::execute) call.
#[derive(Clone)]
pub struct RequestExecutor {
    scheme: Scheme,
    transport: Arc<dyn HttpTransport>,
    tls: Option<Arc<dyn TlsPolicy>>,
}

impl RequestExecutor {
    /// Executor for `scheme` over the reqwest transport.
    pub fn new(scheme: Scheme) -> Self {
        Self::with_transport(scheme, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(scheme: Scheme, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            scheme,
            transport,
            tls: None,
        }
    }

    pub fn with_tls_policy(mut self, policy: Arc<dyn TlsPolicy>) -> Self {
        self.tls = Some(policy);
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// `scheme://host[path]`, without query.
    pub fn request_url(&self, descriptor: &RequestDescriptor) -> String {
        format!(
            "{}://{}{}",
            self.scheme.as_str(),
            descriptor.host(),
            descriptor.path().unwrap_or("")
        )
    }

    /// Build the wire request without performing any I/O other than
    /// reading attached files.
    pub fn prepare(&self, descriptor: &RequestDescriptor) -> Result<PreparedRequest, Error> {
        let method = require_method(descriptor)?;
        let settings = ConnectionSettings::from_map(descriptor.settings())?;

        let mut url_text = self.request_url(descriptor);
        if method == Method::GET {
            if let Some(query) = encode_form(descriptor.params()) {
                url_text.push('?');
                url_text.push_str(&query);
            }
        }
        let url = Url::parse(&url_text)?;

        let mut headers = HeaderMap::new();
        for (name, value) in descriptor.headers() {
            headers.insert(
                HeaderName::try_from(name.as_str())?,
                HeaderValue::try_from(value.as_str())?,
            );
        }
        headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));

        if !settings.use_caches {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }
        if let Some(date) = settings.if_modified_since_header()? {
            headers.insert(IF_MODIFIED_SINCE, HeaderValue::try_from(date)?);
        }

        let body = match method {
            Method::GET => None,
            Method::POST if settings.do_output == Some(false) => None,
            Method::POST if descriptor.is_multipart() => {
                let boundary = Boundary::generate();
                headers.insert(CONTENT_TYPE, HeaderValue::try_from(boundary.content_type())?);
                Some(RequestBody::Multipart(encode_multipart(
                    boundary,
                    descriptor.params(),
                    descriptor.files(),
                )?))
            }
            Method::POST => {
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("application/x-www-form-urlencoded"),
                    );
                }
                Some(RequestBody::Bytes(
                    encode_form(descriptor.params())
                        .unwrap_or_default()
                        .into_bytes(),
                ))
            }
        };

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body,
            settings,
        })
    }

    /// Perform one exchange and classify its outcome.
    ///
    /// `Err` is returned only for requests rejected before any I/O: an
    /// unset method, or HTTPS without a TLS policy. Every other failure is
    /// reported as an envelope.
    pub fn execute<R>(
        &self,
        descriptor: &RequestDescriptor,
        resolver: Option<&mut R>,
    ) -> Result<ResponseEnvelope<R::Output>, Error>
    where
        R: ResponseResolver + ?Sized,
    {
        require_method(descriptor)?;
        if self.scheme == Scheme::Https && self.tls.is_none() {
            return Err(Error::MissingTlsPolicy {
                host: descriptor.host().to_string(),
            });
        }

        let prepared = match self.prepare(descriptor) {
            Ok(prepared) => prepared,
            Err(e) => {
                log::debug!("Failed to prepare request for {}: {}", descriptor.host(), e);
                return Ok(ResponseEnvelope::request_failed(e.to_string()));
            }
        };

        let raw = match self.transport.exchange(&prepared, self.tls.as_ref()) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("{} {} failed: {}", prepared.method, prepared.url, e);
                return Ok(ResponseEnvelope::request_failed(e.to_string()));
            }
        };

        Ok(build_envelope(raw, resolver))
    }

    /// [`execute`](Self::execute) without a resolver.
    pub fn execute_raw(&self, descriptor: &RequestDescriptor) -> Result<ResponseEnvelope<()>, Error> {
        self.execute(descriptor, None::<&mut Unresolved>)
    }
}

fn require_method(descriptor: &RequestDescriptor) -> Result<Method, Error> {
    descriptor.method().ok_or_else(|| Error::UnsupportedMethod {
        method: "<unset>".to_string(),
    })
}

fn build_envelope<R>(raw: RawResponse, resolver: Option<&mut R>) -> ResponseEnvelope<R::Output>
where
    R: ResponseResolver + ?Sized,
{
    let RawResponse {
        status,
        status_text,
        body,
    } = raw;

    match (resolver, body) {
        (Some(resolver), Some(body)) if !body.is_empty() => match resolver.resolve(&body) {
            Ok(value) => {
                let kind = if resolver.is_success() {
                    Status::Success
                } else {
                    Status::ServerError
                };
                ResponseEnvelope::new(kind, resolver.error_message(), Some(body))
                    .with_http_status(status)
                    .with_result_code(resolver.error_code())
                    .with_result(value)
            }
            Err(e) => ResponseEnvelope::new(Status::ResolveFailed, Some(e.to_string()), Some(body))
                .with_http_status(status),
        },
        (_, body) if status == 200 => {
            ResponseEnvelope::new(Status::Success, Some(status_text), body).with_http_status(status)
        }
        (_, body) => ResponseEnvelope::new(Status::HttpError, Some(status_text), body)
            .with_http_status(status)
            .with_result_code(i32::from(status)),
    }
}

/// Stand-in resolver type for exchanges without one.
enum Unresolved {}

impl ResponseResolver for Unresolved {
    type Output = ();

    fn resolve(&mut self, _raw: &str) -> Result<Option<()>, ResolveError> {
        match *self {}
    }

    fn is_success(&self) -> bool {
        match *self {}
    }

    fn error_code(&self) -> i32 {
        match *self {}
    }

    fn error_message(&self) -> Option<String> {
        match *self {}
    }
}
