use std::sync::Arc;

use crate::dispatcher::{Dispatcher, ThreadDispatcher};
use crate::error::Error;
use crate::executor::{HttpTransport, ReqwestTransport, RequestExecutor};
use crate::resolver::ResponseResolver;
use crate::session::{Callback, Session};
use crate::tls::{StrictTlsPolicy, TlsPolicy};
use crate::types::{Method, RequestDescriptor, Scheme};

/// Boxed resolver handed to a background execution.
pub type BoxResolver<T> = Box<dyn ResponseResolver<Output = T>>;

/// Entry point for asynchronous requests.
///
/// Each call submits one [`RequestExecutor`] run to the dispatcher and
/// returns the [`Session`] tracking it. Results arrive either through the
/// callback or through the session's blocking getters; retrieving the
/// result with a getter first suppresses the callback.
///
/// ```ignore
/// use relay_http::{HttpClient, JsonResolver, RequestDescriptor};
///
/// let client = HttpClient::new()?;
/// let request = RequestDescriptor::new("ip.taobao.com", Some("/service/getIpInfo.php"))?
///     .with_param("ip", "210.21.220.218");
/// let session = client.get::<serde_json::Value>(
///     request,
///     Some(Box::new(JsonResolver::new())),
///     None,
/// );
/// let response = session.await_response();
/// ```
#[derive(Clone)]
pub struct HttpClient {
    dispatcher: Arc<dyn Dispatcher>,
    transport: Arc<dyn HttpTransport>,
    tls: Option<Arc<dyn TlsPolicy>>,
}

impl HttpClient {
    /// Client with a thread-per-request dispatcher, the reqwest transport
    /// and certificate verification against the webpki roots.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            dispatcher: Arc::new(ThreadDispatcher::new()?),
            transport: Arc::new(ReqwestTransport::new()),
            tls: Some(Arc::new(StrictTlsPolicy)),
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_tls_policy(mut self, policy: Arc<dyn TlsPolicy>) -> Self {
        self.tls = Some(policy);
        self
    }

    /// Remove the TLS policy; HTTPS requests then fail as `RequestFailed`.
    pub fn without_tls_policy(mut self) -> Self {
        self.tls = None;
        self
    }

    /// The executor this client uses for `scheme`.
    pub fn executor(&self, scheme: Scheme) -> RequestExecutor {
        let executor = RequestExecutor::with_transport(scheme, Arc::clone(&self.transport));
        match (&self.tls, scheme) {
            (Some(policy), Scheme::Https) => executor.with_tls_policy(Arc::clone(policy)),
            _ => executor,
        }
    }

    pub fn get<T: Send + Sync + 'static>(
        &self,
        request: RequestDescriptor,
        resolver: Option<BoxResolver<T>>,
        callback: Option<Box<dyn Callback<T>>>,
    ) -> Session<T> {
        self.submit(Scheme::Http, Method::GET, request, resolver, callback)
    }

    pub fn post<T: Send + Sync + 'static>(
        &self,
        request: RequestDescriptor,
        resolver: Option<BoxResolver<T>>,
        callback: Option<Box<dyn Callback<T>>>,
    ) -> Session<T> {
        self.submit(Scheme::Http, Method::POST, request, resolver, callback)
    }

    pub fn https_get<T: Send + Sync + 'static>(
        &self,
        request: RequestDescriptor,
        resolver: Option<BoxResolver<T>>,
        callback: Option<Box<dyn Callback<T>>>,
    ) -> Session<T> {
        self.submit(Scheme::Https, Method::GET, request, resolver, callback)
    }

    pub fn https_post<T: Send + Sync + 'static>(
        &self,
        request: RequestDescriptor,
        resolver: Option<BoxResolver<T>>,
        callback: Option<Box<dyn Callback<T>>>,
    ) -> Session<T> {
        self.submit(Scheme::Https, Method::POST, request, resolver, callback)
    }

    fn submit<T: Send + Sync + 'static>(
        &self,
        scheme: Scheme,
        method: Method,
        mut request: RequestDescriptor,
        resolver: Option<BoxResolver<T>>,
        callback: Option<Box<dyn Callback<T>>>,
    ) -> Session<T> {
        request.set_method(method);
        let executor = self.executor(scheme);
        log::debug!("Submitting {} {}", method, executor.request_url(&request));

        Session::spawn(Arc::clone(&self.dispatcher), callback, move |_progress| {
            let mut resolver = resolver;
            executor.execute(&request, resolver.as_deref_mut())
        })
    }
}
