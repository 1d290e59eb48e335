//! # relay-http
//!
//! Off-thread HTTP/HTTPS request execution.
//!
//! A [`RequestDescriptor`] declares what to send. A [`RequestExecutor`]
//! performs exactly one exchange for it and classifies the outcome into a
//! [`ResponseEnvelope`]. A [`Session`] tracks one background execution and
//! delivers its result exactly once, either to a [`Callback`] on the
//! dispatcher's callback context or to a blocking getter.
//!
//! ## Asynchronous use
//!
//! ```ignore
//! use relay_http::{HttpClient, RequestDescriptor};
//!
//! let client = HttpClient::new()?;
//! let request = RequestDescriptor::new("example.com", Some("/status"))?
//!     .with_param("verbose", "1");
//!
//! let session = client.get::<()>(request, None, None);
//! let response = session.await_response_timeout(Duration::from_secs(5), true);
//! println!("{:?}: {:?}", response.status(), response.raw_body());
//! ```
//!
//! ## Synchronous use
//!
//! ```ignore
//! use relay_http::{JsonResolver, RequestDescriptor, RequestExecutor, Scheme};
//!
//! let executor = RequestExecutor::new(Scheme::Http);
//! let request = RequestDescriptor::post("example.com", Some("/login"))?
//!     .with_param("user", "alice");
//!
//! let mut resolver = JsonResolver::<serde_json::Value>::new();
//! let response = executor.execute(&request, Some(&mut resolver))?;
//! ```
//!
//! ## HTTPS
//!
//! HTTPS exchanges require a [`TlsPolicy`]. [`HttpClient`] installs
//! [`StrictTlsPolicy`] by default; a bare [`RequestExecutor`] without a
//! policy refuses HTTPS with [`Error::MissingTlsPolicy`].

pub mod body;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handle;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod tls;
pub mod types;

// Re-export main types
pub use body::{Multipart, RequestBody};
pub use client::{BoxResolver, HttpClient};
pub use dispatcher::{CallbackQueue, Dispatcher, Job, ThreadDispatcher};
pub use error::Error;
pub use executor::{HttpTransport, PreparedRequest, RawResponse, ReqwestTransport, RequestExecutor};
pub use handle::{CancelHandle, SessionState};
pub use resolver::{JsonResolver, ResolveError, ResponseResolver};
pub use session::{Callback, Progress, ProgressReporter, Session};
pub use settings::{keys, ConnectionSettings, DEFAULT_TIMEOUT};
pub use tls::{InsecureDefaultPolicy, PeerCertificates, SocketFactory, StrictTlsPolicy, TlsPolicy};
pub use types::{Method, RequestDescriptor, ResponseEnvelope, Scheme, Status};
