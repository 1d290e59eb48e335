//! TLS policies for HTTPS exchanges.
//!
//! A [`TlsPolicy`] supplies two things: a [`SocketFactory`] describing how
//! the server's certificate chain is validated, and a hostname predicate
//! consulted when the chain is valid but was issued for a different name.
//! The executor composes both into the `rustls::ClientConfig` installed on
//! the connection.
//!
//! Two policies ship with the crate:
//!
//! - [`StrictTlsPolicy`] validates against the Mozilla root set and rejects
//!   hostname mismatches. [`crate::HttpClient`] uses it unless told otherwise.
//! - [`InsecureDefaultPolicy`] accepts every certificate and every hostname.
//!   It exists for backward compatibility with servers using self-signed
//!   certificates and must be installed explicitly. Never use it against
//!   endpoints you do not control.

use std::fmt;
use std::sync::{Arc, Once};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};

use crate::error::Error;

/// Certificates presented by the server, handed to the hostname predicate.
pub struct PeerCertificates<'a> {
    pub end_entity: &'a CertificateDer<'a>,
    pub intermediates: &'a [CertificateDer<'a>],
}

/// Trust and hostname policy for HTTPS connections.
pub trait TlsPolicy: Send + Sync {
    /// Chain validation to install on the connection. `None` keeps the
    /// transport's built-in validation and never consults [`Self::verify`].
    fn socket_factory(&self) -> Option<SocketFactory>;

    /// Accept a server whose valid certificate does not match `hostname`.
    fn verify(&self, hostname: &str, peer: &PeerCertificates<'_>) -> bool;
}

/// Certificate-chain validation plus the crypto provider backing it.
#[derive(Debug, Clone)]
pub struct SocketFactory {
    provider: Arc<CryptoProvider>,
    chain: Arc<dyn ServerCertVerifier>,
}

impl SocketFactory {
    /// Validate chains against `roots`.
    pub fn with_roots(roots: RootCertStore) -> Result<Self, Error> {
        let provider = default_provider();
        let chain = WebPkiServerVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::clone(&provider),
        )
        .build()
        .map_err(|e| Error::Tls {
            message: e.to_string(),
        })?;

        Ok(Self { provider, chain })
    }

    /// Validate chains against the Mozilla root set.
    pub fn webpki_roots() -> Result<Self, Error> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    /// Accept every certificate chain. Signatures over the handshake are
    /// still checked, so the peer must hold the key of the certificate it
    /// presents.
    pub fn trust_all() -> Self {
        let provider = default_provider();
        let chain = Arc::new(TrustAllVerifier {
            provider: Arc::clone(&provider),
        });
        Self { provider, chain }
    }

    /// Use a caller-built chain verifier.
    pub fn with_verifier(chain: Arc<dyn ServerCertVerifier>) -> Self {
        Self {
            provider: default_provider(),
            chain,
        }
    }
}

fn default_provider() -> Arc<CryptoProvider> {
    Arc::new(crypto::ring::default_provider())
}

/// Mozilla roots, strict hostname matching.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictTlsPolicy;

impl TlsPolicy for StrictTlsPolicy {
    fn socket_factory(&self) -> Option<SocketFactory> {
        match SocketFactory::webpki_roots() {
            Ok(factory) => Some(factory),
            Err(e) => {
                log::warn!("Falling back to transport TLS defaults: {}", e);
                None
            }
        }
    }

    fn verify(&self, _hostname: &str, _peer: &PeerCertificates<'_>) -> bool {
        false
    }
}

/// Accepts all certificates and all hostnames.
///
/// Provides no protection against interception. Kept only for servers that
/// were previously reached through an accept-all default.
#[derive(Debug, Default, Clone, Copy)]
pub struct InsecureDefaultPolicy;

static INSECURE_WARNING: Once = Once::new();

impl TlsPolicy for InsecureDefaultPolicy {
    fn socket_factory(&self) -> Option<SocketFactory> {
        INSECURE_WARNING.call_once(|| {
            log::warn!("InsecureDefaultPolicy in use: TLS certificates are not verified");
        });
        Some(SocketFactory::trust_all())
    }

    fn verify(&self, _hostname: &str, _peer: &PeerCertificates<'_>) -> bool {
        true
    }
}

/// Build the client configuration for `policy`, or `None` when the policy
/// leaves the transport defaults in place.
pub(crate) fn client_config(policy: &Arc<dyn TlsPolicy>) -> Result<Option<ClientConfig>, Error> {
    let Some(factory) = policy.socket_factory() else {
        return Ok(None);
    };

    let verifier = Arc::new(PolicyVerifier {
        chain: factory.chain,
        policy: Arc::clone(policy),
    });

    let config = ClientConfig::builder_with_provider(factory.provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok(Some(config))
}

/// Chain validation from the socket factory, with the policy's hostname
/// predicate as the fallback for name mismatches.
struct PolicyVerifier {
    chain: Arc<dyn ServerCertVerifier>,
    policy: Arc<dyn TlsPolicy>,
}

impl fmt::Debug for PolicyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyVerifier")
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

fn is_name_mismatch(error: &CertificateError) -> bool {
    matches!(
        error,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let result = self.chain.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );

        match result {
            Err(rustls::Error::InvalidCertificate(ref error)) if is_name_mismatch(error) => {
                let hostname = server_name.to_str();
                let peer = PeerCertificates {
                    end_entity,
                    intermediates,
                };
                if self.policy.verify(&hostname, &peer) {
                    log::debug!("Hostname {} accepted by TLS policy", hostname);
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(rustls::Error::InvalidCertificate(
                        CertificateError::NotValidForName,
                    ))
                }
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.chain.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.chain.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.chain.supported_verify_schemes()
    }
}

#[derive(Debug)]
struct TrustAllVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for TrustAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
