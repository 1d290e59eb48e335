//! Turning raw response bodies into typed results.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

/// Failure raised while resolving a body.
pub type ResolveError = Box<dyn std::error::Error + Send + Sync>;

/// Parses a raw response body and classifies it as a business success or
/// failure.
///
/// The executor calls [`resolve`](Self::resolve) once per exchange, then
/// reads the verdict through the other three methods. The verdict, not the
/// presence of a parsed value, decides between success and server error.
pub trait ResponseResolver: Send {
    type Output;

    fn resolve(&mut self, raw: &str) -> Result<Option<Self::Output>, ResolveError>;

    fn is_success(&self) -> bool;

    fn error_code(&self) -> i32;

    fn error_message(&self) -> Option<String>;
}

/// Deserializes the body as JSON into `T`; any body that parses is a
/// success.
pub struct JsonResolver<T> {
    parsed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonResolver<T> {
    pub fn new() -> Self {
        Self {
            parsed: false,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonResolver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseResolver for JsonResolver<T> {
    type Output = T;

    fn resolve(&mut self, raw: &str) -> Result<Option<T>, ResolveError> {
        self.parsed = false;
        let value = serde_json::from_str(raw)?;
        self.parsed = true;
        Ok(Some(value))
    }

    fn is_success(&self) -> bool {
        self.parsed
    }

    fn error_code(&self) -> i32 {
        0
    }

    fn error_message(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct IpInfo {
        ip: String,
    }

    #[test]
    fn json_resolver_parses_body() {
        let mut resolver = JsonResolver::<IpInfo>::new();
        let value = resolver.resolve(r#"{"ip":"10.0.0.1"}"#).unwrap();
        assert_eq!(
            value,
            Some(IpInfo {
                ip: "10.0.0.1".to_string()
            })
        );
        assert!(resolver.is_success());
        assert_eq!(resolver.error_code(), 0);
    }

    #[test]
    fn json_resolver_faults_on_bad_json() {
        let mut resolver = JsonResolver::<IpInfo>::new();
        assert!(resolver.resolve("{bad json}").is_err());
        assert!(!resolver.is_success());
    }
}
