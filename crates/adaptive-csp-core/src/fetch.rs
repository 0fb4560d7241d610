// crates/adaptive-csp-core/src/fetch.rs
// ============================================================================
// Module: Sanitized Outbound Requests
// Description: Fetch abstraction, sanitizing decorator, and guarded headers.
// Purpose: Ensure caller headers are sanitized before any request is issued.
// Dependencies: reqwest, thiserror
// ============================================================================

//! ## Overview
//! [`Fetch`] is the seam for issuing outbound requests. [`SanitizingFetch`]
//! wraps any implementation and sanitizes request headers before delegating;
//! requests without headers pass through untouched. [`GuardedHeaders`] is a
//! header map that validates on construction and on every mutation.
//! [`ReqwestFetch`] uses a blocking client and must not be created or dropped
//! on an async runtime thread.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use reqwest::redirect::Policy;
use thiserror::Error;

use crate::sanitizer::HeaderCollection;
use crate::sanitizer::HeaderError;
use crate::sanitizer::HeaderRejection;
use crate::sanitizer::HeaderSanitizer;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default request timeout for [`ReqwestFetch`].
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default response body cap for [`ReqwestFetch`].
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// HTTP method.
    pub method: String,
    /// Absolute target URL.
    pub url: String,
    /// Caller headers, if any.
    pub headers: Option<HeaderCollection>,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    /// Creates a GET request without headers.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: None,
            body: None,
        }
    }

    /// Returns a copy carrying headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderCollection) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Response returned by a [`Fetch`] implementation.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body, truncated at the implementation's cap.
    pub body: Vec<u8>,
}

/// Errors raised while issuing a request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Issues outbound requests.
pub trait Fetch: Send + Sync {
    /// Sends a request and returns the response.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when the request cannot be built or sent.
    fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

// ============================================================================
// SECTION: Sanitizing Decorator
// ============================================================================

/// Decorator sanitizing request headers before delegating.
pub struct SanitizingFetch<F> {
    /// Wrapped implementation.
    inner: F,
    /// Shared sanitizer.
    sanitizer: Arc<HeaderSanitizer>,
}

impl<F: Fetch> SanitizingFetch<F> {
    /// Wraps `inner`.
    #[must_use]
    pub const fn new(inner: F, sanitizer: Arc<HeaderSanitizer>) -> Self {
        Self {
            inner,
            sanitizer,
        }
    }

    /// Returns the wrapped implementation.
    #[must_use]
    pub const fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: Fetch> Fetch for SanitizingFetch<F> {
    fn fetch(&self, mut request: FetchRequest) -> Result<FetchResponse, FetchError> {
        request.headers = request.headers.map(|headers| self.sanitizer.sanitize(headers));
        self.inner.fetch(request)
    }
}

// ============================================================================
// SECTION: Reqwest Transport
// ============================================================================

/// [`Fetch`] over a blocking reqwest client.
pub struct ReqwestFetch {
    /// Blocking HTTP client.
    client: Client,
    /// Response body cap in bytes.
    max_response_bytes: usize,
}

impl ReqwestFetch {
    /// Builds a client with the given timeout; redirects are not followed.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] when the client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        })
    }

    /// Returns a copy with a different response body cap.
    #[must_use]
    pub const fn with_max_response_bytes(mut self, max_response_bytes: usize) -> Self {
        self.max_response_bytes = max_response_bytes;
        self
    }
}

impl Fetch for ReqwestFetch {
    fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|err| FetchError::InvalidRequest(err.to_string()))?;
        let mut builder = self.client.request(method, request.url.as_str());
        if let Some(headers) = request.headers {
            builder = builder.headers(collection_to_map(headers)?);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().map_err(|err| FetchError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let mut body = Vec::new();
        let limit = u64::try_from(self.max_response_bytes).unwrap_or(u64::MAX);
        response
            .take(limit)
            .read_to_end(&mut body)
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

/// Converts any collection shape to a native map for transmission.
fn collection_to_map(headers: HeaderCollection) -> Result<HeaderMap, FetchError> {
    let entries: Vec<(String, String)> = match headers {
        HeaderCollection::Native(map) => return Ok(map),
        HeaderCollection::Pairs(pairs) => pairs
            .into_iter()
            .map(|pair| match <[String; 2]>::try_from(pair) {
                Ok([name, value]) => Ok((name, value)),
                Err(_) => Err(FetchError::InvalidRequest("header pair must hold a name and a value".to_string())),
            })
            .collect::<Result<_, _>>()?,
        HeaderCollection::Record(record) => record.into_iter().collect(),
    };
    let mut map = HeaderMap::with_capacity(entries.len());
    for (name, value) in entries {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| FetchError::InvalidRequest(err.to_string()))?;
        let value = HeaderValue::from_str(&value).map_err(|err| FetchError::InvalidRequest(err.to_string()))?;
        map.append(name, value);
    }
    Ok(map)
}

// ============================================================================
// SECTION: Guarded Headers
// ============================================================================

/// Header map validating every insertion.
///
/// # Invariants
/// - Every stored value passed the sanitizer's rules (unless the sanitizer's
///   feature flag is off).
/// - In strict mode an invalid header fails the operation; otherwise it is
///   ignored and reported as `Ok(false)`.
pub struct GuardedHeaders {
    /// Validated headers.
    map: HeaderMap,
    /// Shared sanitizer.
    sanitizer: Arc<HeaderSanitizer>,
}

impl GuardedHeaders {
    /// Creates an empty guarded map.
    #[must_use]
    pub fn new(sanitizer: Arc<HeaderSanitizer>) -> Self {
        Self {
            map: HeaderMap::new(),
            sanitizer,
        }
    }

    /// Creates a guarded map from an initial collection.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] in strict mode when any entry is invalid.
    pub fn from_collection(sanitizer: Arc<HeaderSanitizer>, headers: HeaderCollection) -> Result<Self, HeaderError> {
        let mut guarded = Self::new(sanitizer);
        match headers {
            HeaderCollection::Native(map) => {
                for (name, value) in &map {
                    match value.to_str() {
                        Ok(text) => {
                            guarded.append(name.as_str(), text)?;
                        }
                        Err(_) => guarded.reject(HeaderError::Rejected {
                            name: name.as_str().to_string(),
                            reason: HeaderRejection::NotVisibleAscii,
                        })?,
                    }
                }
            }
            HeaderCollection::Pairs(pairs) => {
                for pair in &pairs {
                    if let [name, value] = pair.as_slice() {
                        guarded.append(name, value)?;
                    } else {
                        guarded.reject(HeaderError::Malformed(
                            "pair entries must hold exactly a name and a value".to_string(),
                        ))?;
                    }
                }
            }
            HeaderCollection::Record(record) => {
                for (name, value) in &record {
                    guarded.append(name, value)?;
                }
            }
        }
        Ok(guarded)
    }

    /// Replaces every value of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] in strict mode when the header is invalid.
    pub fn set(&mut self, name: &str, value: &str) -> Result<bool, HeaderError> {
        let Some((name, value)) = self.admit(name, value)? else {
            return Ok(false);
        };
        self.map.insert(name, value);
        Ok(true)
    }

    /// Adds a value for `name`, keeping existing values.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] in strict mode when the header is invalid.
    pub fn append(&mut self, name: &str, value: &str) -> Result<bool, HeaderError> {
        let Some((name, value)) = self.admit(name, value)? else {
            return Ok(false);
        };
        self.map.append(name, value);
        Ok(true)
    }

    /// Returns the first value of `name` as text.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(|value| value.to_str().ok())
    }

    /// Removes every value of `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        self.map.remove(name).is_some()
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Borrows the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn into_map(self) -> HeaderMap {
        self.map
    }

    /// Validates and converts one header.
    fn admit(&self, name: &str, value: &str) -> Result<Option<(HeaderName, HeaderValue)>, HeaderError> {
        let Some(normalized) = self.sanitizer.check_header(name, value)? else {
            return Ok(None);
        };
        let converted = HeaderName::from_bytes(name.as_bytes())
            .ok()
            .zip(HeaderValue::from_str(&normalized).ok());
        match converted {
            Some(entry) => Ok(Some(entry)),
            None => {
                self.reject(HeaderError::Rejected {
                    name: name.to_string(),
                    reason: HeaderRejection::NotVisibleAscii,
                })?;
                Ok(None)
            }
        }
    }

    /// Fails in strict mode; ignores otherwise.
    fn reject(&self, err: HeaderError) -> Result<(), HeaderError> {
        if self.sanitizer.is_strict() && self.sanitizer.config().enabled {
            return Err(err);
        }
        Ok(())
    }
}
