//! Network call integration
//!
//! HTTP transport is out of the scope of this crate. Instead, this module
//! defines the minimal interface that an HTTP client's pending calls must
//! expose, and adapts such calls into observable futures. Non-successful
//! responses and transport failures are reported as `ServiceError`s.

pub mod adapter;
pub mod repository;

use crate::error::Failure;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;


/// Callback through which a call reports its response or transport failure
pub type CallCallback<T> = Box<dyn FnOnce(Result<Response<T>, Failure>) + Send + 'static>;


/// Pending HTTP call, as exposed by an HTTP client
pub trait Call<T>: Send + Sync + 'static {
    /// Send the request in the background, report the outcome to `callback`
    fn enqueue(&self, callback: CallCallback<T>);

    /// Send the request and wait for the response
    fn execute(&self) -> Result<Response<T>, Failure>;

    /// Abort the call, if it is still running
    fn cancel(&self);

    /// Description of the request being sent
    fn request(&self) -> Request;
}


/// Description of an HTTP request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// HTTP method, such as GET or POST
    pub method: String,

    /// Target URL
    pub url: String,
}
//
impl Request {
    /// Describe a request
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Request { method: method.into(), url: url.into() }
    }
}
//
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}


/// HTTP header list, with case-insensitive lookup
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);
//
impl Headers {
    /// Create an empty header list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value of a header, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter()
              .find(|(key, _)| key.eq_ignore_ascii_case(name))
              .map(|(_, value)| value.as_str())
    }

    /// Iterate over every header, in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }
}
//
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}


/// HTTP response, with a decoded body
#[derive(Clone, Debug)]
pub struct Response<T> {
    /// HTTP status code
    pub code: u16,

    /// HTTP status message
    pub message: String,

    /// Response headers
    pub headers: Headers,

    /// Decoded body of successful responses, if any
    pub body: Option<T>,

    /// Raw body of unsuccessful responses, if any
    pub error_body: Option<String>,

    /// URL which the response came from
    pub url: String,
}
//
impl<T> Response<T> {
    /// Successful response with a body
    pub fn ok(body: T, url: impl Into<String>) -> Self {
        Response {
            code: 200,
            message: "OK".to_owned(),
            headers: Headers::new(),
            body: Some(body),
            error_body: None,
            url: url.into(),
        }
    }

    /// Response with an arbitrary status and no body
    pub fn status(code: u16, message: impl Into<String>, url: impl Into<String>) -> Self {
        Response {
            code,
            message: message.into(),
            headers: Headers::new(),
            body: None,
            error_body: None,
            url: url.into(),
        }
    }

    /// Attach headers to the response
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach an error body to the response
    pub fn with_error_body(mut self, error_body: impl Into<String>) -> Self {
        self.error_body = Some(error_body.into());
        self
    }

    /// Check whether the status code is in the 2xx range
    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.code)
    }
}


/// Body of a successful response, along with its status and headers
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse<T> {
    /// Decoded body
    pub body: T,

    /// HTTP status code
    pub code: u16,

    /// Response headers
    pub headers: Headers,
}
//
impl<T> RawResponse<T> {
    /// Transform the body, keeping status and headers
    pub fn map<O, F: FnOnce(T) -> O>(self, transform: F) -> RawResponse<O> {
        RawResponse {
            body: transform(self.body),
            code: self.code,
            headers: self.headers,
        }
    }
}


/// Failure of a network call
///
/// Either the server answered with something unusable, in which case the
/// response status is recorded, or the transport failed, in which case the
/// underlying failure is kept as the error source.
///
#[derive(Clone, Debug)]
pub struct ServiceError {
    message: String,
    error_body: Option<String>,
    status: Option<(u16, String, String)>,
    request: Option<Request>,
    cause: Option<Failure>,
}
//
impl ServiceError {
    /// Failure derived from an unusable response
    pub fn from_response<T>(message: impl Into<String>,
                            response: &Response<T>,
                            request: Option<Request>) -> Self {
        ServiceError {
            message: message.into(),
            error_body: response.error_body.clone(),
            status: Some((response.code, response.message.clone(), response.url.clone())),
            request,
            cause: None,
        }
    }

    /// Failure of the transport itself
    pub fn transport(cause: Failure, request: Option<Request>) -> Self {
        ServiceError {
            message: cause.to_string(),
            error_body: None,
            status: None,
            request,
            cause: Some(cause),
        }
    }

    /// Short description of what went wrong
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Body of the unsuccessful response, if any
    pub fn error_body(&self) -> Option<&str> {
        self.error_body.as_deref()
    }

    /// HTTP status code, if a response was received
    pub fn code(&self) -> Option<u16> {
        self.status.as_ref().map(|(code, _, _)| *code)
    }

    /// HTTP status message, if a response was received
    pub fn status_message(&self) -> Option<&str> {
        self.status.as_ref().map(|(_, message, _)| message.as_str())
    }

    /// URL of the response, if one was received
    pub fn url(&self) -> Option<&str> {
        self.status.as_ref().map(|(_, _, url)| url.as_str())
    }

    /// Request that failed, if known
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Transport failure, if that is what happened
    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_ref()
    }
}
//
impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some((code, message, url)) = &self.status {
            write!(f, " - {} ({}) - url: {}", code, message, url)?;
        }
        Ok(())
    }
}
//
impl StdError for ServiceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|cause| {
            let source: &(dyn StdError + 'static) = cause.as_error();
            source
        })
    }
}


/// Network failure carrying a backtrace of the code which made the call
///
/// Transport callbacks run far away from the code which issued the call, so
/// their own backtraces say little about where a failing request came from.
///
#[derive(Clone, Debug)]
pub struct TracedError {
    error: ServiceError,
    call_site: Arc<Backtrace>,
}
//
impl TracedError {
    /// Attach a call site backtrace to a network failure
    pub fn new(error: ServiceError, call_site: Arc<Backtrace>) -> Self {
        TracedError { error, call_site }
    }

    /// The underlying network failure
    pub fn service_error(&self) -> &ServiceError {
        &self.error
    }

    /// Backtrace captured where the call was made
    pub fn call_site(&self) -> &Backtrace {
        &self.call_site
    }
}
//
impl fmt::Display for TracedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}
//
impl StdError for TracedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}


/// Find the network failure behind a future's failure, if there is one
pub fn as_service_error(failure: &Failure) -> Option<&ServiceError> {
    failure.downcast_ref::<ServiceError>()
           .or_else(|| failure.downcast_ref::<TracedError>().map(TracedError::service_error))
}
