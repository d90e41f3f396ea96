//! Adaptation of network calls into observable futures
//!
//! A `CallAdapter` wraps a pending call and decides how its response should
//! be turned into a value: a required body, an optional body, no body at all,
//! or a body along with the response status and headers. Cancelling the
//! resulting future cancels the call.
//!
//! Calls are enqueued right away by default. Lazy adapters only enqueue the
//! call once the future is observed, so that an unobserved future never hits
//! the network.

use crate::completer::Completer;
use crate::error::Failure;
use crate::future::ObservableFuture;
use crate::net::{Call, Headers, RawResponse, Request, Response, ServiceError};
use std::sync::Arc;
use tracing::{debug, trace};


/// Hook which may rewrite a body based on the response headers
pub type HeaderInspector<T> = Arc<dyn Fn(&Headers, T) -> T + Send + Sync + 'static>;

/// Hook which turns network failures into the failure reported to listeners
pub type ErrorTransform = Arc<dyn Fn(ServiceError) -> Failure + Send + Sync + 'static>;


/// Builder of futures backed by a network call
pub struct CallAdapter<T: Send + 'static> {
    call: Arc<dyn Call<T>>,
    lazy: bool,
    header_inspector: Option<HeaderInspector<T>>,
    error_transform: Option<ErrorTransform>,
}
//
impl<T: Send + 'static> CallAdapter<T> {
    /// Start adapting a call
    pub fn new(call: Arc<dyn Call<T>>) -> Self {
        CallAdapter {
            call,
            lazy: false,
            header_inspector: None,
            error_transform: None,
        }
    }

    /// Only enqueue the call once the future is observed
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Let the body be rewritten based on the response headers
    pub fn inspect_headers<H>(mut self, inspector: H) -> Self
        where H: Fn(&Headers, T) -> T + Send + Sync + 'static
    {
        self.header_inspector = Some(Arc::new(inspector));
        self
    }

    /// Transform network failures before they reach listeners
    pub fn map_error(mut self, transform: ErrorTransform) -> Self {
        self.error_transform = Some(transform);
        self
    }

    /// Future of the response body, which must be present
    pub fn body(self) -> ObservableFuture<T> {
        let inspector = self.header_inspector.clone();
        self.start(move |response, request| {
            let (body, _, headers) = expect_body(response, request)?;
            Ok(inspect(&inspector, &headers, body))
        })
    }

    /// Future of the response body, which may be absent
    pub fn optional(self) -> ObservableFuture<Option<T>> {
        let inspector = self.header_inspector.clone();
        self.start(move |response, request| {
            let response = check_status(response, request)?;
            let Response { headers, body, .. } = response;
            Ok(body.map(|body| inspect(&inspector, &headers, body)))
        })
    }

    /// Future of the call's completion, ignoring any body
    pub fn empty(self) -> ObservableFuture<()> {
        self.start(|response, request| {
            check_status(response, request)?;
            Ok(())
        })
    }

    /// Future of the response body along with its status and headers
    pub fn raw(self) -> ObservableFuture<RawResponse<T>> {
        let inspector = self.header_inspector.clone();
        self.start(move |response, request| {
            let (body, code, headers) = expect_body(response, request)?;
            let body = inspect(&inspector, &headers, body);
            Ok(RawResponse { body, code, headers })
        })
    }

    /// Block until the response arrives, then handle it as `body()` would
    ///
    /// This sends the call synchronously through `Call::execute()`, and
    /// should not be used on a dispatcher thread.
    ///
    pub fn execute(self) -> Result<T, Failure> {
        let request = self.call.request();
        let result = match self.call.execute() {
            Ok(response) => expect_body(response, &request).map(|(body, _, headers)| {
                inspect(&self.header_inspector, &headers, body)
            }),
            Err(cause) => Err(ServiceError::transport(cause, Some(request))),
        };
        result.map_err(|error| fail(&self.error_transform, error))
    }

    /// Build the future, then send the call now or on observation
    fn start<O, H>(self, handle: H) -> ObservableFuture<O>
        where O: Send + 'static,
              H: FnOnce(Response<T>, &Request) -> Result<O, ServiceError> + Send + 'static
    {
        let CallAdapter { call, lazy, error_transform, .. } = self;
        let enqueue_call = call.clone();
        let launch = move |completer: Completer<O>| {
            if completer.is_cancelled() {
                return;
            }
            let request = enqueue_call.request();
            trace!(%request, "Enqueuing network call");
            enqueue_call.enqueue(Box::new(move |outcome| {
                let result = match outcome {
                    Ok(response) => handle(response, &request),
                    Err(cause) => Err(ServiceError::transport(cause, Some(request))),
                };
                completer.resolve(result.map_err(|error| fail(&error_transform, error)));
            }));
        };

        if lazy {
            let future = ObservableFuture::lazy(launch);
            Self::cancel_with(&future, &call);
            future
        } else {
            let (completer, future) = ObservableFuture::pending();
            Self::cancel_with(&future, &call);
            launch(completer);
            future
        }
    }

    fn cancel_with<O: Send + 'static>(future: &ObservableFuture<O>, call: &Arc<dyn Call<T>>) {
        // The future may be the only owner of the call. The call points back
        // to the future through its callback until it answers, and the hook
        // goes away once run.
        let call = call.clone();
        future.on_cancel(move || {
            debug!(request = %call.request(), "Cancelling network call");
            call.cancel();
        });
    }
}


/// Wrap a call whose body is required
pub fn wrap_to_future<T: Send + 'static>(call: Arc<dyn Call<T>>) -> ObservableFuture<T> {
    CallAdapter::new(call).body()
}

/// Wrap a call whose body may be absent
pub fn wrap_optional<T: Send + 'static>(call: Arc<dyn Call<T>>) -> ObservableFuture<Option<T>> {
    CallAdapter::new(call).optional()
}

/// Wrap a call whose body is irrelevant
pub fn wrap_empty<T: Send + 'static>(call: Arc<dyn Call<T>>) -> ObservableFuture<()> {
    CallAdapter::new(call).empty()
}

/// Wrap a call, keeping the response status and headers along with the body
pub fn wrap_raw<T: Send + 'static>(call: Arc<dyn Call<T>>) -> ObservableFuture<RawResponse<T>> {
    CallAdapter::new(call).raw()
}


/// Reject unsuccessful responses
fn check_status<T>(response: Response<T>, request: &Request) -> Result<Response<T>, ServiceError> {
    if response.is_successful() {
        Ok(response)
    } else {
        Err(ServiceError::from_response(response.message.clone(),
                                        &response,
                                        Some(request.clone())))
    }
}


/// Reject unsuccessful responses and responses without a body
///
/// Returns the body along with the status code and headers.
///
fn expect_body<T>(response: Response<T>,
                  request: &Request) -> Result<(T, u16, Headers), ServiceError> {
    let mut response = check_status(response, request)?;
    match response.body.take() {
        Some(body) => Ok((body, response.code, response.headers)),
        None => Err(ServiceError::from_response("Empty response where a body was expected",
                                                &response,
                                                Some(request.clone()))),
    }
}


fn inspect<T>(inspector: &Option<HeaderInspector<T>>, headers: &Headers, body: T) -> T {
    match inspector {
        Some(inspector) => inspector(headers, body),
        None => body,
    }
}


fn fail(transform: &Option<ErrorTransform>, error: ServiceError) -> Failure {
    match transform {
        Some(transform) => transform(error),
        None => Failure::new(error),
    }
}
