//! Base of data repositories backed by network calls
//!
//! A `Repository` turns calls into futures in a uniform way. When asked to
//! keep the error source, it records a backtrace every time a call is made,
//! and attaches it to the failure if the call fails.

use crate::config::NetworkConfig;
use crate::error::Failure;
use crate::future::ObservableFuture;
use crate::net::adapter::{CallAdapter, ErrorTransform};
use crate::net::{Call, RawResponse, ServiceError, TracedError};
use std::backtrace::Backtrace;
use std::sync::Arc;


/// Network-backed data source
#[derive(Clone, Copy, Debug, Default)]
pub struct Repository {
    /// Whether failures should carry a backtrace of the call site
    keep_error_source: bool,
}
//
impl Repository {
    /// Create a repository
    ///
    /// Keeping the error source costs a backtrace capture per call, so it is
    /// best reserved to debugging.
    ///
    pub fn new(keep_error_source: bool) -> Self {
        Repository { keep_error_source }
    }

    /// Create a repository configured from settings
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.keep_error_source)
    }

    /// Check whether failures carry a backtrace of the call site
    pub fn keeps_error_source(&self) -> bool {
        self.keep_error_source
    }

    /// Turn a call into a future of its body
    pub fn make_call<T: Send + 'static>(&self, call: Arc<dyn Call<T>>) -> ObservableFuture<T> {
        self.adapter(call).body()
    }

    /// Turn a call into a future of its body, which may be absent
    pub fn make_optional_call<T: Send + 'static>(&self,
                                                 call: Arc<dyn Call<T>>)
        -> ObservableFuture<Option<T>>
    {
        self.adapter(call).optional()
    }

    /// Turn a call into a future of its body, status and headers
    pub fn make_raw_call<T: Send + 'static>(&self,
                                            call: Arc<dyn Call<T>>)
        -> ObservableFuture<RawResponse<T>>
    {
        self.adapter(call).raw()
    }

    /// Turn a call into a future of its transformed body
    pub fn make_call_map<T, O, F>(&self, call: Arc<dyn Call<T>>, transform: F) -> ObservableFuture<O>
        where T: Send + 'static,
              O: Send + 'static,
              F: FnOnce(T) -> O + Send + 'static
    {
        self.make_call(call).map(transform)
    }

    /// Turn a call into a future of its transformed body, status and headers
    pub fn make_raw_call_map<T, O, F>(&self,
                                      call: Arc<dyn Call<T>>,
                                      transform: F) -> ObservableFuture<RawResponse<O>>
        where T: Send + 'static,
              O: Send + 'static,
              F: FnOnce(T) -> O + Send + 'static
    {
        self.make_raw_call(call).map(move |raw| raw.map(transform))
    }

    fn adapter<T: Send + 'static>(&self, call: Arc<dyn Call<T>>) -> CallAdapter<T> {
        let adapter = CallAdapter::new(call);
        if !self.keep_error_source {
            return adapter;
        }
        let call_site = Arc::new(Backtrace::force_capture());
        let transform: ErrorTransform = Arc::new(move |error: ServiceError| {
            Failure::new(TracedError::new(error, call_site.clone()))
        });
        adapter.map_error(transform)
    }
}
