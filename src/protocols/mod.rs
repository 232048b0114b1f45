// SPDX-License-Identifier: GPL-2.0-or-later

//! Protocol request executors.
//!
//! Every executor compiles its template against a target, generates
//! request variants from the payload iterator, dispatches them on a
//! bounded worker pool and streams result envelopes over a channel that
//! is closed exactly once, after the pool has drained. Recoverable
//! errors accumulate in a multi-error which is sent as the final
//! envelope.

pub mod dns;
mod error;
mod event;
pub mod http;
pub mod network;
pub mod utils;

#[cfg(test)]
mod tests;

pub use error::{MultiError, RequestError};
pub use event::{create_event, EventParts, InternalEvent, WrappedEvent};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::FileAuthProvider;
use crate::models::Protocol;
use crate::runtime::{Dialer, RateLimiter, WorkerPool};
use crate::vars::{self, Variables};

/// One envelope of the result stream.
#[derive(Debug)]
pub enum RequestResult {
    Event(WrappedEvent),
    Error(RequestError),
}

/// Write sink for request status and stored debug data.
pub trait Output: Send + Sync {
    fn request(
        &self,
        template_path: &str,
        target: &str,
        protocol: Protocol,
        error: Option<&RequestError>,
    );
    fn write_store_debug_data(&self, target: &str, template_id: &str, protocol: Protocol, data: &str);
}

/// Scan progress counters.
pub trait Progress: Send + Sync {
    fn increment_requests(&self);
    fn increment_failed_requests_by(&self, count: usize);
}

/// An event waiting for its out-of-band interaction.
pub struct OastRequest {
    pub placeholders: Vec<String>,
    pub event: WrappedEvent,
}

/// Out-of-band interaction collaborator. Correlation tokens are
/// submitted here; completed events arrive asynchronously through the
/// collaborator's own registry.
pub trait Interactsh: Send + Sync {
    /// Rewrites interaction markers in `text`, returning the rewritten
    /// text and the accumulated placeholder URLs.
    fn replace(&self, text: &str, existing: Vec<String>) -> (String, Vec<String>);
    /// Records the placeholder URLs on an event under construction.
    fn make_placeholders(&self, placeholders: &[String], event: &mut InternalEvent);
    /// Registers an event to be completed when (or if) the interaction
    /// arrives within the poll window.
    fn request_event(&self, request: OastRequest);
}

/// Narrow view on the operator engine used from raw TCP input captures.
pub trait Operators: Send + Sync {
    /// Runs the internal extractors over captured data, returning newly
    /// harvested variables.
    fn execute_internal_extractors(&self, data: &InternalEvent) -> Variables;
}

/// CLI and environment level options relevant to request execution.
#[derive(Clone)]
pub struct ScanOptions {
    /// Variables passed on the command line or environment.
    pub vars: Variables,
    /// Connection timeout for all dials.
    pub timeout: Duration,
    /// Global payload concurrency knob. Worker pools of templates whose
    /// thread count equals this value track changes between iterations.
    pub payload_concurrency: Arc<AtomicUsize>,
    /// Probe identical endpoints once per template execution.
    pub disable_clustering: bool,
    /// Store request/response dumps through the output sink.
    pub store_response: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            vars: Variables::new(),
            timeout: Duration::from_secs(10),
            payload_concurrency: Arc::new(AtomicUsize::new(25)),
            disable_clustering: false,
            store_response: false,
        }
    }
}

/// Everything an executor needs besides the template itself. Shared
/// resources (dialer, rate limiter) are constructed once at program
/// start and passed by reference to all executors.
#[derive(Clone)]
pub struct ExecutorOptions {
    pub template_id: String,
    pub template_path: String,
    /// Template variable definitions; values may contain expressions and
    /// are evaluated against the base variables per target.
    pub variables: Variables,
    /// Template constants.
    pub constants: Variables,
    pub options: ScanOptions,
    pub output: Arc<dyn Output>,
    pub progress: Arc<dyn Progress>,
    pub interactsh: Option<Arc<dyn Interactsh>>,
    pub operators: Option<Arc<dyn Operators>>,
    pub auth: Option<Arc<FileAuthProvider>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub dialer: Dialer,
    pub stop_at_first_match: bool,
}

impl ExecutorOptions {
    /// Evaluates the template variable definitions against the base
    /// variables of the current target.
    pub fn evaluate_variables(&self, base: &Variables) -> Variables {
        let mut out = Variables::new();
        for (name, value) in self.variables.iter() {
            match vars::evaluate(&value.to_string(), base) {
                Ok(evaluated) => out.insert(name.clone(), evaluated),
                Err(_) => out.insert(name.clone(), value.clone()),
            }
        }
        out
    }

    /// The worker pool for a template thread count, plus whether the
    /// pool has to track the global payload concurrency option.
    pub fn pool_for(&self, threads: usize) -> (WorkerPool, bool) {
        let follow_global = threads == self.options.payload_concurrency.load(Ordering::SeqCst);
        (WorkerPool::new(threads), follow_global)
    }

    /// Resize checkpoint executed on every payload iteration; a no-op
    /// when nothing changed.
    pub fn resize_checkpoint(&self, pool: &WorkerPool, follow_global: bool) {
        if follow_global {
            let global = self.options.payload_concurrency.load(Ordering::SeqCst);
            if pool.size() != global {
                pool.resize(global);
            }
        }
    }
}

/// Cancellation flag carried by every dispatch.
pub type CancelToken = Arc<AtomicBool>;

pub(crate) fn cancelled(token: &CancelToken) -> bool {
    token.load(Ordering::SeqCst)
}
