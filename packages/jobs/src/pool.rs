//! Contract for the external worker pool that executes job payloads.

use futures_util::future::BoxFuture;

/// Result type for a single job execution.
pub type ExecResult = Result<(), String>;

/// Future type for async job execution.
pub type ExecFuture = BoxFuture<'static, ExecResult>;

/// Executes jobs on external worker processes.
///
/// The pool receives the serialized identity envelope and the raw payload
/// as two separate frames, matching what workers expect on the wire.
pub trait WorkerPool: Send + Sync + 'static {
    /// Run one job to completion.
    fn exec(&self, context: Vec<u8>, body: Vec<u8>) -> ExecFuture;
}

/// A simple function-based worker pool.
pub struct FnPool<F>
where
    F: Fn(Vec<u8>, Vec<u8>) -> ExecFuture + Send + Sync + 'static,
{
    exec: F,
}

impl<F> FnPool<F>
where
    F: Fn(Vec<u8>, Vec<u8>) -> ExecFuture + Send + Sync + 'static,
{
    /// Create a new function-based pool.
    pub fn new(exec: F) -> Self {
        Self { exec }
    }
}

impl<F> WorkerPool for FnPool<F>
where
    F: Fn(Vec<u8>, Vec<u8>) -> ExecFuture + Send + Sync + 'static,
{
    fn exec(&self, context: Vec<u8>, body: Vec<u8>) -> ExecFuture {
        (self.exec)(context, body)
    }
}
