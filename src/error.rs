//! Error types for the sandbox crate.
//!
//! Three error lanes: lifecycle failures that abort the facade call itself,
//! and the two terminal-but-recoverable outcomes (`Timeout`, `MemoryLimit`)
//! that are instead carried in [`EvalResult`] so that a terminated eval
//! never loses its captured output.

use thiserror::Error;

/// Errors returned directly by facade operations (`open`, `define_function`,
/// `eval`'s lifecycle preconditions). These are distinct from the per-eval
/// `Runtime`/`Timeout`/`MemoryLimit` outcomes, which are classified inside
/// [`EvalResult`] instead of unwinding the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The guest VM failed to open (out of memory, allocator rejected the
    /// initial unlimited-mode allocations).
    #[error("failed to initialize sandbox VM")]
    Init,

    /// The session has already been closed; no further operation may
    /// succeed except `close`/`is_closed`.
    #[error("sandbox session is closed")]
    Closed,

    /// `eval` was invoked from within a running tool callback on the same
    /// session. Rejected outright rather than risking state corruption.
    #[error("eval() called re-entrantly from a tool callback")]
    ReentrantEval,

    /// More than 64 tool names were registered on one session.
    #[error("tool registry capacity exceeded: at most {max} names, attempted to add {attempted}")]
    ToolCapacityExceeded {
        /// The maximum number of registrable tool names.
        max: usize,
        /// The total that would result from this registration.
        attempted: usize,
    },
}

/// Result type for facade lifecycle operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Classification of a terminated or failed `eval`, assigned strictly by
/// flag inspection (never by matching substrings of the error message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// The eval completed (successfully or with a guest exception that is
    /// neither a timeout nor a memory-limit trip).
    #[default]
    None,
    /// A guest-level failure: syntax error, uncaught exception, unsupported
    /// bridge type, or a propagated tool-callback error.
    Runtime,
    /// The deadline watcher's `expired` flag was set during this eval.
    Timeout,
    /// The memory tracker's `exceeded` flag was set during this eval.
    MemoryLimit,
}

/// The outcome of one `Sandbox::eval` call.
///
/// `value` and `error` are mutually exclusive: a successful eval populates
/// `value` and leaves `error` `None` with `error_kind = ErrorKind::None`; a
/// failed eval (of any kind) populates `error` and leaves `value` `None`.
/// `output` is always present, and reflects whatever was written to
/// `print`/`puts`/`p` before the failure (if any) occurred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalResult {
    /// The `inspect` string of the expression's value, on success.
    pub value: Option<String>,
    /// Captured standard-output bytes, decoded lossily to a `String` for
    /// the Rust-facing API (the underlying buffer is binary-safe).
    pub output: String,
    /// The error message, on any failure.
    pub error: Option<String>,
    /// The classification of `error`, always `None` on success.
    pub error_kind: ErrorKind,
}

impl EvalResult {
    /// True if this eval completed without error.
    pub fn is_success(&self) -> bool {
        self.error_kind == ErrorKind::None && self.error.is_none()
    }
}
