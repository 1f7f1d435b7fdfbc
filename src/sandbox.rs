//! The public facade: a durable, single-threaded scripting sandbox.
//!
//! `Sandbox` owns one [`crate::session::Session`] and is the only type most
//! embedders need to touch; the session module is exposed mainly so the FFI
//! plumbing underneath it can be documented, not because most embedders
//! should construct a `Session` directly.

use crate::config::SandboxConfig;
use crate::error::{EvalResult, SandboxResult};
use crate::session::Session;
use crate::tools::ToolCallback;

/// A durable mruby interpreter session with wall-clock and heap limits,
/// output capture, and a host tool-call bridge.
///
/// # Example
///
/// ```no_run
/// use mrb_sandbox::{Sandbox, SandboxConfig};
///
/// let mut sandbox = Sandbox::open(SandboxConfig::new().with_timeout_seconds(1.0))
///     .expect("failed to open sandbox");
/// let result = sandbox.eval("1 + 1").expect("eval failed to run");
/// assert!(result.is_success());
/// assert_eq!(result.value.as_deref(), Some("2"));
/// ```
pub struct Sandbox {
    session: Session,
}

impl Sandbox {
    /// Opens a new sandbox with the given configuration.
    pub fn open(config: SandboxConfig) -> SandboxResult<Self> {
        log::info!(
            "opening sandbox session (timeout_seconds={}, memory_limit_bytes={})",
            config.timeout_seconds,
            config.memory_limit_bytes
        );
        let session = Session::open(config)?;
        Ok(Self { session })
    }

    /// Registers `name` as a guest-callable method backed by the session's
    /// tool callback (set separately via [`Self::set_callback`]). Calling a
    /// registered name before a callback is set raises a guest-level
    /// `RuntimeError`.
    pub fn define_function(&mut self, name: &str) -> SandboxResult<()> {
        log::debug!("registering tool function {name:?}");
        self.session.define_function(name)
    }

    /// Installs (or replaces) the callback invoked for every registered tool
    /// name. The callback receives the called name and its already
    /// bridge-converted arguments, and returns either a bridge [`crate::value::Value`] or
    /// an error message that surfaces to the guest as a `RuntimeError`.
    pub fn set_callback(&mut self, callback: ToolCallback) {
        self.session.set_callback(callback);
    }

    /// Evaluates one chunk of guest source against this session's
    /// persistent state (top-level locals, constants, and the `_` REPL
    /// variable all survive across calls).
    pub fn eval(&mut self, code: &str) -> SandboxResult<EvalResult> {
        let result = self.session.eval(code)?;
        if !result.is_success() {
            log::warn!(
                "eval failed ({:?}): {}",
                result.error_kind,
                result.error.as_deref().unwrap_or("")
            );
        }
        Ok(result)
    }

    /// Discards all guest-side state (a fresh VM, fresh top-level locals,
    /// fresh `_`) while keeping configuration and registered tool names.
    pub fn reset(&mut self) -> SandboxResult<()> {
        log::info!("resetting sandbox session");
        self.session.reset()
    }

    /// Tears the session down. Idempotent.
    pub fn close(&mut self) {
        log::info!("closing sandbox session");
        self.session.close();
    }

    /// `true` once [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}
