//! Tool registry and trampoline.
//!
//! On the guest side, every registered tool name is backed by the *same*
//! method body (see `ffi.rs`'s extern "C" trampoline export); this module
//! holds the registered-name bookkeeping and the host-callback dispatch
//! logic that trampoline delegates into once it has already converted the
//! guest arguments to bridge [`Value`]s.

use crate::config::MAX_TOOL_NAMES;
use crate::error::SandboxError;
use crate::value::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// The host-supplied tool callback. Boxed as `FnMut` because host state
/// (counters, captured handles) commonly needs to be mutated across calls;
/// the session only ever calls it synchronously and never re-entrantly.
pub type ToolCallback = Box<dyn FnMut(&str, &[Value]) -> Result<Value, String>>;

/// Holds the set of tool names registered on a session. Names survive
/// `reset` (the registry itself is never recreated; only the guest-side
/// method bindings are reinstalled).
#[derive(Default)]
pub struct ToolRegistry {
    names: Vec<String>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    /// Registers a new tool name, failing once 64 names are already held.
    pub fn register(&mut self, name: &str) -> Result<(), SandboxError> {
        if self.names.len() >= MAX_TOOL_NAMES {
            return Err(SandboxError::ToolCapacityExceeded {
                max: MAX_TOOL_NAMES,
                attempted: self.names.len() + 1,
            });
        }
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
        Ok(())
    }

    /// `true` if `name` was registered (there is no unregister operation).
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// All registered names, in registration order — re-walked by `reset`
    /// to reinstall the guest-side method bindings on the fresh VM.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A failure that occurred while dispatching one tool call through the
/// trampoline. The FFI layer turns each of these into the corresponding
/// guest-level exception (`TypeError` for a conversion failure, `RuntimeError`
/// otherwise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrampolineError {
    /// No callback has been registered with `set_callback` yet.
    NoCallback,
    /// The host callback returned an error string.
    Callback(String),
    /// The host callback panicked; the panic payload (if a string) is
    /// carried as the message. Panics never unwind across the FFI
    /// boundary into the guest VM's C frames.
    Panicked(String),
}

impl std::fmt::Display for TrampolineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrampolineError::NoCallback => write!(f, "no tool callback registered"),
            TrampolineError::Callback(msg) => write!(f, "{msg}"),
            TrampolineError::Panicked(msg) => write!(f, "tool callback panicked: {msg}"),
        }
    }
}

/// Invokes `callback` with already-bridge-converted arguments, catching
/// both the callback's own error return and any Rust panic unwinding out of
/// it. This is the part of the dispatch that doesn't need the guest VM
/// pointer; `session.rs`'s trampoline does the argument conversion and
/// guest-exception raising around this call.
pub fn dispatch(
    callback: Option<&mut ToolCallback>,
    method_name: &str,
    args: &[Value],
) -> Result<Value, TrampolineError> {
    let Some(callback) = callback else {
        return Err(TrampolineError::NoCallback);
    };
    let result = catch_unwind(AssertUnwindSafe(|| callback(method_name, args)));
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(TrampolineError::Callback(message)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(TrampolineError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_up_to_capacity() {
        let mut reg = ToolRegistry::new();
        for i in 0..MAX_TOOL_NAMES {
            reg.register(&format!("tool{i}")).unwrap();
        }
        let err = reg.register("one_too_many").unwrap_err();
        assert_eq!(
            err,
            SandboxError::ToolCapacityExceeded {
                max: MAX_TOOL_NAMES,
                attempted: MAX_TOOL_NAMES + 1,
            }
        );
    }

    #[test]
    fn dispatch_with_no_callback_errors() {
        let err = dispatch(None, "foo", &[]).unwrap_err();
        assert_eq!(err, TrampolineError::NoCallback);
    }

    #[test]
    fn dispatch_propagates_callback_error() {
        let mut cb: ToolCallback = Box::new(|_name, _args| Err("boom".to_string()));
        let err = dispatch(Some(&mut cb), "foo", &[]).unwrap_err();
        assert_eq!(err, TrampolineError::Callback("boom".to_string()));
    }

    #[test]
    fn dispatch_contains_a_panic() {
        let mut cb: ToolCallback = Box::new(|_name, _args| panic!("bad callback"));
        let err = dispatch(Some(&mut cb), "foo", &[]).unwrap_err();
        match err {
            TrampolineError::Panicked(msg) => assert!(msg.contains("bad callback")),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_returns_callback_value() {
        let mut cb: ToolCallback = Box::new(|name, args| {
            assert_eq!(name, "echo");
            Ok(args.first().cloned().unwrap_or(Value::Nil))
        });
        let args = vec![Value::Integer(7)];
        let result = dispatch(Some(&mut cb), "echo", &args).unwrap();
        assert_eq!(result, Value::Integer(7));
    }
}
