//! # mrb-sandbox
//!
//! An embedded scripting sandbox built on mruby: a durable interpreter
//! session with wall-clock and heap limits, captured `print`/`puts`/`p`
//! output, typed failure classification, and a host tool-call bridge.
//!
//! ## Architecture
//!
//! - [`Sandbox`]: the public facade most embedders use directly.
//! - [`session::Session`]: owns the guest VM handle and drives the
//!   parse/codegen/run pipeline for each `eval`.
//! - [`ffi`]: the raw `extern "C"` bindings to the guest's C ABI, and the
//!   vendored shim (`csrc/shim.c`) it's paired with.
//! - [`mem_tracker`]: the header-prepended allocator shim and per-session
//!   heap accountant the guest's allocator callback is bound to.
//! - [`deadline`]: the cooperative, fetch-hook-driven wall-clock watchdog.
//! - [`value`]: the tagged intermediate representation shared across the
//!   host/guest boundary.
//! - [`tools`]: the tool-name registry and host-callback trampoline.
//! - [`output`]: the captured-output buffer backing `print`/`puts`/`p`.
//! - [`config`]: the in-memory, builder-style session configuration.
//! - [`error`]: the lifecycle error type and per-eval outcome classification.
//!
//! ## Example
//!
//! ```no_run
//! use mrb_sandbox::{Sandbox, SandboxConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sandbox = Sandbox::open(
//!     SandboxConfig::new()
//!         .with_timeout_seconds(2.0)
//!         .with_memory_limit_bytes(16 * 1024 * 1024),
//! )?;
//!
//! let result = sandbox.eval("puts 'hello'; 1 + 1")?;
//! assert!(result.is_success());
//! assert_eq!(result.output, "hello\n");
//! assert_eq!(result.value.as_deref(), Some("2"));
//!
//! sandbox.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod deadline;
pub mod error;
pub mod ffi;
pub mod mem_tracker;
pub mod output;
pub mod sandbox;
pub mod session;
pub mod tools;
pub mod value;

pub use config::SandboxConfig;
pub use error::{ErrorKind, EvalResult, SandboxError, SandboxResult};
pub use sandbox::Sandbox;
pub use tools::ToolCallback;
pub use value::Value;
