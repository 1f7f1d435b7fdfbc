//! Integration tests exercising the real guest VM through the public
//! facade. These require the linked mruby library (see `build.rs`) and so
//! only run where that's available; the pure-Rust bridge/accounting logic
//! has its own unit tests alongside each module in `src/`.

use std::cell::RefCell;
use std::rc::Rc;

use mrb_sandbox::{ErrorKind, Sandbox, SandboxConfig, SandboxError, Value};

fn open() -> Sandbox {
    Sandbox::open(SandboxConfig::new()).expect("failed to open sandbox")
}

#[test]
fn state_persists_across_evals() {
    let mut sandbox = open();
    sandbox.eval("x = 41").unwrap();
    let result = sandbox.eval("x + 1").unwrap();
    assert!(result.is_success());
    assert_eq!(result.value.as_deref(), Some("42"));
}

#[test]
fn underscore_holds_previous_result() {
    let mut sandbox = open();
    sandbox.eval("6 * 7").unwrap();
    let result = sandbox.eval("_").unwrap();
    assert_eq!(result.value.as_deref(), Some("42"));
}

#[test]
fn puts_of_array_recurses_one_level() {
    let mut sandbox = open();
    let result = sandbox.eval("puts [1, [2, 3]]").unwrap();
    assert!(result.is_success());
    assert_eq!(result.output, "1\n2\n3\n");
}

#[test]
fn syntax_error_reports_relative_line_number() {
    let mut sandbox = open();
    let result = sandbox.eval("def broken(\n").unwrap();
    assert!(!result.is_success());
    assert_eq!(result.error_kind, ErrorKind::Runtime);
    assert!(result.error.as_deref().unwrap().starts_with("SyntaxError:"));
}

#[test]
fn timeout_is_classified_distinctly_from_other_runtime_errors() {
    let mut sandbox = Sandbox::open(SandboxConfig::new().with_timeout_seconds(0.05)).unwrap();
    let result = sandbox.eval("loop { }").unwrap();
    assert!(!result.is_success());
    assert_eq!(result.error_kind, ErrorKind::Timeout);
}

#[test]
fn memory_limit_is_classified_distinctly() {
    let mut sandbox = Sandbox::open(SandboxConfig::new().with_memory_limit_bytes(64 * 1024)).unwrap();
    let result = sandbox.eval("s = ''; loop { s << ('x' * 1024) }").unwrap();
    assert!(!result.is_success());
    assert_eq!(result.error_kind, ErrorKind::MemoryLimit);
}

#[test]
fn tool_call_with_unbridgeable_argument_raises_type_error() {
    let mut sandbox = open();
    sandbox.define_function("host_echo").unwrap();
    sandbox.set_callback(Box::new(|_name, args| Ok(args.first().cloned().unwrap_or(Value::Nil))));
    let result = sandbox.eval("class Unsandboxable; end; host_echo(Unsandboxable.new)").unwrap();
    assert!(!result.is_success());
    assert!(result.error.as_deref().unwrap().contains("unsupported type for sandbox"));
}

#[test]
fn tool_call_roundtrips_bridge_values() {
    let mut sandbox = open();
    sandbox.define_function("host_echo").unwrap();
    sandbox.set_callback(Box::new(|name, args| {
        assert_eq!(name, "host_echo");
        Ok(args.first().cloned().unwrap_or(Value::Nil))
    }));
    let result = sandbox.eval("host_echo(41)").unwrap();
    assert!(result.is_success());
    assert_eq!(result.value.as_deref(), Some("41"));
}

#[test]
fn tool_call_roundtrips_nested_array_and_mixed_key_hash() {
    let mut sandbox = open();
    sandbox.define_function("host_echo").unwrap();
    let received: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    let received_clone = Rc::clone(&received);
    sandbox.set_callback(Box::new(move |_name, args| {
        *received_clone.borrow_mut() = args.first().cloned();
        Ok(args.first().cloned().unwrap_or(Value::Nil))
    }));

    let result = sandbox.eval("host_echo([1, {1.5 => 'x', [2, 3] => 9}])").unwrap();
    assert!(result.is_success());

    let received = received.borrow_mut().take().expect("callback ran");
    let Value::Array(items) = received else {
        panic!("expected an array argument, got {received:?}");
    };
    assert_eq!(items[0], Value::Integer(1));
    let Value::Hash(pairs) = &items[1] else {
        panic!("expected a hash as the second element, got {:?}", items[1]);
    };
    assert!(pairs.contains(&(Value::Float(1.5), Value::from_str("x"))));
    assert!(pairs.contains(&(
        Value::Array(vec![Value::Integer(2), Value::Integer(3)]),
        Value::Integer(9)
    )));
}

#[test]
fn tool_callback_error_propagates_as_runtime_error() {
    let mut sandbox = open();
    sandbox.define_function("host_fail").unwrap();
    sandbox.set_callback(Box::new(|_name, _args| Err("boom".to_string())));
    let result = sandbox.eval("host_fail").unwrap();
    assert!(!result.is_success());
    assert_eq!(result.error_kind, ErrorKind::Runtime);
    assert!(result.error.as_deref().unwrap().contains("boom"));
}

#[test]
fn calling_unregistered_tool_with_no_callback_raises() {
    let mut sandbox = open();
    let result = sandbox.eval("no_such_tool_registered").unwrap();
    assert!(!result.is_success());
}

#[test]
fn tool_names_persist_across_reset() {
    let mut sandbox = open();
    sandbox.define_function("survives_reset").unwrap();
    sandbox.set_callback(Box::new(|_name, _args| Ok(Value::Integer(9))));
    sandbox.reset().unwrap();
    let result = sandbox.eval("survives_reset").unwrap();
    assert!(result.is_success());
    assert_eq!(result.value.as_deref(), Some("9"));
}

#[test]
fn reset_clears_top_level_locals() {
    let mut sandbox = open();
    sandbox.eval("x = 1").unwrap();
    sandbox.reset().unwrap();
    let result = sandbox.eval("defined?(x)").unwrap();
    assert_eq!(result.value.as_deref(), Some("nil"));
}

#[test]
fn closed_session_rejects_eval() {
    let mut sandbox = open();
    sandbox.close();
    assert!(sandbox.is_closed());
    let err = sandbox.eval("1").unwrap_err();
    assert_eq!(err, SandboxError::Closed);
}

#[test]
fn close_is_idempotent() {
    let mut sandbox = open();
    sandbox.close();
    sandbox.close();
    assert!(sandbox.is_closed());
}

#[test]
fn failed_eval_still_captures_output_emitted_before_the_error() {
    let mut sandbox = open();
    let result = sandbox.eval("puts 'before'; raise 'boom'").unwrap();
    assert!(!result.is_success());
    assert_eq!(result.output, "before\n");
}
