//! The session engine: owns one guest VM instance and drives the
//! parse/generate/run pipeline backing each `eval` call.
//!
//! Everything unsafe about talking to the guest lives here and in `ffi.rs`;
//! `sandbox.rs` is a thin, entirely-safe facade over this type.

use std::cell::{Cell, RefCell};
use std::ffi::CString;
use libc::{c_int, c_void};

use crate::config::SandboxConfig;
use crate::deadline::DeadlineWatcher;
use crate::error::{ErrorKind, EvalResult, SandboxError, SandboxResult};
use crate::ffi::{self, MrbState, MrbValue};
use crate::mem_tracker::{MemoryTracker, TrackerGuard};
use crate::output::{OutputBuffer, PutsArg};
use crate::tools::{self, ToolCallback, ToolRegistry, TrampolineError};
use crate::value::Value;

/// Depth limit on recursive array/hash conversion, guarding against cyclic
/// or pathologically deep guest structures overflowing the host stack.
const MAX_CONVERSION_DEPTH: usize = 64;

/// Guest-visible side of a session, reachable from every trampoline and
/// hook through `mrb->ud`. The guest VM is single-threaded and
/// non-reentrant into Rust except through these callback points, so
/// `RefCell`/`Cell` are sufficient; there is no cross-thread sharing.
struct SessionState {
    output: RefCell<OutputBuffer>,
    tracker: MemoryTracker,
    deadline: RefCell<DeadlineWatcher>,
    callback: RefCell<Option<ToolCallback>>,
    in_callback: Cell<bool>,
}

/// An open guest interpreter plus all per-session bookkeeping. Never
/// `Sync`; never `Send` — the guest VM pins itself to the thread it was
/// opened on.
pub struct Session {
    mrb: *mut MrbState,
    cxt: *mut ffi::MrbcContext,
    stack_keep: i64,
    arena_idx: c_int,
    closed: bool,
    config: SandboxConfig,
    tools: ToolRegistry,
    state: Box<SessionState>,
}

impl Session {
    /// Opens a new guest VM and installs the `print`/`puts`/`p` overrides
    /// and the `_` REPL variable, matching `sandbox_state_new` +
    /// `sandbox_setup_mrb`.
    pub fn open(config: SandboxConfig) -> SandboxResult<Self> {
        let tracker = MemoryTracker::new();
        let guard = TrackerGuard::activate(&tracker);

        let mrb = unsafe { ffi::mrb_open_allocf(guest_alloc, std::ptr::null_mut()) };
        if mrb.is_null() {
            drop(guard);
            return Err(SandboxError::Init);
        }
        if unsafe { ffi::mrb_sandbox_has_exc(mrb) } != 0 {
            unsafe { ffi::mrb_close(mrb) };
            drop(guard);
            return Err(SandboxError::Init);
        }

        let cxt = unsafe { ffi::mrb_ccontext_new(mrb) };
        unsafe {
            ffi::mrb_sandbox_set_capture_errors(cxt, 1);
            let filename = CString::new("(sandbox)").unwrap();
            ffi::mrb_ccontext_filename(mrb, cxt, filename.as_ptr());
        }

        let arena_idx = unsafe { ffi::mrb_gc_arena_save(mrb) };

        let state = Box::new(SessionState {
            output: RefCell::new(OutputBuffer::new()),
            tracker,
            deadline: RefCell::new(DeadlineWatcher::new(config.fetch_hook_interval)),
            callback: RefCell::new(None),
            in_callback: Cell::new(false),
        });

        let mut session = Session {
            mrb,
            cxt,
            stack_keep: 0,
            arena_idx,
            closed: false,
            config,
            tools: ToolRegistry::new(),
            state,
        };

        unsafe {
            ffi::mrb_sandbox_set_ud(session.mrb, &*session.state as *const SessionState as *mut _);
            session.install_builtin_overrides();
            session.stack_keep = ffi::mrb_sandbox_parse_underscore_init(session.mrb, session.cxt);
        }

        drop(guard);
        Ok(session)
    }

    unsafe fn install_builtin_overrides(&self) {
        let kernel = ffi::mrb_sandbox_kernel_module(self.mrb);
        define_method(self.mrb, kernel, "print", trampoline_print);
        define_method(self.mrb, kernel, "puts", trampoline_puts);
        define_method(self.mrb, kernel, "p", trampoline_p);
        for name in self.tools.names() {
            self.define_tool_method(name);
        }
    }

    unsafe fn define_tool_method(&self, name: &str) {
        let kernel = ffi::mrb_sandbox_kernel_module(self.mrb);
        define_method(self.mrb, kernel, name, trampoline_tool);
    }

    /// Registers a host tool name, installing its guest-side binding
    /// immediately (and on every subsequent `reset`).
    pub fn define_function(&mut self, name: &str) -> SandboxResult<()> {
        if self.closed {
            return Err(SandboxError::Closed);
        }
        self.tools.register(name)?;
        unsafe { self.define_tool_method(name) };
        Ok(())
    }

    /// Installs (or replaces) the host callback backing every registered
    /// tool name.
    pub fn set_callback(&self, callback: ToolCallback) {
        *self.state.callback.borrow_mut() = Some(callback);
    }

    /// Evaluates one chunk of guest source, mirroring `sandbox_state_eval`
    /// step by step.
    pub fn eval(&mut self, code: &str) -> SandboxResult<EvalResult> {
        if self.closed {
            return Err(SandboxError::Closed);
        }
        if self.state.in_callback.get() {
            return Err(SandboxError::ReentrantEval);
        }

        self.state.output.borrow_mut().reset();
        let guard = TrackerGuard::activate(&self.state.tracker);
        self.state.tracker.begin(self.config.memory_limit_bytes as usize);

        let mut deadline = self.state.deadline.borrow_mut();
        deadline.begin(self.config.timeout_seconds);
        if deadline.is_armed() {
            unsafe { ffi::mrb_sandbox_set_code_fetch_hook(self.mrb, Some(code_fetch_hook)) };
        } else {
            unsafe { ffi::mrb_sandbox_set_code_fetch_hook(self.mrb, None) };
        }
        drop(deadline);

        let result = unsafe { self.eval_inner(code) };
        drop(guard);

        result
    }

    unsafe fn eval_inner(&mut self, code: &str) -> SandboxResult<EvalResult> {
        let lineno = ffi::mrb_sandbox_lineno(self.cxt);
        let parser = ffi::mrb_parser_new(self.mrb);
        let bytes = code.as_bytes();
        ffi::mrb_sandbox_parser_set_source(parser, bytes.as_ptr() as *const _, bytes.len(), lineno);
        ffi::mrb_parser_parse(parser, self.cxt);

        let nerr = ffi::mrb_sandbox_parser_nerr(parser);
        if nerr > 0 {
            let msg_ptr = ffi::mrb_sandbox_parser_error_message(parser, 0);
            let msg = std::ffi::CStr::from_ptr(msg_ptr).to_string_lossy().into_owned();
            let err_lineno = ffi::mrb_sandbox_parser_error_lineno(parser, 0);
            let relative_line = err_lineno - lineno + 1;
            ffi::mrb_parser_free(parser);
            let output = self.state.output.borrow_mut().take_lossy();
            return Ok(EvalResult {
                value: None,
                output,
                error: Some(format!("SyntaxError: {msg} (line {relative_line})")),
                error_kind: ErrorKind::Runtime,
            });
        }

        let proc = ffi::mrb_generate_code(self.mrb, parser);
        ffi::mrb_parser_free(parser);
        if proc.is_null() {
            let output = self.state.output.borrow_mut().take_lossy();
            return Ok(EvalResult {
                value: None,
                output,
                error: Some("code generation failed".to_string()),
                error_kind: ErrorKind::Runtime,
            });
        }

        ffi::mrb_sandbox_widen_env_if_needed(self.mrb, proc);
        let top_self = ffi::mrb_top_self(self.mrb);
        let mrb_result = ffi::mrb_vm_run(self.mrb, proc, top_self, self.stack_keep);
        self.stack_keep = ffi::mrb_sandbox_proc_nlocals(proc);

        // Stop enforcing limits before any post-run work (inspect, arena
        // restore) that still needs to allocate through this tracker.
        ffi::mrb_sandbox_set_code_fetch_hook(self.mrb, None);
        self.state.tracker.disarm();

        let output = self.state.output.borrow_mut().take_lossy();

        if ffi::mrb_sandbox_has_exc(self.mrb) != 0 {
            let exc_val = ffi::mrb_sandbox_exc_value(self.mrb);
            let inspected = ffi::mrb_sandbox_inspect(self.mrb, exc_val);
            let message = mrb_string_to_rust(self.mrb, inspected).unwrap_or_else(|| "unknown error".to_string());
            let error_kind = if self.state.deadline.borrow().expired() {
                ErrorKind::Timeout
            } else if self.state.tracker.exceeded() {
                ErrorKind::MemoryLimit
            } else {
                ErrorKind::Runtime
            };
            ffi::mrb_sandbox_clear_exc(self.mrb);
            ffi::mrb_gc_arena_restore(self.mrb, self.arena_idx);
            ffi::mrb_sandbox_set_lineno(self.cxt, lineno + 1);
            return Ok(EvalResult {
                value: None,
                output,
                error: Some(message),
                error_kind,
            });
        }

        let inspected = ffi::mrb_sandbox_inspect(self.mrb, mrb_result);
        let value = mrb_string_to_rust(self.mrb, inspected).unwrap_or_else(|| "(unprintable)".to_string());
        ffi::mrb_sandbox_store_underscore(self.mrb, mrb_result);
        ffi::mrb_gc_arena_restore(self.mrb, self.arena_idx);
        ffi::mrb_sandbox_set_lineno(self.cxt, lineno + 1);

        Ok(EvalResult {
            value: Some(value),
            output,
            error: None,
            error_kind: ErrorKind::None,
        })
    }

    /// Closes the current VM and opens a fresh one with the same
    /// configuration, re-registering all previously defined tool names.
    /// The memory tracker's `current`/`exceeded` counters are zeroed.
    pub fn reset(&mut self) -> SandboxResult<()> {
        if self.closed {
            return Err(SandboxError::Closed);
        }
        self.close_guest();
        self.state.tracker.zero();
        *self.state.deadline.borrow_mut() = DeadlineWatcher::new(self.config.fetch_hook_interval);

        let guard = TrackerGuard::activate(&self.state.tracker);
        let mrb = unsafe { ffi::mrb_open_allocf(guest_alloc, std::ptr::null_mut()) };
        if mrb.is_null() {
            drop(guard);
            self.closed = true;
            return Err(SandboxError::Init);
        }
        let cxt = unsafe { ffi::mrb_ccontext_new(mrb) };
        unsafe {
            ffi::mrb_sandbox_set_capture_errors(cxt, 1);
            let filename = CString::new("(sandbox)").unwrap();
            ffi::mrb_ccontext_filename(mrb, cxt, filename.as_ptr());
            ffi::mrb_sandbox_set_ud(mrb, &*self.state as *const SessionState as *mut _);
        }
        self.mrb = mrb;
        self.cxt = cxt;
        self.arena_idx = unsafe { ffi::mrb_gc_arena_save(self.mrb) };
        self.stack_keep = 0;
        unsafe {
            self.install_builtin_overrides();
            self.stack_keep = ffi::mrb_sandbox_parse_underscore_init(self.mrb, self.cxt);
        }
        drop(guard);
        Ok(())
    }

    fn close_guest(&mut self) {
        let guard = TrackerGuard::activate(&self.state.tracker);
        self.state.tracker.set_limit(0);
        unsafe {
            if !self.cxt.is_null() {
                ffi::mrb_ccontext_free(self.mrb, self.cxt);
            }
            if !self.mrb.is_null() {
                ffi::mrb_close(self.mrb);
            }
        }
        drop(guard);
    }

    /// Tears the session down. Idempotent: calling this twice is a no-op
    /// the second time.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.close_guest();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Adapts the guest's 4-argument allocator callback signature to
/// [`crate::mem_tracker::shim_alloc`]'s 2-argument realloc-family contract.
extern "C" fn guest_alloc(_mrb: *mut MrbState, ptr: *mut c_void, size: usize, _ud: *mut c_void) -> *mut c_void {
    unsafe { crate::mem_tracker::shim_alloc(ptr as *mut u8, size) as *mut c_void }
}

unsafe fn define_method(
    mrb: *mut MrbState,
    class: *mut ffi::RClass,
    name: &str,
    func: ffi::MrbFunc,
) {
    let cname = CString::new(name).expect("tool name must not contain a NUL byte");
    ffi::mrb_define_method(mrb, class, cname.as_ptr(), func, ffi::mrb_sandbox_args_any());
}

unsafe fn mrb_string_to_rust(mrb: *mut MrbState, v: MrbValue) -> Option<String> {
    if ffi::mrb_sandbox_string_p(v) == 0 {
        return None;
    }
    let ptr = ffi::mrb_sandbox_str_ptr(v);
    let len = ffi::mrb_sandbox_str_len(v);
    let slice = std::slice::from_raw_parts(ptr, len);
    let _ = mrb;
    Some(String::from_utf8_lossy(slice).into_owned())
}

/// Converts a guest value to the bridge [`Value`], recursing into arrays
/// and hashes up to [`MAX_CONVERSION_DEPTH`]. Mirrors `mrb_to_sandbox_value`.
unsafe fn mrb_value_to_value(mrb: *mut MrbState, v: MrbValue, depth: usize) -> Result<Value, String> {
    if depth > MAX_CONVERSION_DEPTH {
        return Err("structure nested too deeply for sandbox bridge".to_string());
    }
    if ffi::is_nil(v) {
        return Ok(Value::Nil);
    }
    if ffi::mrb_sandbox_fixnum_p(v) != 0 {
        return Ok(Value::Integer(ffi::mrb_sandbox_fixnum_to_int(v)));
    }
    if ffi::mrb_sandbox_float_p(v) != 0 {
        return Ok(Value::Float(ffi::mrb_sandbox_float_to_f64(v)));
    }
    if ffi::mrb_sandbox_string_p(v) != 0 {
        let ptr = ffi::mrb_sandbox_str_ptr(v);
        let len = ffi::mrb_sandbox_str_len(v);
        return Ok(Value::String(std::slice::from_raw_parts(ptr, len).to_vec()));
    }
    if ffi::mrb_sandbox_symbol_p(v) != 0 {
        let s = ffi::mrb_sandbox_sym_to_str(mrb, v);
        let ptr = ffi::mrb_sandbox_str_ptr(s);
        let len = ffi::mrb_sandbox_str_len(s);
        return Ok(Value::String(std::slice::from_raw_parts(ptr, len).to_vec()));
    }
    if ffi::mrb_sandbox_array_p(v) != 0 {
        let len = ffi::mrb_sandbox_ary_len(v);
        let mut items = Vec::with_capacity(len as usize);
        for i in 0..len {
            let item = ffi::mrb_sandbox_ary_ref(v, i);
            items.push(mrb_value_to_value(mrb, item, depth + 1)?);
        }
        return Ok(Value::Array(items));
    }
    if ffi::mrb_sandbox_hash_p(v) != 0 {
        let keys = ffi::mrb_sandbox_hash_keys(mrb, v);
        let klen = ffi::mrb_sandbox_ary_len(keys);
        let mut pairs = Vec::with_capacity(klen as usize);
        for i in 0..klen {
            let key_v = ffi::mrb_sandbox_ary_ref(keys, i);
            let val_v = ffi::mrb_sandbox_hash_get(mrb, v, key_v);
            let key = mrb_value_to_value(mrb, key_v, depth + 1)?;
            let val = mrb_value_to_value(mrb, val_v, depth + 1)?;
            pairs.push((key, val));
        }
        return Ok(Value::Hash(pairs));
    }
    if ffi::is_true(v) {
        return Ok(Value::True);
    }
    if ffi::is_false(v) {
        return Ok(Value::False);
    }
    let class_name_ptr = ffi::mrb_sandbox_class_name(mrb, v);
    let class_name = std::ffi::CStr::from_ptr(class_name_ptr).to_string_lossy().into_owned();
    Err(format!("unsupported type for sandbox: {class_name}"))
}

/// Converts a bridge [`Value`] into a guest value. Mirrors `sandbox_value_to_mrb`.
unsafe fn value_to_mrb_value(mrb: *mut MrbState, v: &Value) -> MrbValue {
    match v {
        Value::Nil => ffi::mrb_sandbox_nil_value(),
        Value::True => ffi::mrb_sandbox_true_value(),
        Value::False => ffi::mrb_sandbox_false_value(),
        Value::Integer(i) => ffi::mrb_sandbox_fixnum_value(*i),
        Value::Float(f) => ffi::mrb_sandbox_float_value(mrb, *f),
        Value::String(s) => ffi::mrb_sandbox_str_new(mrb, s.as_ptr(), s.len()),
        Value::Array(items) => {
            let ary = ffi::mrb_sandbox_ary_new_capa(mrb, items.len() as i64);
            for item in items {
                let mv = value_to_mrb_value(mrb, item);
                ffi::mrb_sandbox_ary_push(mrb, ary, mv);
            }
            ary
        }
        Value::Hash(pairs) => {
            let hash = ffi::mrb_sandbox_hash_new(mrb);
            for (k, val) in pairs {
                let key_v = value_to_mrb_value(mrb, k);
                let val_v = value_to_mrb_value(mrb, val);
                ffi::mrb_sandbox_hash_set(mrb, hash, key_v, val_v);
            }
            hash
        }
    }
}

fn session_state_from_ud<'a>(mrb: *mut MrbState) -> &'a SessionState {
    unsafe {
        let ptr = ffi::mrb_sandbox_get_ud(mrb) as *const SessionState;
        &*ptr
    }
}

unsafe fn raise_runtime_error(mrb: *mut MrbState, message: &str) -> ! {
    let class_name = CString::new("RuntimeError").unwrap();
    let class = ffi::mrb_class_get(mrb, class_name.as_ptr());
    let msg = CString::new(message).unwrap_or_else(|_| CString::new("invalid error message").unwrap());
    ffi::mrb_raise(mrb, class, msg.as_ptr())
}

unsafe fn collect_varargs(mrb: *mut MrbState) -> Vec<MrbValue> {
    let mut argv: *const MrbValue = std::ptr::null();
    let mut argc: i64 = 0;
    ffi::mrb_get_args_all(mrb, &mut argv, &mut argc);
    if argc == 0 || argv.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(argv, argc as usize).to_vec()
}

extern "C" fn trampoline_print(mrb: *mut MrbState, _self: MrbValue) -> MrbValue {
    unsafe {
        let args = collect_varargs(mrb);
        let state = session_state_from_ud(mrb);
        let strings: Vec<String> = args
            .iter()
            .filter_map(|a| {
                let s = ffi::mrb_sandbox_obj_as_string(mrb, *a);
                mrb_string_to_rust(mrb, s)
            })
            .collect();
        state.output.borrow_mut().print(&strings);
        ffi::mrb_sandbox_nil_value()
    }
}

extern "C" fn trampoline_puts(mrb: *mut MrbState, _self: MrbValue) -> MrbValue {
    unsafe {
        let args = collect_varargs(mrb);
        let state = session_state_from_ud(mrb);
        let puts_args: Vec<PutsArg> = args.iter().map(|a| to_puts_arg(mrb, *a)).collect();
        state.output.borrow_mut().puts(&puts_args);
        ffi::mrb_sandbox_nil_value()
    }
}

unsafe fn to_puts_arg(mrb: *mut MrbState, v: MrbValue) -> PutsArg {
    if ffi::mrb_sandbox_array_p(v) != 0 {
        let len = ffi::mrb_sandbox_ary_len(v);
        let items = (0..len)
            .map(|i| to_puts_arg(mrb, ffi::mrb_sandbox_ary_ref(v, i)))
            .collect();
        PutsArg::Array(items)
    } else {
        let s = ffi::mrb_sandbox_obj_as_string(mrb, v);
        PutsArg::Scalar(mrb_string_to_rust(mrb, s).unwrap_or_default())
    }
}

extern "C" fn trampoline_p(mrb: *mut MrbState, _self: MrbValue) -> MrbValue {
    unsafe {
        let args = collect_varargs(mrb);
        let state = session_state_from_ud(mrb);
        let inspects: Vec<String> = args
            .iter()
            .map(|a| {
                let s = ffi::mrb_sandbox_inspect(mrb, *a);
                mrb_string_to_rust(mrb, s).unwrap_or_default()
            })
            .collect();
        state.output.borrow_mut().p(&inspects);
        match args.len() {
            0 => ffi::mrb_sandbox_nil_value(),
            1 => args[0],
            _ => ffi::mrb_sandbox_ary_new_from_values(mrb, args.len() as i64, args.as_ptr()),
        }
    }
}

/// The single guest-side method body bound to every registered tool name.
/// Looks the called method's symbol up via `mrb->c->ci->mid`, converts
/// arguments, and dispatches through `tools::dispatch`. Mirrors
/// `sandbox_function_trampoline`.
extern "C" fn trampoline_tool(mrb: *mut MrbState, _self: MrbValue) -> MrbValue {
    unsafe {
        let state = session_state_from_ud(mrb);
        let mid = ffi::mrb_sandbox_ci_mid(mrb);
        let name_ptr = ffi::mrb_sym_name(mrb, mid);
        let name = std::ffi::CStr::from_ptr(name_ptr).to_string_lossy().into_owned();

        let raw_args = collect_varargs(mrb);
        let mut args = Vec::with_capacity(raw_args.len());
        for a in &raw_args {
            match mrb_value_to_value(mrb, *a, 0) {
                Ok(v) => args.push(v),
                Err(message) => raise_type_error(mrb, &message),
            }
        }

        state.in_callback.set(true);
        let mut callback_slot = state.callback.borrow_mut();
        let dispatch_result = tools::dispatch(callback_slot.as_mut(), &name, &args);
        drop(callback_slot);
        state.in_callback.set(false);

        match dispatch_result {
            Ok(value) => value_to_mrb_value(mrb, &value),
            Err(TrampolineError::NoCallback) => raise_runtime_error(mrb, "no tool callback registered"),
            Err(TrampolineError::Callback(message)) => raise_runtime_error(mrb, &message),
            Err(TrampolineError::Panicked(message)) => {
                raise_runtime_error(mrb, &format!("tool callback panicked: {message}"))
            }
        }
    }
}

unsafe fn raise_type_error(mrb: *mut MrbState, message: &str) -> ! {
    let class_name = CString::new("TypeError").unwrap();
    let class = ffi::mrb_class_get(mrb, class_name.as_ptr());
    let msg = CString::new(message).unwrap_or_else(|_| CString::new("invalid error message").unwrap());
    ffi::mrb_raise(mrb, class, msg.as_ptr())
}

/// The bytecode-fetch hook, installed only while a deadline is armed.
/// Mirrors `sandbox_code_fetch_hook`.
extern "C" fn code_fetch_hook(
    mrb: *mut MrbState,
    _irep: *const c_void,
    _pc: *const c_void,
    _regs: *mut MrbValue,
) {
    unsafe {
        let state = session_state_from_ud(mrb);
        if state.deadline.borrow_mut().on_fetch() {
            raise_runtime_error(mrb, "execution timeout exceeded");
        }
    }
}
