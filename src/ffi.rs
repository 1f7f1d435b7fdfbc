//! Raw bindings to the embedded guest VM's C ABI.
//!
//! This is the only module in the crate that touches raw pointers or calls
//! into the guest's C functions. Everything above it (`session.rs`) only
//! ever sees safe wrapper types. The guest build links as a vendored static
//! library named `mruby` with a public API at major version 3.x; `build.rs`
//! locates it via `pkg-config` with an environment-variable fallback.
//!
//! The function set and call sequencing mirror the guest's own compiler
//! driver (parse → generate code → run) and its `mrb_state`-scoped
//! allocator/hook override points.

use libc::{c_char, c_int, c_void};

/// Opaque guest interpreter state. Never constructed or read from Rust;
/// only ever passed back to the functions below.
#[repr(C)]
pub struct MrbState {
    _private: [u8; 0],
}

/// Opaque compile context (holds `capture_errors`, `lineno`, filename, and
/// the REPL-style persisted parser state across repeated `eval` calls).
#[repr(C)]
pub struct MrbcContext {
    _private: [u8; 0],
}

/// Opaque parser state returned by `mrb_parser_new`.
#[repr(C)]
pub struct MrbParserState {
    _private: [u8; 0],
}

/// Opaque compiled procedure (a generated code object ready for `mrb_vm_run`).
#[repr(C)]
pub struct RProc {
    _private: [u8; 0],
}

/// Opaque class/module object, as returned by `mrb_class_get` or read from
/// `mrb->kernel_module`.
#[repr(C)]
pub struct RClass {
    _private: [u8; 0],
}

/// The guest's tagged value representation. Treated as an opaque byte blob
/// on the Rust side — every field access goes through an accessor function
/// below rather than through Rust-side struct layout, since the guest ABI
/// reserves the right to change this layout across minor versions.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MrbValue {
    _opaque: [u64; 2],
}

/// Interned symbol id.
pub type MrbSym = u32;
/// Guest-side integer width.
pub type MrbInt = i64;

/// The allocator override signature: classic realloc-family contract
/// (`size == 0` frees, `ptr == NULL` mallocs, otherwise reallocs), installed
/// once per `mrb_open_allocf` call and never swapped out for the life of the
/// VM. The crate's own implementation lives in `mem_tracker::shim_alloc` and
/// is handed to `mrb_open_allocf` as this function pointer.
pub type MrbAllocF =
    unsafe extern "C" fn(mrb: *mut MrbState, ptr: *mut c_void, size: usize, ud: *mut c_void) -> *mut c_void;

/// The bytecode-fetch hook signature, installed per-eval on `mrb_state.code_fetch_hook`
/// (armed only when a wall-clock deadline is configured) and cleared again in
/// the eval epilogue regardless of outcome.
pub type MrbCodeFetchHook =
    unsafe extern "C" fn(mrb: *mut MrbState, irep: *const c_void, pc: *const c_void, regs: *mut MrbValue);

/// A guest-callable method implementation, used both for the tool trampoline
/// and for the `print`/`puts`/`p` overrides.
pub type MrbFunc = unsafe extern "C" fn(mrb: *mut MrbState, self_: MrbValue) -> MrbValue;

#[allow(non_snake_case)]
extern "C" {
    // -- VM lifecycle --------------------------------------------------
    pub fn mrb_open_allocf(f: MrbAllocF, ud: *mut c_void) -> *mut MrbState;
    pub fn mrb_close(mrb: *mut MrbState);

    // -- user-data slot used by the code-fetch hook to recover the
    //    owning Session --------------------------------------------------
    pub fn mrb_sandbox_set_ud(mrb: *mut MrbState, ud: *mut c_void);
    pub fn mrb_sandbox_get_ud(mrb: *mut MrbState) -> *mut c_void;
    pub fn mrb_sandbox_set_code_fetch_hook(mrb: *mut MrbState, hook: Option<MrbCodeFetchHook>);
    pub fn mrb_sandbox_has_exc(mrb: *mut MrbState) -> c_int;
    pub fn mrb_sandbox_exc_value(mrb: *mut MrbState) -> MrbValue;
    pub fn mrb_sandbox_clear_exc(mrb: *mut MrbState);
    pub fn mrb_sandbox_kernel_module(mrb: *mut MrbState) -> *mut RClass;
    pub fn mrb_sandbox_ci_mid(mrb: *mut MrbState) -> MrbSym;
    pub fn mrb_sandbox_store_underscore(mrb: *mut MrbState, v: MrbValue) -> c_int;
    pub fn mrb_sandbox_widen_env_if_needed(mrb: *mut MrbState, proc: *mut RProc);

    // -- compile context -------------------------------------------------
    pub fn mrb_ccontext_new(mrb: *mut MrbState) -> *mut MrbcContext;
    pub fn mrb_ccontext_free(mrb: *mut MrbState, cxt: *mut MrbcContext);
    pub fn mrb_ccontext_filename(mrb: *mut MrbState, cxt: *mut MrbcContext, filename: *const c_char) -> *const c_char;
    pub fn mrb_sandbox_set_capture_errors(cxt: *mut MrbcContext, capture: c_int);
    pub fn mrb_sandbox_lineno(cxt: *const MrbcContext) -> c_int;
    pub fn mrb_sandbox_set_lineno(cxt: *mut MrbcContext, lineno: c_int);

    // -- parse / codegen / run -------------------------------------------
    pub fn mrb_parser_new(mrb: *mut MrbState) -> *mut MrbParserState;
    pub fn mrb_parser_free(p: *mut MrbParserState);
    pub fn mrb_sandbox_parser_set_source(p: *mut MrbParserState, code: *const c_char, len: usize, lineno: c_int);
    pub fn mrb_parser_parse(p: *mut MrbParserState, cxt: *mut MrbcContext);
    pub fn mrb_sandbox_parser_nerr(p: *const MrbParserState) -> c_int;
    pub fn mrb_sandbox_parser_error_message(p: *const MrbParserState, index: usize) -> *const c_char;
    pub fn mrb_sandbox_parser_error_lineno(p: *const MrbParserState, index: usize) -> c_int;
    pub fn mrb_generate_code(mrb: *mut MrbState, p: *mut MrbParserState) -> *mut RProc;
    pub fn mrb_sandbox_proc_nlocals(proc: *const RProc) -> MrbInt;
    pub fn mrb_vm_run(mrb: *mut MrbState, proc: *mut RProc, self_: MrbValue, stack_keep: MrbInt) -> MrbValue;
    pub fn mrb_top_self(mrb: *mut MrbState) -> MrbValue;

    // -- GC arena ----------------------------------------------------------
    pub fn mrb_gc_arena_save(mrb: *mut MrbState) -> c_int;
    pub fn mrb_gc_arena_restore(mrb: *mut MrbState, idx: c_int);

    // -- method definition / calling --------------------------------------
    pub fn mrb_define_method(mrb: *mut MrbState, class: *mut RClass, name: *const c_char, func: MrbFunc, aspec: u32);
    /// The bit pattern for "accepts any number of arguments", computed from
    /// mruby's own `MRB_ARGS_ANY()` macro rather than guessed at on the Rust
    /// side.
    pub fn mrb_sandbox_args_any() -> u32;
    pub fn mrb_intern_cstr(mrb: *mut MrbState, s: *const c_char) -> MrbSym;
    pub fn mrb_sym_name(mrb: *mut MrbState, sym: MrbSym) -> *const c_char;
    pub fn mrb_funcall_argv(mrb: *mut MrbState, self_: MrbValue, method: MrbSym, argc: MrbInt, argv: *const MrbValue) -> MrbValue;
    pub fn mrb_get_args_all(mrb: *mut MrbState, argv: *mut *const MrbValue, argc: *mut MrbInt);
    pub fn mrb_raise(mrb: *mut MrbState, class: *mut RClass, msg: *const c_char) -> !;
    pub fn mrb_class_get(mrb: *mut MrbState, name: *const c_char) -> *mut RClass;

    // -- value constructors / accessors -----------------------------------
    pub fn mrb_sandbox_nil_value() -> MrbValue;
    pub fn mrb_sandbox_true_value() -> MrbValue;
    pub fn mrb_sandbox_false_value() -> MrbValue;
    pub fn mrb_sandbox_fixnum_value(i: MrbInt) -> MrbValue;
    pub fn mrb_sandbox_float_value(mrb: *mut MrbState, f: f64) -> MrbValue;
    pub fn mrb_sandbox_str_new(mrb: *mut MrbState, data: *const u8, len: usize) -> MrbValue;
    pub fn mrb_sandbox_ary_new_capa(mrb: *mut MrbState, capa: MrbInt) -> MrbValue;
    pub fn mrb_sandbox_ary_push(mrb: *mut MrbState, ary: MrbValue, v: MrbValue);
    pub fn mrb_sandbox_ary_new_from_values(mrb: *mut MrbState, argc: MrbInt, argv: *const MrbValue) -> MrbValue;
    pub fn mrb_sandbox_hash_new(mrb: *mut MrbState) -> MrbValue;
    pub fn mrb_sandbox_hash_set(mrb: *mut MrbState, hash: MrbValue, key: MrbValue, v: MrbValue);
    pub fn mrb_sandbox_hash_keys(mrb: *mut MrbState, hash: MrbValue) -> MrbValue;
    pub fn mrb_sandbox_hash_get(mrb: *mut MrbState, hash: MrbValue, key: MrbValue) -> MrbValue;

    pub fn mrb_sandbox_vtype(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_nil_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_true_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_false_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_fixnum_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_float_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_string_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_array_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_hash_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_symbol_p(v: MrbValue) -> c_int;
    pub fn mrb_sandbox_fixnum_to_int(v: MrbValue) -> MrbInt;
    pub fn mrb_sandbox_float_to_f64(v: MrbValue) -> f64;
    pub fn mrb_sandbox_str_ptr(v: MrbValue) -> *const u8;
    pub fn mrb_sandbox_str_len(v: MrbValue) -> usize;
    pub fn mrb_sandbox_sym_to_str(mrb: *mut MrbState, v: MrbValue) -> MrbValue;
    pub fn mrb_sandbox_ary_len(v: MrbValue) -> MrbInt;
    pub fn mrb_sandbox_ary_ref(v: MrbValue, i: MrbInt) -> MrbValue;
    pub fn mrb_sandbox_class_name(mrb: *mut MrbState, v: MrbValue) -> *const c_char;

    pub fn mrb_sandbox_obj_as_string(mrb: *mut MrbState, v: MrbValue) -> MrbValue;
    pub fn mrb_sandbox_inspect(mrb: *mut MrbState, v: MrbValue) -> MrbValue;
    pub fn mrb_sandbox_parse_underscore_init(mrb: *mut MrbState, cxt: *mut MrbcContext) -> MrbInt;
}

/// `true` once `v` reports itself as `nil`.
pub fn is_nil(v: MrbValue) -> bool {
    unsafe { mrb_sandbox_nil_p(v) != 0 }
}

/// `true` once `v` reports itself as `true`.
pub fn is_true(v: MrbValue) -> bool {
    unsafe { mrb_sandbox_true_p(v) != 0 }
}

/// `true` once `v` reports itself as `false`.
pub fn is_false(v: MrbValue) -> bool {
    unsafe { mrb_sandbox_false_p(v) != 0 }
}
