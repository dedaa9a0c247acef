//! C ABI for the mach-dxc compiler driver. See `include/mach_dxc.h`.
//!
//! Every handle is an owned Rust value behind a raw pointer and is released by its own
//! `Deinit` function. Passing a released handle to any function is undefined behavior;
//! null handles are ignored.

#![allow(non_snake_case)]

mod resolver;

pub use resolver::{
    MachDxcFreeIncludeFunc, MachDxcIncludeCallbacks, MachDxcIncludeFunc, MachDxcIncludeResult,
};

use mach_dxc::{CompileResult, Compiler, Diagnostics, Object};
use resolver::CallbackIncludeHandler;
use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::null_mut;

pub struct MachDxcCompilerImpl {
    compiler: Compiler,
}

pub struct MachDxcCompileResultImpl {
    result: CompileResult,
}

pub struct MachDxcCompileObjectImpl {
    object: Object,
}

pub struct MachDxcCompileErrorImpl {
    /// Diagnostic text followed by a NUL.
    text: Box<[u8]>,
}

impl MachDxcCompileErrorImpl {
    fn new(diagnostics: &Diagnostics) -> Self {
        let mut text = Vec::with_capacity(diagnostics.as_str().len() + 1);
        text.extend_from_slice(diagnostics.as_str().as_bytes());
        text.push(0);
        Self {
            text: text.into_boxed_slice(),
        }
    }

    fn len(&self) -> usize {
        self.text.len() - 1
    }
}

pub type MachDxcCompiler = *mut MachDxcCompilerImpl;
pub type MachDxcCompileResult = *mut MachDxcCompileResultImpl;
pub type MachDxcCompileObject = *mut MachDxcCompileObjectImpl;
pub type MachDxcCompileError = *mut MachDxcCompileErrorImpl;

fn into_handle<T>(value: T) -> *mut T {
    Box::into_raw(Box::new(value))
}

/// # Safety
/// `handle` is null or came from [`into_handle`] and has not been released.
unsafe fn release<T>(handle: *mut T) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Creates a compiler, or returns null if initialization failed.
#[no_mangle]
pub extern "C" fn machCompilerInit() -> MachDxcCompiler {
    match Compiler::new() {
        Ok(compiler) => into_handle(MachDxcCompilerImpl { compiler }),
        Err(e) => {
            log::warn!("[mach-dxc-capi] {}", e);
            null_mut()
        }
    }
}

/// # Safety
/// `compiler` is null or a live handle from [`machCompilerInit`].
#[no_mangle]
pub unsafe extern "C" fn machCompilerDeinit(compiler: MachDxcCompiler) {
    release(compiler)
}

/// Collects the argument vector, replacing invalid UTF-8.
///
/// # Safety
/// `args` points at `args_len` NUL-terminated strings, or `args_len` is zero.
unsafe fn arguments(args: *const *const c_char, args_len: usize) -> Vec<String> {
    if args.is_null() || args_len == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(args, args_len)
        .iter()
        .filter(|arg| !arg.is_null())
        .map(|&arg| CStr::from_ptr(arg).to_string_lossy().into_owned())
        .collect()
}

/// Compiles `code` with dxc-style `args`.
///
/// `include_callbacks` may be null, in which case includes are read from disk. So are they
/// when the record lacks either function. Returns null
/// only when `compiler` is null or the compiler itself failed.
///
/// # Safety
/// `compiler` is a live handle. `code` points at `code_len` readable bytes. `args` points at
/// `args_len` NUL-terminated strings. `include_callbacks` is null or points at callbacks that
/// stay valid until this call returns.
#[no_mangle]
pub unsafe extern "C" fn machCompile(
    compiler: MachDxcCompiler,
    code: *const c_char,
    code_len: usize,
    args: *const *const c_char,
    args_len: usize,
    include_callbacks: *const MachDxcIncludeCallbacks,
) -> MachDxcCompileResult {
    let Some(compiler) = compiler.as_mut() else {
        return null_mut();
    };
    let code = if code.is_null() || code_len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(code.cast::<u8>(), code_len)
    };
    let args = arguments(args, args_len);
    let mut includes = include_callbacks
        .as_ref()
        .and_then(|callbacks| CallbackIncludeHandler::new(*callbacks));

    let compiled = catch_unwind(AssertUnwindSafe(|| {
        compiler.compiler.compile(
            code,
            args.as_slice(),
            includes
                .as_mut()
                .map(|handler| handler as &mut dyn mach_dxc::IncludeHandler),
        )
    }));
    match compiled {
        Ok(result) => into_handle(MachDxcCompileResultImpl { result }),
        Err(_) => {
            log::error!("[mach-dxc-capi] compiler panicked");
            null_mut()
        }
    }
}

/// Hands out the diagnostics, or null if there were none. Warnings count: a successful
/// compile with warnings returns both an error and an object.
///
/// The caller owns the returned handle; a second call returns null.
///
/// # Safety
/// `result` is null or a live handle from [`machCompile`].
#[no_mangle]
pub unsafe extern "C" fn machCompileResultGetError(
    result: MachDxcCompileResult,
) -> MachDxcCompileError {
    match result.as_mut().and_then(|r| r.result.take_error()) {
        Some(diagnostics) => into_handle(MachDxcCompileErrorImpl::new(&diagnostics)),
        None => null_mut(),
    }
}

/// Hands out the compiled object, or null if compilation failed.
///
/// The caller owns the returned handle; a second call returns null.
///
/// # Safety
/// `result` is null or a live handle from [`machCompile`].
#[no_mangle]
pub unsafe extern "C" fn machCompileResultGetObject(
    result: MachDxcCompileResult,
) -> MachDxcCompileObject {
    match result.as_mut().and_then(|r| r.result.take_object()) {
        Some(object) => into_handle(MachDxcCompileObjectImpl { object }),
        None => null_mut(),
    }
}

/// Whether any diagnostic is an error, ignoring warnings and notes.
///
/// # Safety
/// `result` is null or a live handle from [`machCompile`].
#[no_mangle]
pub unsafe extern "C" fn machCompileResultHasErrors(result: MachDxcCompileResult) -> bool {
    result.as_ref().is_some_and(|r| r.result.has_errors())
}

/// Releases the result together with any error or object not yet handed out.
///
/// # Safety
/// `result` is null or a live handle from [`machCompile`].
#[no_mangle]
pub unsafe extern "C" fn machCompileResultDeinit(result: MachDxcCompileResult) {
    release(result)
}

/// # Safety
/// `object` is a live handle.
#[no_mangle]
pub unsafe extern "C" fn machCompileObjectGetBytes(object: MachDxcCompileObject) -> *const c_char {
    object
        .as_ref()
        .map_or(std::ptr::null(), |o| o.object.as_ptr().cast())
}

/// # Safety
/// `object` is a live handle.
#[no_mangle]
pub unsafe extern "C" fn machCompileObjectGetBytesLength(object: MachDxcCompileObject) -> usize {
    object.as_ref().map_or(0, |o| o.object.len())
}

/// # Safety
/// `object` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn machCompileObjectDeinit(object: MachDxcCompileObject) {
    release(object)
}

/// NUL-terminated UTF-8 diagnostic text, one message per line.
///
/// # Safety
/// `error` is a live handle.
#[no_mangle]
pub unsafe extern "C" fn machCompileErrorGetString(error: MachDxcCompileError) -> *const c_char {
    error
        .as_ref()
        .map_or(std::ptr::null(), |e| e.text.as_ptr().cast())
}

/// Length of the diagnostic text, not counting the NUL.
///
/// # Safety
/// `error` is a live handle.
#[no_mangle]
pub unsafe extern "C" fn machCompileErrorGetStringLength(error: MachDxcCompileError) -> usize {
    error.as_ref().map_or(0, MachDxcCompileErrorImpl::len)
}

/// # Safety
/// `error` is null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn machCompileErrorDeinit(error: MachDxcCompileError) {
    release(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_void, CString};

    /// Host-side include state counting every callback.
    struct Host {
        headers: Vec<(&'static str, &'static str)>,
        resolves: u32,
        releases: u32,
        requested: Vec<String>,
    }

    impl Host {
        fn new(headers: &[(&'static str, &'static str)]) -> Self {
            Host {
                headers: headers.to_vec(),
                resolves: 0,
                releases: 0,
                requested: Vec::new(),
            }
        }

        fn callbacks(&mut self) -> MachDxcIncludeCallbacks {
            MachDxcIncludeCallbacks {
                include_func: Some(host_include),
                free_include_func: Some(host_free),
                include_ctx: (self as *mut Host).cast(),
            }
        }
    }

    unsafe extern "C" fn host_include(
        ctx: *mut c_void,
        header: *const c_char,
    ) -> *mut MachDxcIncludeResult {
        let host = &mut *ctx.cast::<Host>();
        let header = CStr::from_ptr(header).to_str().expect("utf-8 path");
        host.requested.push(header.to_owned());
        match host.headers.iter().find(|(name, _)| *name == header) {
            Some((_, contents)) => {
                host.resolves += 1;
                Box::into_raw(Box::new(MachDxcIncludeResult {
                    header_data: contents.as_ptr().cast(),
                    header_length: contents.len(),
                }))
            }
            None => null_mut(),
        }
    }

    unsafe extern "C" fn host_free(ctx: *mut c_void, result: *mut MachDxcIncludeResult) {
        let host = &mut *ctx.cast::<Host>();
        host.releases += 1;
        drop(Box::from_raw(result));
    }

    struct Outcome {
        error: Option<String>,
        object: Option<Vec<u8>>,
        has_errors: bool,
    }

    fn compile(source: &str, args: &[&str], callbacks: Option<&MachDxcIncludeCallbacks>) -> Outcome {
        let args: Vec<CString> = args.iter().map(|a| CString::new(*a).unwrap()).collect();
        let arg_ptrs: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();
        unsafe {
            let compiler = machCompilerInit();
            assert!(!compiler.is_null());
            let result = machCompile(
                compiler,
                source.as_ptr().cast(),
                source.len(),
                arg_ptrs.as_ptr(),
                arg_ptrs.len(),
                callbacks.map_or(std::ptr::null(), |c| c as *const _),
            );
            assert!(!result.is_null());

            let has_errors = machCompileResultHasErrors(result);
            let error = machCompileResultGetError(result);
            let error_text = (!error.is_null()).then(|| {
                let len = machCompileErrorGetStringLength(error);
                let ptr = machCompileErrorGetString(error);
                assert_eq!(*ptr.add(len), 0, "error text is NUL-terminated");
                let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len);
                String::from_utf8(bytes.to_vec()).unwrap()
            });
            let object = machCompileResultGetObject(result);
            let object_bytes = (!object.is_null()).then(|| {
                std::slice::from_raw_parts(
                    machCompileObjectGetBytes(object).cast::<u8>(),
                    machCompileObjectGetBytesLength(object),
                )
                .to_vec()
            });

            machCompileErrorDeinit(error);
            machCompileObjectDeinit(object);
            machCompileResultDeinit(result);
            machCompilerDeinit(compiler);

            Outcome {
                error: error_text,
                object: object_bytes,
                has_errors,
            }
        }
    }

    const ARGS: [&str; 4] = ["-E", "main", "-T", "ps_6_0"];

    #[test]
    fn clear_pixel_shader_compiles() {
        let outcome = compile("float4 main() : SV_TARGET { return float4(0,0,0,0); }", &ARGS, None);
        assert_eq!(outcome.error, None);
        let object = outcome.object.expect("object");
        assert_eq!(&object[..4], b"DXBC");
    }

    #[test]
    fn undeclared_identifier_is_reported() {
        let outcome = compile(
            "float4 main() : SV_TARGET { return undeclared_identifier; }",
            &ARGS,
            None,
        );
        assert!(outcome.object.is_none());
        assert!(outcome.has_errors);
        assert!(outcome.error.expect("error").contains("undeclared_identifier"));
    }

    #[test]
    fn missing_include_is_reported() {
        let mut host = Host::new(&[]);
        let callbacks = host.callbacks();
        let outcome = compile(
            "#include \"missing.h\"\nfloat4 main() : SV_TARGET { return 0; }",
            &ARGS,
            Some(&callbacks),
        );
        assert!(outcome.object.is_none());
        assert!(outcome.error.expect("error").contains("missing.h"));
        assert_eq!(host.requested, ["missing.h"]);
        assert_eq!((host.resolves, host.releases), (0, 0));
    }

    #[test]
    fn half_filled_callbacks_are_not_used() {
        let mut host = Host::new(&[("color.h", "static const float4 color = 1;\n")]);
        let source = "#include \"color.h\"\nfloat4 main() : SV_TARGET { return color; }";

        let mut without_free = host.callbacks();
        without_free.free_include_func = None;
        let outcome = compile(source, &ARGS, Some(&without_free));
        assert!(outcome.object.is_none());
        assert!(outcome.error.expect("error").contains("'color.h' file not found"));

        let mut without_include = host.callbacks();
        without_include.include_func = None;
        let outcome = compile(source, &ARGS, Some(&without_include));
        assert!(outcome.error.expect("error").contains("'color.h' file not found"));

        assert!(host.requested.is_empty());
        assert_eq!((host.resolves, host.releases), (0, 0));
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let depth = 4000;
        let source = format!(
            "float4 main() : SV_TARGET {{ return {}1{}; }}",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let outcome = compile(&source, &ARGS, None);
        assert!(outcome.object.is_none());
        assert!(outcome.has_errors);
        assert!(outcome
            .error
            .expect("error")
            .contains("bracket nesting level exceeded maximum of 256"));
    }

    #[test]
    fn every_resolved_include_is_released() {
        let guarded = "#ifndef GUARD\n#define GUARD\nstatic const float4 color = float4(1, 0, 0, 1);\n#endif\n";
        let mut host = Host::new(&[("color.h", guarded)]);
        let callbacks = host.callbacks();
        let outcome = compile(
            "#include \"color.h\"\n#include \"color.h\"\nfloat4 main() : SV_TARGET { return color; }",
            &ARGS,
            Some(&callbacks),
        );
        assert!(outcome.object.is_some(), "{:?}", outcome.error);
        assert_eq!(host.resolves, 2);
        assert_eq!(host.releases, 2);
    }

    #[test]
    fn included_syntax_errors_are_reported() {
        let mut host = Host::new(&[("foo.h", "float x = ;\n")]);
        let callbacks = host.callbacks();
        let outcome = compile("#include \"foo.h\"\n", &ARGS, Some(&callbacks));
        assert!(outcome.error.expect("error").starts_with("foo.h:1:"));
        assert_eq!(host.releases, 1);
    }

    #[test]
    fn warnings_come_with_an_object() {
        let outcome = compile(
            "float4 main() : SV_TARGET { float4 v = 1; float2 t = v; return t.xyxy; }",
            &ARGS,
            None,
        );
        assert!(outcome.object.is_some());
        assert!(!outcome.has_errors);
        assert!(outcome.error.expect("warning").contains("warning: implicit truncation"));
    }

    #[test]
    fn empty_source_and_arguments() {
        let outcome = compile("", &[], None);
        assert!(outcome.object.is_none());
        assert!(outcome.has_errors);
    }

    #[test]
    fn extraction_transfers_ownership() {
        let source = "float4 main() : SV_TARGET { return 1; }";
        let args: Vec<CString> = ARGS.iter().map(|a| CString::new(*a).unwrap()).collect();
        let arg_ptrs: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();
        unsafe {
            let compiler = machCompilerInit();
            let result = machCompile(
                compiler,
                source.as_ptr().cast(),
                source.len(),
                arg_ptrs.as_ptr(),
                arg_ptrs.len(),
                std::ptr::null(),
            );
            let object = machCompileResultGetObject(result);
            assert!(!object.is_null());
            assert!(machCompileResultGetObject(result).is_null());

            // The object outlives its result.
            machCompileResultDeinit(result);
            assert!(machCompileObjectGetBytesLength(object) > 0);
            machCompileObjectDeinit(object);
            machCompilerDeinit(compiler);
        }
    }

    #[test]
    fn null_handles_are_ignored() {
        unsafe {
            assert!(machCompile(null_mut(), std::ptr::null(), 0, std::ptr::null(), 0, std::ptr::null()).is_null());
            assert!(machCompileResultGetError(null_mut()).is_null());
            assert!(machCompileResultGetObject(null_mut()).is_null());
            assert!(!machCompileResultHasErrors(null_mut()));
            machCompileResultDeinit(null_mut());
            machCompileObjectDeinit(null_mut());
            machCompileErrorDeinit(null_mut());
            machCompilerDeinit(null_mut());
        }
    }
}
