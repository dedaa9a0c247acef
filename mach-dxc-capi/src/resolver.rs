//! Adapter from the C include callbacks to [`IncludeHandler`].

use mach_dxc::{IncludeHandler, IncludeRequest, IncludeSource};
use std::ffi::{c_char, c_void, CString};

/// Contents handed back by the host for one `#include`.
#[repr(C)]
#[derive(Debug)]
pub struct MachDxcIncludeResult {
    pub header_data: *const c_char,
    pub header_length: usize,
}

/// Resolves `header_utf8`, or returns null if the header does not exist.
pub type MachDxcIncludeFunc =
    unsafe extern "C" fn(ctx: *mut c_void, header_utf8: *const c_char) -> *mut MachDxcIncludeResult;

/// Releases a result returned by the include function.
pub type MachDxcFreeIncludeFunc =
    unsafe extern "C" fn(ctx: *mut c_void, result: *mut MachDxcIncludeResult);

/// Include resolver supplied by the host. Both functions are required.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct MachDxcIncludeCallbacks {
    pub include_func: Option<MachDxcIncludeFunc>,
    pub free_include_func: Option<MachDxcFreeIncludeFunc>,
    pub include_ctx: *mut c_void,
}

/// Calls the host's release function when dropped.
struct Release<'a> {
    handler: &'a CallbackIncludeHandler,
    result: *mut MachDxcIncludeResult,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        // SAFETY: `result` came from `include` with the same context and is released exactly
        // once, here.
        unsafe { (self.handler.free)(self.handler.ctx, self.result) }
    }
}

pub(crate) struct CallbackIncludeHandler {
    include: MachDxcIncludeFunc,
    free: MachDxcFreeIncludeFunc,
    ctx: *mut c_void,
}

impl CallbackIncludeHandler {
    /// Wraps a complete set of callbacks. A record missing either function is not used.
    ///
    /// # Safety
    /// The callbacks must stay valid for as long as the handler is used.
    pub(crate) unsafe fn new(callbacks: MachDxcIncludeCallbacks) -> Option<Self> {
        match (callbacks.include_func, callbacks.free_include_func) {
            (Some(include), Some(free)) => Some(Self {
                include,
                free,
                ctx: callbacks.include_ctx,
            }),
            (include, _) => {
                log::warn!(
                    "[mach-dxc-capi] ignoring include callbacks without {}; reading includes from disk",
                    if include.is_none() { "include_func" } else { "free_include_func" }
                );
                None
            }
        }
    }
}

impl IncludeHandler for CallbackIncludeHandler {
    fn resolve(&mut self, request: &IncludeRequest<'_>) -> Option<IncludeSource> {
        let Ok(path) = CString::new(request.path) else {
            log::debug!("[mach-dxc-capi] include path '{}' contains a NUL", request.path);
            return None;
        };

        // SAFETY: the host guarantees the callbacks are valid for the compile, and `path` is
        // NUL-terminated and outlives the call.
        let result = unsafe { (self.include)(self.ctx, path.as_ptr()) };
        if result.is_null() {
            log::debug!("[mach-dxc-capi] host did not resolve '{}'", request.path);
            return None;
        }
        let _release = Release {
            handler: self,
            result,
        };

        // SAFETY: a non-null result points at `header_length` readable bytes until it is
        // released.
        let contents = unsafe {
            let result = &*result;
            if result.header_data.is_null() || result.header_length == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(result.header_data.cast::<u8>(), result.header_length)
                    .to_vec()
            }
        };
        log::debug!(
            "[mach-dxc-capi] host resolved '{}' ({} bytes)",
            request.path,
            contents.len()
        );
        Some(IncludeSource::new(request.path, contents))
    }
}
