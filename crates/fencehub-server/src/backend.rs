use std::{
    ffi::{CString, c_char, c_void},
    path::Path,
};

use thiserror::Error;
use tracing::info;

/// Startup failures of the fence module. All of these are fatal: a
/// server without a working back-end must not accept requests.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("fence module path {0:?} is not a valid C string")]
    InvalidPath(std::path::PathBuf),
    #[error("failed to load fence module {path}: {reason}")]
    LoadFailed { path: String, reason: String },
    #[error("fence module {path} does not export symbol {symbol}")]
    MissingSymbol { path: String, symbol: &'static str },
    #[error("fence module initialization reported failure")]
    InitFailed,
}

/// The power-control capability behind the dispatcher.
///
/// Implementations must be callable from any worker thread; the server
/// runs one fencing call at a time per connection but many connections
/// in parallel. Returning `true` means the node was fenced.
pub trait FenceBackend: Send + Sync {
    fn power_off(&self, nodename: &[u8]) -> bool;
    fn power_on(&self, nodename: &[u8]) -> bool;
    fn reboot(&self, nodename: &[u8]) -> bool;
}

const SYMBOL_INIT: &str = "ufh_plugin_init";
const SYMBOL_DESTROY: &str = "ufh_plugin_destroy";
const SYMBOL_FENCE_OFF: &str = "ufh_fence_off";
const SYMBOL_FENCE_ON: &str = "ufh_fence_on";
const SYMBOL_FENCE_REBOOT: &str = "ufh_fence_reboot";

/// Return structure of the module's init call.
#[repr(C)]
struct PluginInitRc {
    success: bool,
    context: *mut c_void,
}

type InitFn = unsafe extern "C" fn() -> PluginInitRc;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type FenceFn = unsafe extern "C" fn(*mut c_void, *const c_char, usize) -> bool;

/// Fence back-end loaded from a shared object at startup.
///
/// Resolves the five ABI symbols eagerly; a missing symbol or a failed
/// init aborts server startup. The module contract requires the fence
/// entry points to be callable concurrently with a shared context.
#[derive(Debug)]
pub struct PluginBackend {
    handle: *mut c_void,
    context: *mut c_void,
    destroy: DestroyFn,
    fence_off: FenceFn,
    fence_on: FenceFn,
    fence_reboot: FenceFn,
}

// SAFETY: the plugin ABI requires the context and fence entry points to
// be thread-safe; the handle itself is only touched at load and drop.
unsafe impl Send for PluginBackend {}
unsafe impl Sync for PluginBackend {}

fn dlerror_string() -> String {
    // SAFETY: dlerror returns a thread-local NUL-terminated string or
    // null; we copy it out immediately.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            "unknown dynamic linker error".to_owned()
        } else {
            std::ffi::CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

impl PluginBackend {
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        let path_display = path.display().to_string();
        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| BackendError::InvalidPath(path.to_path_buf()))?;

        // SAFETY: dlopen with a valid NUL-terminated path.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(BackendError::LoadFailed {
                path: path_display,
                reason: dlerror_string(),
            });
        }

        let resolve = |symbol: &'static str| -> Result<*mut c_void, BackendError> {
            let c_symbol = CString::new(symbol).expect("symbol names contain no NUL");
            // SAFETY: handle is a live dlopen handle; symbol is
            // NUL-terminated.
            let sym = unsafe { libc::dlsym(handle, c_symbol.as_ptr()) };
            if sym.is_null() {
                Err(BackendError::MissingSymbol { path: path_display.clone(), symbol })
            } else {
                Ok(sym)
            }
        };

        let load = || -> Result<Self, BackendError> {
            // SAFETY: the symbols were resolved from the module and the
            // ABI fixes their signatures.
            let init: InitFn = unsafe { std::mem::transmute(resolve(SYMBOL_INIT)?) };
            let destroy: DestroyFn = unsafe { std::mem::transmute(resolve(SYMBOL_DESTROY)?) };
            let fence_off: FenceFn = unsafe { std::mem::transmute(resolve(SYMBOL_FENCE_OFF)?) };
            let fence_on: FenceFn = unsafe { std::mem::transmute(resolve(SYMBOL_FENCE_ON)?) };
            let fence_reboot: FenceFn =
                unsafe { std::mem::transmute(resolve(SYMBOL_FENCE_REBOOT)?) };

            // SAFETY: init takes no arguments and returns by value per
            // the ABI.
            let rc = unsafe { init() };
            if !rc.success {
                return Err(BackendError::InitFailed);
            }
            info!(path = %path_display, "fence module initialized");

            Ok(Self {
                handle,
                context: rc.context,
                destroy,
                fence_off,
                fence_on,
                fence_reboot,
            })
        };

        load().inspect_err(|_| {
            // SAFETY: handle came from dlopen above and is unloaded on
            // the error path only.
            unsafe {
                libc::dlclose(handle);
            }
        })
    }

    fn call(&self, fence: FenceFn, nodename: &[u8]) -> bool {
        // SAFETY: nodename points at live bytes for the duration of the
        // call; the context pointer came from the module's own init.
        unsafe { fence(self.context, nodename.as_ptr().cast(), nodename.len()) }
    }
}

impl FenceBackend for PluginBackend {
    fn power_off(&self, nodename: &[u8]) -> bool {
        self.call(self.fence_off, nodename)
    }

    fn power_on(&self, nodename: &[u8]) -> bool {
        self.call(self.fence_on, nodename)
    }

    fn reboot(&self, nodename: &[u8]) -> bool {
        self.call(self.fence_reboot, nodename)
    }
}

impl Drop for PluginBackend {
    fn drop(&mut self) {
        // SAFETY: destroy and dlclose run exactly once, after all
        // workers have been joined.
        unsafe {
            (self.destroy)(self.context);
            libc::dlclose(self.handle);
        }
    }
}
