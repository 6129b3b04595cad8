//! FFI bindings for libgbm
//!
//! Stereo scanout surfaces come from `gbm_surface_create_with_mode`, which
//! only exists in stereo-capable GBM builds. libgbm is therefore opened with
//! `dlopen` at runtime and every call on those surfaces goes through the same
//! handle. Struct layouts follow `gbm.h`.

use crate::{Error, Result};
use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use tracing::debug;

/// `enum gbm_bo_format` value used by `gbm_bo_mode`
pub const GBM_BO_FORMAT_XRGB8888: u32 = 0;

/// GBM buffer usage flags
pub mod gbm_usage {
    pub const GBM_BO_USE_SCANOUT: u32 = 1 << 0;
    pub const GBM_BO_USE_CURSOR: u32 = 1 << 1;
    pub const GBM_BO_USE_RENDERING: u32 = 1 << 2;
}

/// `enum gbm_bo_stereo_layout` from stereo-capable GBM
pub mod gbm_layout {
    pub const GBM_BO_STEREO_LAYOUT_NONE: u32 = 0;
    pub const GBM_BO_STEREO_LAYOUT_FRAME_PACKING: u32 = 1;
    pub const GBM_BO_STEREO_LAYOUT_LINE_ALTERNATIVE: u32 = 2;
    pub const GBM_BO_STEREO_LAYOUT_SIDE_BY_SIDE_FULL: u32 = 3;
    pub const GBM_BO_STEREO_LAYOUT_TOP_AND_BOTTOM: u32 = 4;
    pub const GBM_BO_STEREO_LAYOUT_SIDE_BY_SIDE_HALF: u32 = 5;
}

/// Opaque GBM device
#[repr(C)]
pub struct GbmDeviceRaw {
    _data: [u8; 0],
}

/// Opaque GBM surface
#[repr(C)]
pub struct GbmSurfaceRaw {
    _data: [u8; 0],
}

/// Opaque GBM buffer object
#[repr(C)]
pub struct GbmBoRaw {
    _data: [u8; 0],
}

/// `union gbm_bo_handle`
#[repr(C)]
#[derive(Clone, Copy)]
pub union GbmBoHandle {
    pub ptr: *mut c_void,
    pub s32: i32,
    pub u32_: u32,
    pub s64: i64,
    pub u64_: u64,
}

/// Scanout timings and stereo layout for `gbm_surface_create_with_mode`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GbmBoMode {
    pub layout: u32,
    pub hdisplay: u32,
    pub hsync_start: u32,
    pub hsync_end: u32,
    pub htotal: u32,
    pub vdisplay: u32,
    pub vsync_start: u32,
    pub vsync_end: u32,
    pub vtotal: u32,
    pub format: u32,
}

/// A `dlopen`ed shared library
pub struct Library {
    handle: *mut c_void,
    name: &'static str,
}

impl Library {
    /// Open the first library in `names` that loads
    pub fn open(names: &[&'static str]) -> Result<Self> {
        for name in names {
            let Ok(c_name) = CString::new(*name) else {
                continue;
            };
            let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
            if !handle.is_null() {
                debug!("Loaded {}", name);
                return Ok(Self { handle, name });
            }
        }
        Err(Error::Library(names.join(" or ")))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Look up `symbol` as a function pointer of type `T`
    ///
    /// # Safety
    /// `T` must be a function pointer type matching the symbol's C signature.
    pub unsafe fn sym<T: Copy>(&self, symbol: &str) -> Option<T> {
        let c_symbol = CString::new(symbol).ok()?;
        let ptr = libc::dlsym(self.handle, c_symbol.as_ptr());
        if ptr.is_null() {
            None
        } else {
            Some(std::mem::transmute_copy(&ptr))
        }
    }

    /// Like [`Library::sym`] but a missing symbol is an error
    ///
    /// # Safety
    /// Same contract as [`Library::sym`].
    pub unsafe fn require<T: Copy>(&self, symbol: &'static str) -> Result<T> {
        self.sym(symbol).ok_or(Error::Symbol {
            library: self.name,
            symbol,
        })
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

/// libgbm entry points
pub struct GbmApi {
    pub create_device: unsafe extern "C" fn(c_int) -> *mut GbmDeviceRaw,
    pub device_destroy: unsafe extern "C" fn(*mut GbmDeviceRaw),
    pub surface_create_with_mode:
        Option<unsafe extern "C" fn(*mut GbmDeviceRaw, *const GbmBoMode, u32) -> *mut GbmSurfaceRaw>,
    pub surface_destroy: unsafe extern "C" fn(*mut GbmSurfaceRaw),
    pub surface_lock_front_buffer: unsafe extern "C" fn(*mut GbmSurfaceRaw) -> *mut GbmBoRaw,
    pub surface_release_buffer: unsafe extern "C" fn(*mut GbmSurfaceRaw, *mut GbmBoRaw),
    pub bo_get_width: unsafe extern "C" fn(*mut GbmBoRaw) -> u32,
    pub bo_get_height: unsafe extern "C" fn(*mut GbmBoRaw) -> u32,
    pub bo_get_stride: unsafe extern "C" fn(*mut GbmBoRaw) -> u32,
    pub bo_get_handle: unsafe extern "C" fn(*mut GbmBoRaw) -> GbmBoHandle,
    _lib: Library,
}

impl GbmApi {
    pub fn load() -> Result<Self> {
        let lib = Library::open(&["libgbm.so.1", "libgbm.so"])?;
        unsafe {
            Ok(Self {
                create_device: lib.require("gbm_create_device")?,
                device_destroy: lib.require("gbm_device_destroy")?,
                surface_create_with_mode: lib.sym("gbm_surface_create_with_mode"),
                surface_destroy: lib.require("gbm_surface_destroy")?,
                surface_lock_front_buffer: lib.require("gbm_surface_lock_front_buffer")?,
                surface_release_buffer: lib.require("gbm_surface_release_buffer")?,
                bo_get_width: lib.require("gbm_bo_get_width")?,
                bo_get_height: lib.require("gbm_bo_get_height")?,
                bo_get_stride: lib.require("gbm_bo_get_stride")?,
                bo_get_handle: lib.require("gbm_bo_get_handle")?,
                _lib: lib,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bo_mode_layout_matches_gbm() {
        assert_eq!(std::mem::size_of::<GbmBoMode>(), 40);
    }

    #[test]
    fn test_bo_handle_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<GbmBoHandle>(), 8);
    }

    #[test]
    fn test_open_missing_library() {
        let err = Library::open(&["libdefinitely-not-here.so.9"]).err();
        assert!(matches!(err, Some(Error::Library(_))));
    }

    #[test]
    fn test_sym_lookup_in_libc() {
        let lib = Library::open(&["libc.so.6"]).unwrap();
        let getpid: Option<unsafe extern "C" fn() -> c_int> = unsafe { lib.sym("getpid") };
        assert!(getpid.is_some());
        let missing: Option<unsafe extern "C" fn()> = unsafe { lib.sym("no_such_function_here") };
        assert!(missing.is_none());
    }
}
