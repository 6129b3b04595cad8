//! GBM device and stereo scanout surfaces
//!
//! Surfaces are created from a DRM mode so the buffers carry the mode's
//! timings and stereo layout. This needs a GBM built with
//! `gbm_surface_create_with_mode`.

use crate::drm_device::{DrmDevice, Mode};
use crate::ffi::{gbm_usage, GbmApi, GbmBoRaw, GbmDeviceRaw, GbmSurfaceRaw};
use crate::{Error, Result};
use std::os::raw::c_void;
use std::os::unix::io::{AsFd, AsRawFd};
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::{debug, info};

struct DeviceInner {
    api: GbmApi,
    raw: NonNull<GbmDeviceRaw>,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        unsafe { (self.api.device_destroy)(self.raw.as_ptr()) };
        debug!("Destroyed GBM device");
    }
}

/// GBM device on top of an open DRM card
///
/// The DRM device must outlive this.
pub struct GbmDevice {
    inner: Rc<DeviceInner>,
}

impl GbmDevice {
    pub fn new(drm: &DrmDevice) -> Result<Self> {
        let api = GbmApi::load()?;
        let raw = unsafe { (api.create_device)(drm.as_fd().as_raw_fd()) };
        let raw = NonNull::new(raw).ok_or_else(|| Error::Gbm("failed to create gbm device".into()))?;

        info!("Created GBM device");

        Ok(Self {
            inner: Rc::new(DeviceInner { api, raw }),
        })
    }

    /// Native display handle for `eglGetDisplay`
    pub fn as_ptr(&self) -> *mut c_void {
        self.inner.raw.as_ptr() as *mut c_void
    }

    /// Whether this GBM can allocate surfaces with a stereo layout
    pub fn supports_stereo(&self) -> bool {
        self.inner.api.surface_create_with_mode.is_some()
    }

    /// Create a scanout surface for `mode`, laid out for two views
    pub fn create_stereo_surface(&self, mode: &Mode) -> Result<GbmSurface> {
        let create_with_mode = self.inner.api.surface_create_with_mode.ok_or_else(|| {
            Error::Unsupported("GBM has no gbm_surface_create_with_mode; stereo surfaces unavailable".into())
        })?;

        let bo_mode = mode.gbm_mode();
        let flags = gbm_usage::GBM_BO_USE_SCANOUT | gbm_usage::GBM_BO_USE_RENDERING;
        let raw = unsafe { create_with_mode(self.inner.raw.as_ptr(), &bo_mode, flags) };
        let raw = NonNull::new(raw).ok_or_else(|| Error::Gbm("failed to create gbm surface".into()))?;

        debug!(
            width = mode.width(),
            height = mode.height(),
            layout = bo_mode.layout,
            "Created GBM stereo surface"
        );

        Ok(GbmSurface {
            device: self.inner.clone(),
            raw,
        })
    }
}

/// GBM surface that EGL renders into and KMS scans out from
pub struct GbmSurface {
    device: Rc<DeviceInner>,
    raw: NonNull<GbmSurfaceRaw>,
}

/// Front buffer locked for scanout
///
/// Hand it back with [`GbmSurface::release_buffer`] once the display has
/// moved on to a newer buffer.
#[must_use]
#[derive(Debug)]
pub struct LockedBuffer {
    raw: NonNull<GbmBoRaw>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub handle: u32,
}

impl GbmSurface {
    /// Native window handle for `eglCreateWindowSurface`
    pub fn as_ptr(&self) -> *mut c_void {
        self.raw.as_ptr() as *mut c_void
    }

    /// Lock the buffer EGL just finished rendering
    pub fn lock_front_buffer(&self) -> Result<LockedBuffer> {
        let api = &self.device.api;
        let bo = unsafe { (api.surface_lock_front_buffer)(self.raw.as_ptr()) };
        let bo = NonNull::new(bo).ok_or_else(|| Error::Gbm("failed to lock front buffer".into()))?;

        unsafe {
            Ok(LockedBuffer {
                raw: bo,
                width: (api.bo_get_width)(bo.as_ptr()),
                height: (api.bo_get_height)(bo.as_ptr()),
                stride: (api.bo_get_stride)(bo.as_ptr()),
                handle: (api.bo_get_handle)(bo.as_ptr()).u32_,
            })
        }
    }

    pub fn release_buffer(&self, buffer: LockedBuffer) {
        unsafe { (self.device.api.surface_release_buffer)(self.raw.as_ptr(), buffer.raw.as_ptr()) };
    }
}

impl Drop for GbmSurface {
    fn drop(&mut self) {
        unsafe { (self.device.api.surface_destroy)(self.raw.as_ptr()) };
        debug!("Destroyed GBM surface");
    }
}
