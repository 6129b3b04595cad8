//! EGL display, context and window surface handling shared by both winsys
//!
//! Objects are released in reverse order of creation: [`EglWindow`] unbinds
//! and destroys the context and surface, [`EglDisplay`] terminates the display.

use std::ffi::c_void;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use khronos_egl as egl;
use tracing::{info, warn};

use crate::gles::{extension_in_list, Gles};

pub type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

pub const MULTIVIEW_WINDOW_EXTENSION: &str = "EGL_EXT_multiview_window";
/// EGL_MULTIVIEW_VIEW_COUNT_EXT
pub const MULTIVIEW_VIEW_COUNT: egl::Int = 0x3134;

/// Surface attributes asking for a left and a right view
pub const STEREO_SURFACE_ATTRIBS: [egl::Int; 3] = [MULTIVIEW_VIEW_COUNT, 2, egl::NONE];

/// An initialized EGL display, terminated on drop
pub struct EglDisplay {
    egl: Rc<EglInstance>,
    raw: egl::Display,
}

impl EglDisplay {
    /// Load libEGL and initialize the display for `native`
    pub fn open(native: *mut c_void) -> Result<Self> {
        let egl = unsafe { EglInstance::load_required() }
            .map_err(|e| anyhow!("Failed to load EGL: {:?}", e))?;

        info!("Loaded EGL library");

        let raw = unsafe { egl.get_display(native) }
            .ok_or_else(|| anyhow!("Failed to get EGL display"))?;

        let (major, minor) = egl
            .initialize(raw)
            .map_err(|e| anyhow!("Failed to initialize EGL: {:?}", e))?;

        info!("EGL initialized: {}.{}", major, minor);

        Ok(Self {
            egl: Rc::new(egl),
            raw,
        })
    }

    pub fn has_extension(&self, name: &str) -> bool {
        match self.egl.query_string(Some(self.raw), egl::EXTENSIONS) {
            Ok(list) => extension_in_list(name, &list.to_string_lossy()),
            Err(e) => {
                warn!("Failed to query EGL extensions: {:?}", e);
                false
            }
        }
    }

    /// Pick a GLES2 window config with colour and depth bits
    pub fn choose_config(&self) -> Result<egl::Config> {
        let attribs = [
            egl::RED_SIZE, 1,
            egl::GREEN_SIZE, 1,
            egl::BLUE_SIZE, 1,
            egl::ALPHA_SIZE, egl::DONT_CARE,
            egl::DEPTH_SIZE, 1,
            egl::BUFFER_SIZE, egl::DONT_CARE,
            egl::RENDERABLE_TYPE, egl::OPENGL_ES2_BIT,
            egl::SURFACE_TYPE, egl::WINDOW_BIT,
            egl::NONE,
        ];

        self.egl
            .choose_first_config(self.raw, &attribs)
            .map_err(|e| anyhow!("Failed to choose EGL config: {:?}", e))?
            .ok_or_else(|| anyhow!("Unable to find a usable EGL configuration"))
    }

    /// Create a window surface and a GLES2 context for it, and make them current
    ///
    /// # Safety
    /// `native_window` must stay alive until the returned window is dropped.
    pub unsafe fn create_window(
        &self,
        config: egl::Config,
        native_window: *mut c_void,
        surface_attribs: &[egl::Int],
    ) -> Result<EglWindow> {
        self.egl
            .bind_api(egl::OPENGL_ES_API)
            .map_err(|e| anyhow!("Failed to bind GLES API: {:?}", e))?;

        let surface = self
            .egl
            .create_window_surface(self.raw, config, native_window, Some(surface_attribs))
            .map_err(|e| anyhow!("Failed to create EGL surface: {:?}", e))?;

        info!("Created EGL surface");

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];
        let context = match self.egl.create_context(self.raw, config, None, &context_attribs) {
            Ok(context) => context,
            Err(e) => {
                let _ = self.egl.destroy_surface(self.raw, surface);
                return Err(anyhow!("Failed to create EGL context: {:?}", e));
            }
        };

        info!("Created EGL context");

        let window = EglWindow {
            egl: self.egl.clone(),
            display: self.raw,
            surface,
            context,
        };

        self.egl
            .make_current(self.raw, Some(surface), Some(surface), Some(context))
            .map_err(|e| anyhow!("Failed to make EGL context current: {:?}", e))?;

        info!("Made EGL context current");

        Ok(window)
    }

    /// Resolve GLES through libGLESv2, then `eglGetProcAddress`
    pub fn load_gles(&self) -> Gles {
        let egl = self.egl.clone();
        Gles::load(move |name| {
            egl.get_proc_address(name)
                .map_or(std::ptr::null(), |f| f as *const c_void)
        })
    }
}

impl Drop for EglDisplay {
    fn drop(&mut self) {
        if let Err(e) = self.egl.terminate(self.raw) {
            warn!("Failed to terminate EGL display: {:?}", e);
        }
    }
}

/// A current context plus its window surface
///
/// Must be dropped before the [`EglDisplay`] it came from.
pub struct EglWindow {
    egl: Rc<EglInstance>,
    display: egl::Display,
    surface: egl::Surface,
    context: egl::Context,
}

impl EglWindow {
    pub fn swap_buffers(&self) -> Result<()> {
        self.egl
            .swap_buffers(self.display, self.surface)
            .map_err(|e| anyhow!("eglSwapBuffers failed: {:?}", e))
    }

    /// Current surface size in pixels
    pub fn size(&self) -> (i32, i32) {
        let query = |attr| self.egl.query_surface(self.display, self.surface, attr).unwrap_or(0);
        (query(egl::WIDTH), query(egl::HEIGHT))
    }

    /// Number of views the context renders, 1 for a plain surface
    pub fn view_count(&self) -> Result<i32> {
        self.egl
            .query_context(self.display, self.context, MULTIVIEW_VIEW_COUNT)
            .map_err(|e| anyhow!("Failed to query multiview view count: {:?}", e))
    }
}

impl Drop for EglWindow {
    fn drop(&mut self) {
        if let Err(e) = self.egl.make_current(self.display, None, None, None) {
            warn!("Failed to unbind EGL context: {:?}", e);
        }
        if let Err(e) = self.egl.destroy_context(self.display, self.context) {
            warn!("Failed to destroy EGL context: {:?}", e);
        }
        if let Err(e) = self.egl.destroy_surface(self.display, self.surface) {
            warn!("Failed to destroy EGL surface: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_surface_attribs() {
        assert_eq!(STEREO_SURFACE_ATTRIBS, [0x3134, 2, egl::NONE]);
    }
}
