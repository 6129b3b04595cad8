//! Full-screen stereo on a KMS output
//!
//! The connector's best stereo mode is picked, a GBM surface is allocated with
//! that mode's layout and EGL renders both views into it through
//! `EGL_EXT_multiview_window`. Each frame is locked, wrapped in a framebuffer
//! and page-flipped; the first one sets the mode instead.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, bail, Context, Result};
use stereo_kms::drm_device::SavedCrtc;
use stereo_kms::gbm_device::LockedBuffer;
use stereo_kms::{ConnectorSelector, DrmDevice, Framebuffer, GbmDevice, GbmSurface, Output, StereoLayout};
use tracing::{debug, info, warn};

use super::{FrameCallbacks, Winsys, WinsysDescriptor};
use crate::cli::UsageError;
use crate::config::Settings;
use crate::egl::{EglDisplay, EglWindow, MULTIVIEW_WINDOW_EXTENSION, STEREO_SURFACE_ATTRIBS};
use crate::eyes::{EyeTarget, RenderTarget};
use crate::quit::{run_frames, InterruptGuard, QuitToken};
use crate::registry::OptionSpec;

pub const DESCRIPTOR: WinsysDescriptor = WinsysDescriptor {
    name: "gbm",
    options: &[
        OptionSpec {
            short: 'd',
            id: "device",
            value_name: "DEV",
            help: "Set the dri device to open",
        },
        OptionSpec {
            short: 'c',
            id: "connector",
            value_name: "CONNECTOR",
            help: "Use the given connector",
        },
        OptionSpec {
            short: 'l',
            id: "layout",
            value_name: "MODE",
            help: "Use a particular stereo mode (none/fp/la/sbsf/tb/sbsh)",
        },
    ],
    new: new_winsys,
};

/// Buffer currently on screen and the framebuffer wrapping it
struct Scanout {
    buffer: LockedBuffer,
    fb: Framebuffer,
}

/// Everything acquired by `connect`, released in field order
struct Connected {
    current: Option<Scanout>,
    saved_crtc: Option<SavedCrtc>,
    mode_set: bool,
    window: EglWindow,
    surface: GbmSurface,
    _display: EglDisplay,
    _gbm: GbmDevice,
    output: Output,
    drm: DrmDevice,
}

impl Connected {
    fn release(&self, scanout: Scanout) {
        self.drm.remove_framebuffer(scanout.fb);
        self.surface.release_buffer(scanout.buffer);
    }

    /// Present the frame just drawn
    fn swap(&mut self) -> Result<()> {
        self.window.swap_buffers()?;

        let buffer = self.surface.lock_front_buffer()?;
        let fb = match self
            .drm
            .add_framebuffer(buffer.width, buffer.height, buffer.stride, buffer.handle)
        {
            Ok(fb) => fb,
            Err(e) => {
                self.surface.release_buffer(buffer);
                return Err(e).context("Failed to create new back buffer handle");
            }
        };
        let next = Scanout { buffer, fb };

        let shown = if self.mode_set {
            self.drm
                .page_flip(&self.output, fb)
                .and_then(|()| self.drm.wait_for_flip(&self.output))
        } else {
            self.saved_crtc = self.drm.save_crtc(&self.output);
            self.drm.set_crtc(&self.output, fb).map(|()| {
                info!("Mode set on crtc {}", self.output.crtc_id);
                self.mode_set = true;
            })
        };

        if let Err(e) = shown {
            self.release(next);
            return Err(e.into());
        }

        if let Some(old) = self.current.replace(next) {
            self.release(old);
        }
        Ok(())
    }
}

impl Drop for Connected {
    fn drop(&mut self) {
        if let Some(saved) = self.saved_crtc.take() {
            self.drm.restore_crtc(&saved, &self.output);
            debug!("Restored crtc {}", saved.crtc_id);
        }
        if let Some(current) = self.current.take() {
            self.release(current);
        }
    }
}

pub struct GbmWinsys {
    device: PathBuf,
    connector: Option<u32>,
    layout: Option<StereoLayout>,
    state: Option<Connected>,
}

fn new_winsys(settings: &Settings) -> Box<dyn Winsys> {
    Box::new(GbmWinsys::new(settings))
}

impl GbmWinsys {
    pub fn new(settings: &Settings) -> Self {
        Self {
            device: settings.gbm.device.clone(),
            connector: settings.gbm.connector,
            layout: settings.gbm.layout,
            state: None,
        }
    }

    fn selector(&self) -> ConnectorSelector {
        self.connector.map_or(ConnectorSelector::FirstConnected, ConnectorSelector::Id)
    }
}

impl Winsys for GbmWinsys {
    fn handle_option(&mut self, opt: char, value: &str) -> Result<bool> {
        let invalid = |reason: String| UsageError::InvalidValue {
            opt,
            value: value.to_string(),
            reason,
        };

        match opt {
            'd' => self.device = PathBuf::from(value),
            'c' => {
                let id = value.parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
                self.connector = Some(id);
            }
            'l' => {
                let layout = value.parse().map_err(|e: stereo_kms::Error| invalid(e.to_string()))?;
                self.layout = Some(layout);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn connect(&mut self) -> Result<RenderTarget> {
        let drm = DrmDevice::open(&self.device)?;
        let output = drm.prepare_output(self.selector(), self.layout)?;
        info!(
            "Using connector {} on crtc {}: {:?}",
            output.connector_id,
            output.crtc_id,
            output.mode()
        );

        let gbm = GbmDevice::new(&drm)?;
        let display = EglDisplay::open(gbm.as_ptr())?;
        if !display.has_extension(MULTIVIEW_WINDOW_EXTENSION) {
            bail!("{} not supported", MULTIVIEW_WINDOW_EXTENSION);
        }

        let surface = gbm.create_stereo_surface(output.mode())?;
        let config = display.choose_config()?;
        // The GBM surface is stored alongside the window and dropped after it
        let window = unsafe { display.create_window(config, surface.as_ptr(), &STEREO_SURFACE_ATTRIBS)? };

        let views = window.view_count()?;
        if views < 2 {
            bail!(
                "EGL created a multiview surface with only {} {}",
                views,
                if views == 1 { "view" } else { "views" }
            );
        }

        let gl = Rc::new(display.load_gles());

        self.state = Some(Connected {
            current: None,
            saved_crtc: None,
            mode_set: false,
            window,
            surface,
            _display: display,
            _gbm: gbm,
            output,
            drm,
        });

        Ok(RenderTarget {
            gl,
            eyes: EyeTarget::Multiview,
        })
    }

    fn main_loop(&mut self, callbacks: &mut dyn FrameCallbacks, quit: &QuitToken) -> Result<()> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("gbm winsys is not connected"))?;
        let mut interrupt = InterruptGuard::install(quit)?;

        let (width, height) = state.window.size();
        callbacks.update_size(width, height);

        let frames = run_frames(&mut interrupt, || {
            callbacks.draw();
            if let Err(e) = state.swap() {
                warn!("Frame dropped: {:#}", e);
            }
            Ok(())
        })?;

        info!("Presented {} frames", frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn winsys() -> GbmWinsys {
        GbmWinsys::new(&Settings::default())
    }

    #[test]
    fn test_defaults_from_settings() {
        let mut settings = Settings::default();
        settings.gbm.connector = Some(31);
        settings.gbm.layout = Some(StereoLayout::TopAndBottom);
        let winsys = GbmWinsys::new(&settings);
        assert_eq!(winsys.device, PathBuf::from("/dev/dri/card0"));
        assert_eq!(winsys.selector(), ConnectorSelector::Id(31));
        assert_eq!(winsys.layout, Some(StereoLayout::TopAndBottom));
    }

    #[test]
    fn test_first_connected_by_default() {
        assert_eq!(winsys().selector(), ConnectorSelector::FirstConnected);
    }

    #[test]
    fn test_options() {
        let mut winsys = winsys();
        assert!(winsys.handle_option('d', "/dev/dri/card1").unwrap());
        assert!(winsys.handle_option('c', "42").unwrap());
        assert!(winsys.handle_option('l', "sbsh").unwrap());
        assert_eq!(winsys.device, PathBuf::from("/dev/dri/card1"));
        assert_eq!(winsys.selector(), ConnectorSelector::Id(42));
        assert_eq!(winsys.layout, Some(StereoLayout::SideBySideHalf));
    }

    #[test]
    fn test_foreign_option_is_declined() {
        let mut winsys = winsys();
        assert!(!winsys.handle_option('1', "left.png").unwrap());
        assert!(!winsys.handle_option('r', "gears").unwrap());
    }

    #[test]
    fn test_invalid_option_values() {
        let mut winsys = winsys();
        let err = winsys.handle_option('c', "hdmi").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsageError>(),
            Some(UsageError::InvalidValue { opt: 'c', .. })
        ));
        let err = winsys.handle_option('l', "diagonal").unwrap_err();
        assert!(err.to_string().contains("diagonal"));
        assert_eq!(winsys.layout, None);
    }

    #[test]
    fn test_connect_to_missing_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut winsys = winsys();
        winsys.handle_option('d', dir.path().join("card9").to_str().unwrap()).unwrap();
        assert!(winsys.connect().is_err());
        assert!(winsys.state.is_none());
    }

    struct NoFrames;

    impl FrameCallbacks for NoFrames {
        fn update_size(&mut self, _width: i32, _height: i32) {
            panic!("not connected");
        }
        fn draw(&mut self) {
            panic!("not connected");
        }
    }

    #[test]
    fn test_main_loop_needs_connect() {
        let mut winsys = winsys();
        assert!(winsys.main_loop(&mut NoFrames, &QuitToken::new()).is_err());
    }
}
