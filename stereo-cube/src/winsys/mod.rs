//! Window systems a renderer can be shown on
//!
//! - `gbm`: full screen on a DRM/KMS output, presenting with page flips
//! - `wayland`: an xdg toplevel on a Wayland compositor

pub mod gbm;
pub mod wayland;

use anyhow::Result;

use crate::config::Settings;
use crate::eyes::RenderTarget;
use crate::quit::QuitToken;
use crate::registry::{Descriptor, OptionSpec, Registry};

/// What the run loop calls back into
pub trait FrameCallbacks {
    /// The drawable is now `width` x `height`
    fn update_size(&mut self, width: i32, height: i32);
    /// Render one frame into the current back buffer
    fn draw(&mut self);
}

pub trait Winsys {
    /// Take a command-line option; `Ok(false)` means it isn't ours
    fn handle_option(&mut self, _opt: char, _value: &str) -> Result<bool> {
        Ok(false)
    }

    /// Acquire the display, surface and GL context
    fn connect(&mut self) -> Result<RenderTarget>;

    /// Draw and present frames until `quit` is requested
    fn main_loop(&mut self, callbacks: &mut dyn FrameCallbacks, quit: &QuitToken) -> Result<()>;
}

pub struct WinsysDescriptor {
    pub name: &'static str,
    pub options: &'static [OptionSpec],
    pub new: fn(&Settings) -> Box<dyn Winsys>,
}

impl Descriptor for WinsysDescriptor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn options(&self) -> &'static [OptionSpec] {
        self.options
    }
}

static ENTRIES: [WinsysDescriptor; 2] = [gbm::DESCRIPTOR, wayland::DESCRIPTOR];

pub static WINSYSES: Registry<WinsysDescriptor> = Registry::new(&ENTRIES);
