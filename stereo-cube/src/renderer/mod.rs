//! Stereo renderers
//!
//! - `gears`: two solid boxes that drift with the frame number
//! - `image`: a left/right photo pair
//! - `depth`: eye separation through the depth test

pub mod depth;
pub mod gears;
pub mod image;

use anyhow::{bail, Result};

use crate::config::Settings;
use crate::eyes::{EyeTarget, RenderTarget};
use crate::gles::Gles;
use crate::registry::{Descriptor, OptionSpec, Registry};

pub const MULTIVIEW_DRAW_BUFFERS: &str = "GL_EXT_multiview_draw_buffers";

pub trait Renderer {
    /// Take a command-line option; `Ok(false)` means it isn't ours
    fn handle_option(&mut self, _opt: char, _value: &str) -> Result<bool> {
        Ok(false)
    }

    /// Create GL resources, with the target's context current
    fn connect(&mut self, target: &RenderTarget) -> Result<()>;

    fn draw_frame(&mut self, frame: u64);

    fn resize(&mut self, width: i32, height: i32);
}

pub struct RendererDescriptor {
    pub name: &'static str,
    pub options: &'static [OptionSpec],
    pub new: fn(&Settings) -> Box<dyn Renderer>,
}

impl Descriptor for RendererDescriptor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn options(&self) -> &'static [OptionSpec] {
        self.options
    }
}

static ENTRIES: [RendererDescriptor; 3] = [gears::DESCRIPTOR, image::DESCRIPTOR, depth::DESCRIPTOR];

pub static RENDERERS: Registry<RendererDescriptor> = Registry::new(&ENTRIES);

/// Multiview targets need indexed draw buffers to pick an eye
pub fn check_eye_support(gl: &Gles, eyes: EyeTarget) -> Result<()> {
    if eyes != EyeTarget::Multiview {
        return Ok(());
    }
    if !gl.has_extension(MULTIVIEW_DRAW_BUFFERS) {
        bail!("missing {} extension", MULTIVIEW_DRAW_BUFFERS);
    }
    if !gl.has_draw_buffers_indexed() {
        bail!("{} advertised but glDrawBuffersIndexedEXT not found", MULTIVIEW_DRAW_BUFFERS);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eyes::SplitLayout;

    #[test]
    fn test_split_target_needs_no_extension() {
        let gl = Gles::unloaded();
        assert!(check_eye_support(&gl, EyeTarget::Split(SplitLayout::SideBySide)).is_ok());
    }

    #[test]
    fn test_multiview_without_extension_fails() {
        let gl = Gles::unloaded();
        let err = check_eye_support(&gl, EyeTarget::Multiview).unwrap_err();
        assert!(err.to_string().contains("GL_EXT_multiview_draw_buffers"));
    }

    #[test]
    fn test_option_letters() {
        let image = RENDERERS.select("image").unwrap();
        let letters: Vec<char> = image.options.iter().map(|o| o.short).collect();
        assert_eq!(letters, ['1', '2']);
        assert!(RENDERERS.select("gears").unwrap().options.is_empty());
        assert!(RENDERERS.select("depth").unwrap().options.is_empty());
    }
}
