//! Stereo photo pair
//!
//! `-1` and `-2` name the left and right images (defaulting to the `[image]`
//! settings). Each is scaled up to power-of-two dimensions, mipmapped and
//! stretched over its eye.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use ::image::imageops::FilterType;
use anyhow::{anyhow, Context, Result};
use tracing::info;

use super::{check_eye_support, Renderer, RendererDescriptor};
use crate::config::Settings;
use crate::eyes::{Eye, EyeSelector, RenderTarget};
use crate::gles::{self, Gles};
use crate::registry::OptionSpec;

pub const DESCRIPTOR: RendererDescriptor = RendererDescriptor {
    name: "image",
    options: &[
        OptionSpec {
            short: '1',
            id: "left-image",
            value_name: "LEFT_IMG",
            help: "Set the left image file",
        },
        OptionSpec {
            short: '2',
            id: "right-image",
            value_name: "RIGHT_IMG",
            help: "Set the right image file",
        },
    ],
    new: new_renderer,
};

const VERTEX_SHADER: &str = "\
attribute vec2 pos;
varying vec2 tex_coord;
void main()
{
    gl_Position = vec4(pos * 2.0 - 1.0, 0.0, 1.0);
    tex_coord = vec2(pos.x, 1.0 - pos.y);
}
";

const FRAGMENT_SHADER: &str = "\
precision mediump float;
uniform sampler2D tex;
varying vec2 tex_coord;
void main()
{
    gl_FragColor = texture2D(tex, tex_coord);
}
";

const QUAD: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// Decoded image ready for `glTexImage2D`
#[derive(Debug)]
pub struct Pixels {
    pub width: u32,
    pub height: u32,
    /// `gles::RGB` or `gles::RGBA`
    pub format: u32,
    pub data: Vec<u8>,
}

/// Decode `path` and scale it to the next power of two in each dimension
pub fn load_pixels(path: &Path) -> Result<Pixels> {
    let img = ::image::open(path).with_context(|| format!("Failed to load image {:?}", path))?;

    let width = img.width().next_power_of_two();
    let height = img.height().next_power_of_two();
    let img = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    };

    let (format, data) = if img.color().has_alpha() {
        (gles::RGBA, img.to_rgba8().into_raw())
    } else {
        (gles::RGB, img.to_rgb8().into_raw())
    };

    Ok(Pixels {
        width,
        height,
        format,
        data,
    })
}

fn upload_texture(gl: &Gles, pixels: &Pixels) -> u32 {
    let mut texture = 0;
    unsafe { gl.gen_textures(1, &mut texture) };
    gl.bind_texture(gles::TEXTURE_2D, texture);
    gl.pixel_storei(gles::UNPACK_ALIGNMENT, 1);
    unsafe {
        gl.tex_image_2d(
            gles::TEXTURE_2D,
            0,
            pixels.format as i32,
            pixels.width as i32,
            pixels.height as i32,
            0,
            pixels.format,
            gles::UNSIGNED_BYTE,
            pixels.data.as_ptr().cast(),
        );
    }
    gl.tex_parameteri(gles::TEXTURE_2D, gles::TEXTURE_MIN_FILTER, gles::LINEAR_MIPMAP_NEAREST);
    gl.tex_parameteri(gles::TEXTURE_2D, gles::TEXTURE_MAG_FILTER, gles::LINEAR);
    gl.tex_parameteri(gles::TEXTURE_2D, gles::TEXTURE_WRAP_S, gles::CLAMP_TO_EDGE);
    gl.tex_parameteri(gles::TEXTURE_2D, gles::TEXTURE_WRAP_T, gles::CLAMP_TO_EDGE);
    gl.generate_mipmap(gles::TEXTURE_2D);
    texture
}

struct Connected {
    gl: Rc<Gles>,
    eyes: EyeSelector,
    program: u32,
    /// Left, right
    textures: [u32; 2],
}

impl Drop for Connected {
    fn drop(&mut self) {
        unsafe { self.gl.delete_textures(2, self.textures.as_ptr()) };
        self.gl.delete_program(self.program);
    }
}

pub struct ImageRenderer {
    /// Left, right
    paths: [Option<PathBuf>; 2],
    state: Option<Connected>,
}

fn new_renderer(settings: &Settings) -> Box<dyn Renderer> {
    Box::new(ImageRenderer {
        paths: [settings.image.left.clone(), settings.image.right.clone()],
        state: None,
    })
}

impl ImageRenderer {
    fn path(&self, eye: Eye) -> Result<&Path> {
        let letter = match eye {
            Eye::Left => '1',
            Eye::Right => '2',
        };
        self.paths[eye.index() as usize]
            .as_deref()
            .ok_or_else(|| anyhow!("Missing -{} option", letter))
    }
}

impl Renderer for ImageRenderer {
    fn handle_option(&mut self, opt: char, value: &str) -> Result<bool> {
        let slot = match opt {
            '1' => &mut self.paths[0],
            '2' => &mut self.paths[1],
            _ => return Ok(false),
        };
        *slot = Some(PathBuf::from(value));
        Ok(true)
    }

    fn connect(&mut self, target: &RenderTarget) -> Result<()> {
        // Both paths are checked before any image or GL work
        let left_path = self.path(Eye::Left)?;
        let right_path = self.path(Eye::Right)?;
        let left = load_pixels(left_path)?;
        let right = load_pixels(right_path)?;
        info!(
            "Loaded images {}x{} and {}x{}",
            left.width, left.height, right.width, right.height
        );

        check_eye_support(&target.gl, target.eyes)?;
        let gl = &target.gl;
        let program = gles::create_program(gl, VERTEX_SHADER, FRAGMENT_SHADER, &["pos"])
            .context("Failed to build image program")?;

        gl.use_program(program);
        gl.uniform1i(gl.uniform_location(program, "tex"), 0);

        let textures = [upload_texture(gl, &left), upload_texture(gl, &right)];

        self.state = Some(Connected {
            gl: gl.clone(),
            eyes: EyeSelector::new(target),
            program,
            textures,
        });
        Ok(())
    }

    fn draw_frame(&mut self, _frame: u64) {
        let Some(Connected {
            gl,
            eyes,
            program,
            textures,
        }) = &self.state
        else {
            return;
        };

        gl.use_program(*program);
        gl.active_texture(gles::TEXTURE0);
        for eye in Eye::BOTH {
            eyes.select(eye);
            gl.bind_texture(gles::TEXTURE_2D, textures[eye.index() as usize]);
            gl.draw_strip(2, &QUAD);
        }
    }

    fn resize(&mut self, width: i32, height: i32) {
        if let Some(state) = &mut self.state {
            state.eyes.resize(width, height);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eyes::{EyeTarget, SplitLayout};
    use ::image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn split_target() -> RenderTarget {
        RenderTarget {
            gl: Rc::new(Gles::unloaded()),
            eyes: EyeTarget::Split(SplitLayout::SideBySide),
        }
    }

    #[test]
    fn test_scales_to_power_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("left.png");
        RgbImage::from_pixel(100, 60, Rgb([10, 20, 30])).save(&path).unwrap();

        let pixels = load_pixels(&path).unwrap();
        assert_eq!((pixels.width, pixels.height), (128, 64));
        assert_eq!(pixels.format, gles::RGB);
        assert_eq!(pixels.data.len(), 128 * 64 * 3);
    }

    #[test]
    fn test_alpha_kept_as_rgba() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("right.png");
        RgbaImage::from_pixel(64, 32, Rgba([1, 2, 3, 128])).save(&path).unwrap();

        let pixels = load_pixels(&path).unwrap();
        assert_eq!((pixels.width, pixels.height), (64, 32));
        assert_eq!(pixels.format, gles::RGBA);
        assert_eq!(pixels.data.len(), 64 * 32 * 4);
    }

    #[test]
    fn test_unreadable_image() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_pixels(&dir.path().join("missing.png")).unwrap_err();
        assert!(err.to_string().contains("missing.png"));
    }

    #[test]
    fn test_corrupt_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png at all").unwrap();
        let err = load_pixels(&path).unwrap_err();
        assert!(err.to_string().contains("broken.png"));
    }

    #[test]
    fn test_options() {
        let mut renderer = ImageRenderer {
            paths: [None, None],
            state: None,
        };
        assert!(renderer.handle_option('1', "a.png").unwrap());
        assert!(renderer.handle_option('2', "b.png").unwrap());
        assert!(!renderer.handle_option('d', "/dev/dri/card0").unwrap());
        assert_eq!(renderer.path(Eye::Left).unwrap(), Path::new("a.png"));
        assert_eq!(renderer.path(Eye::Right).unwrap(), Path::new("b.png"));
    }

    #[test]
    fn test_missing_left_image() {
        let mut renderer = new_renderer(&Settings::default());
        renderer.handle_option('2', "right.png").unwrap();
        let err = renderer.connect(&split_target()).unwrap_err();
        assert_eq!(err.to_string(), "Missing -1 option");
    }

    #[test]
    fn test_missing_right_image() {
        let mut renderer = new_renderer(&Settings::default());
        renderer.handle_option('1', "left.png").unwrap();
        let err = renderer.connect(&split_target()).unwrap_err();
        assert_eq!(err.to_string(), "Missing -2 option");
    }

    #[test]
    fn test_settings_supply_defaults() {
        let mut settings = Settings::default();
        settings.image.left = Some(PathBuf::from("l.png"));
        let renderer = ImageRenderer {
            paths: [settings.image.left.clone(), settings.image.right.clone()],
            state: None,
        };
        assert_eq!(renderer.path(Eye::Left).unwrap(), Path::new("l.png"));
        assert!(renderer.path(Eye::Right).is_err());
    }
}
