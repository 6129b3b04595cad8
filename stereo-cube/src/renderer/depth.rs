//! Depth test across eyes
//!
//! Four quads fill the depth buffer (colour writes off) at increasing depth,
//! one per screen quadrant. A coloured probe quad is then drawn per eye with
//! `GL_GREATER`, so it only shows where it lies in front of the stored value:
//! the red left-eye probe at z 0.3, the blue right-eye probe at z 0.6.
//!
//! On a multiview surface both eyes share the depth buffer and the fill pass
//! runs once. Split surfaces run it again inside each eye's half.

use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::debug;

use super::{check_eye_support, Renderer, RendererDescriptor};
use crate::config::Settings;
use crate::eyes::{Eye, EyeSelector, RenderTarget};
use crate::gles::{self, Gles};

pub const DESCRIPTOR: RendererDescriptor = RendererDescriptor {
    name: "depth",
    options: &[],
    new: new_renderer,
};

const VERTEX_SHADER: &str = "\
attribute highp vec3 pos;
void main()
{
    gl_Position = vec4(pos, 1.0);
}
";

const FRAGMENT_SHADER: &str = "\
uniform highp vec4 color;
void main()
{
    gl_FragColor = color;
}
";

/// Bottom-left corners and depth of the unit quads written in the fill pass
pub const FILL_QUADS: [[f32; 3]; 4] = [
    [-1.0, -1.0, 0.0],
    [0.0, -1.0, 0.25],
    [-1.0, 0.0, 0.5],
    [0.0, 0.0, 0.75],
];

/// Coloured quad drawn for one eye after the fill pass
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub origin: [f32; 3],
    /// 0xRRGGBBAA
    pub color: u32,
}

pub fn probe(eye: Eye) -> Probe {
    match eye {
        Eye::Left => Probe {
            origin: [-0.5, -0.5, 0.3],
            color: 0xff00_00ff,
        },
        Eye::Right => Probe {
            origin: [-0.5, -0.5, 0.6],
            color: 0x0000_ffff,
        },
    }
}

/// Triangle strip for a unit quad with its bottom-left corner at `origin`
fn unit_quad([x, y, z]: [f32; 3]) -> [f32; 12] {
    [
        x, y, z, //
        x + 1.0, y, z, //
        x, y + 1.0, z, //
        x + 1.0, y + 1.0, z,
    ]
}

pub fn unpack_color(color: u32) -> [f32; 4] {
    [
        (color >> 24) as f32 / 255.0,
        ((color >> 16) & 0xff) as f32 / 255.0,
        ((color >> 8) & 0xff) as f32 / 255.0,
        (color & 0xff) as f32 / 255.0,
    ]
}

/// NDC z to the [0, 1] window depth the depth buffer stores
pub fn window_depth(z: f32) -> f32 {
    z * 0.5 + 0.5
}

/// Depth buffer contents at NDC (x, y) after the fill pass
pub fn filled_depth(x: f32, y: f32) -> f32 {
    FILL_QUADS
        .iter()
        .find(|[qx, qy, _]| x >= *qx && x < qx + 1.0 && y >= *qy && y < qy + 1.0)
        .map(|[_, _, z]| window_depth(*z))
        // Cleared value
        .unwrap_or(1.0)
}

/// Whether a fragment at NDC depth `z` passes `GL_GREATER` at (x, y)
pub fn passes_depth_test(z: f32, x: f32, y: f32) -> bool {
    window_depth(z) > filled_depth(x, y)
}

struct Connected {
    gl: Rc<Gles>,
    eyes: EyeSelector,
    program: u32,
    color_location: i32,
}

impl Connected {
    fn fill_depth(&self) {
        let gl = &self.gl;
        gl.depth_func(gles::ALWAYS);
        gl.depth_mask(gles::TRUE);
        gl.color_mask(gles::FALSE, gles::FALSE, gles::FALSE, gles::FALSE);
        for quad in FILL_QUADS {
            gl.draw_strip(3, &unit_quad(quad));
        }
        gl.color_mask(gles::TRUE, gles::TRUE, gles::TRUE, gles::TRUE);
        gl.depth_mask(gles::FALSE);
        gl.depth_func(gles::GREATER);
    }

    fn draw_probe(&self, eye: Eye) {
        let probe = probe(eye);
        let [r, g, b, a] = unpack_color(probe.color);
        self.gl.uniform4f(self.color_location, r, g, b, a);
        self.gl.draw_strip(3, &unit_quad(probe.origin));
    }

    fn draw(&self) {
        let gl = &self.gl;
        let shared_depth = self.eyes.target().shares_depth();

        gl.use_program(self.program);
        gl.enable(gles::DEPTH_TEST);
        gl.depth_mask(gles::TRUE);
        gl.clear(gles::DEPTH_BUFFER_BIT | gles::STENCIL_BUFFER_BIT);

        gl.enable(gles::SCISSOR_TEST);
        for eye in Eye::BOTH {
            let area = self.eyes.select(eye);
            gl.scissor(area.x, area.y, area.width, area.height);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(gles::COLOR_BUFFER_BIT);

            if eye == Eye::Left || !shared_depth {
                self.fill_depth();
            }
            self.draw_probe(eye);
        }
        gl.disable(gles::SCISSOR_TEST);

        gl.depth_mask(gles::TRUE);
        gl.disable(gles::DEPTH_TEST);
    }
}

impl Drop for Connected {
    fn drop(&mut self) {
        self.gl.delete_program(self.program);
    }
}

pub struct DepthRenderer {
    state: Option<Connected>,
}

fn new_renderer(_settings: &Settings) -> Box<dyn Renderer> {
    Box::new(DepthRenderer { state: None })
}

impl Renderer for DepthRenderer {
    fn connect(&mut self, target: &RenderTarget) -> Result<()> {
        check_eye_support(&target.gl, target.eyes)?;

        let program = gles::create_program(&target.gl, VERTEX_SHADER, FRAGMENT_SHADER, &["pos"])
            .context("Failed to build depth program")?;
        let color_location = target.gl.uniform_location(program, "color");
        debug!("depth program {} color at {}", program, color_location);

        self.state = Some(Connected {
            gl: target.gl.clone(),
            eyes: EyeSelector::new(target),
            program,
            color_location,
        });
        Ok(())
    }

    fn draw_frame(&mut self, _frame: u64) {
        if let Some(state) = &self.state {
            state.draw();
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
    use crate::eyes::EyeTarget;

    /// A point inside each fill quad, in `FILL_QUADS` order
    const QUADRANTS: [(f32, f32); 4] = [(-0.25, -0.25), (0.25, -0.25), (-0.25, 0.25), (0.25, 0.25)];

    fn visible(eye: Eye) -> Vec<bool> {
        let z = probe(eye).origin[2];
        QUADRANTS.iter().map(|&(x, y)| passes_depth_test(z, x, y)).collect()
    }

    #[test]
    fn test_left_probe_shows_over_near_quads_only() {
        assert_eq!(visible(Eye::Left), [true, true, false, false]);
    }

    #[test]
    fn test_right_probe_hidden_only_over_farthest_quad() {
        assert_eq!(visible(Eye::Right), [true, true, true, false]);
    }

    #[test]
    fn test_probes_cover_every_quadrant() {
        for eye in Eye::BOTH {
            let [x, y, _] = probe(eye).origin;
            for (qx, qy) in QUADRANTS {
                assert!(qx >= x && qx <= x + 1.0 && qy >= y && qy <= y + 1.0);
            }
        }
    }

    #[test]
    fn test_nothing_passes_over_cleared_depth() {
        // Outside the fill quads the buffer holds the clear value
        assert_eq!(filled_depth(1.5, 1.5), 1.0);
        assert!(!passes_depth_test(0.99, 1.5, 1.5));
    }

    #[test]
    fn test_window_depth() {
        assert_eq!(window_depth(-1.0), 0.0);
        assert_eq!(window_depth(0.0), 0.5);
        assert_eq!(window_depth(1.0), 1.0);
    }

    #[test]
    fn test_unpack_color() {
        assert_eq!(unpack_color(0xff00_00ff), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(unpack_color(0x0000_ffff), [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(unpack_color(0), [0.0; 4]);
    }

    #[test]
    fn test_unit_quad_strip_order() {
        let quad = unit_quad([0.0, -1.0, 0.25]);
        assert_eq!(&quad[0..3], &[0.0, -1.0, 0.25]);
        assert_eq!(&quad[3..6], &[1.0, -1.0, 0.25]);
        assert_eq!(&quad[6..9], &[0.0, 0.0, 0.25]);
        assert_eq!(&quad[9..12], &[1.0, 0.0, 0.25]);
    }

    #[test]
    fn test_connect_without_gl_fails() {
        let target = RenderTarget {
            gl: Rc::new(Gles::unloaded()),
            eyes: EyeTarget::Split(crate::eyes::SplitLayout::SideBySide),
        };
        let mut renderer = new_renderer(&Settings::default());
        assert!(renderer.connect(&target).is_err());
        // Never connected, so drawing does nothing
        renderer.draw_frame(0);
    }
}
