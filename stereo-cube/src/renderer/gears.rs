//! Two solid boxes, one per eye
//!
//! Each eye is cleared blue and gets a scissored box: red for the left eye,
//! green for the right. The boxes sit 3/8 of a box apart from the centre so
//! the pair fuses in depth, and drift sideways together with the frame number.

use std::rc::Rc;

use anyhow::Result;

use super::{check_eye_support, Renderer, RendererDescriptor};
use crate::config::Settings;
use crate::eyes::{Eye, EyeSelector, Rect, RenderTarget};
use crate::gles::{self, Gles};

pub const DESCRIPTOR: RendererDescriptor = RendererDescriptor {
    name: "gears",
    options: &[],
    new: new_renderer,
};

const BOX_SIZE: i32 = 128;
/// Phase advance of the sideways drift, in radians per frame
const DRIFT_RATE: f64 = 0.02;

const BACKGROUND: [f32; 3] = [0.0, 0.0, 1.0];

fn eye_color(eye: Eye) -> [f32; 3] {
    match eye {
        Eye::Left => [1.0, 0.0, 0.0],
        Eye::Right => [0.0, 1.0, 0.0],
    }
}

/// Centre of `eye`'s box in an area of the given size
pub fn box_centre(eye: Eye, width: i32, height: i32, frame: u64) -> (i32, i32) {
    let drift = ((frame as f64 * DRIFT_RATE).sin() * (width / 4) as f64) as i32;
    let offset = match eye {
        Eye::Left => -BOX_SIZE * 3 / 8,
        Eye::Right => BOX_SIZE * 3 / 8,
    };
    (width / 2 + drift + offset, height / 2)
}

/// Box centred on (x, y), cut off at the bottom-left edges
pub fn clip_box(x: i32, y: i32) -> Option<Rect> {
    let (x, width) = clip_axis(x - BOX_SIZE / 2);
    let (y, height) = clip_axis(y - BOX_SIZE / 2);
    (width > 0 && height > 0).then(|| Rect::new(x, y, width, height))
}

fn clip_axis(start: i32) -> (i32, i32) {
    if start < 0 {
        (0, BOX_SIZE + start)
    } else {
        (start, BOX_SIZE)
    }
}

struct Connected {
    gl: Rc<Gles>,
    eyes: EyeSelector,
}

pub struct GearsRenderer {
    state: Option<Connected>,
}

fn new_renderer(_settings: &Settings) -> Box<dyn Renderer> {
    Box::new(GearsRenderer { state: None })
}

impl Renderer for GearsRenderer {
    fn connect(&mut self, target: &RenderTarget) -> Result<()> {
        check_eye_support(&target.gl, target.eyes)?;
        self.state = Some(Connected {
            gl: target.gl.clone(),
            eyes: EyeSelector::new(target),
        });
        Ok(())
    }

    fn draw_frame(&mut self, frame: u64) {
        let Some(Connected { gl, eyes }) = &self.state else {
            return;
        };

        gl.enable(gles::SCISSOR_TEST);

        for eye in Eye::BOTH {
            let area = eyes.select(eye);

            let [r, g, b] = BACKGROUND;
            gl.scissor(area.x, area.y, area.width, area.height);
            gl.clear_color(r, g, b, 0.0);
            gl.clear(gles::COLOR_BUFFER_BIT);

            let (x, y) = box_centre(eye, area.width, area.height, frame);
            let Some(rect) = clip_box(x, y)
                .map(|r| Rect::new(r.x + area.x, r.y + area.y, r.width, r.height))
                .and_then(|r| r.intersect(&area))
            else {
                continue;
            };

            let [r, g, b] = eye_color(eye);
            gl.scissor(rect.x, rect.y, rect.width, rect.height);
            gl.clear_color(r, g, b, 0.0);
            gl.clear(gles::COLOR_BUFFER_BIT);
        }

        gl.disable(gles::SCISSOR_TEST);
    }

    fn resize(&mut self, width: i32, height: i32) {
        if let Some(state) = &mut self.state {
            state.eyes.resize(width, height);
        }
    }
}
