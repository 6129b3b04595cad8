//! Addressing the left and right eye of a render target
//!
//! A multiview surface has one buffer per eye, picked with
//! `glDrawBuffersIndexedEXT`. A split surface is a single buffer with each eye
//! in its own half.

use std::rc::Rc;

use crate::gles::{self, Gles};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> i32 {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// How the two eyes share a single buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLayout {
    SideBySide,
    TopBottom,
}

/// How a renderer reaches each eye
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeTarget {
    Multiview,
    Split(SplitLayout),
}

/// Pixel rectangle with a bottom-left origin, as GL expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Overlap of two rectangles, `None` when they don't touch
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        (x1 > x0 && y1 > y0).then(|| Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

impl SplitLayout {
    /// Area of a `width` x `height` buffer that belongs to `eye`
    pub fn eye_rect(self, eye: Eye, width: i32, height: i32) -> Rect {
        match (self, eye) {
            (SplitLayout::SideBySide, Eye::Left) => Rect::new(0, 0, width / 2, height),
            (SplitLayout::SideBySide, Eye::Right) => Rect::new(width / 2, 0, width - width / 2, height),
            // GL rows count from the bottom, the left eye is on top
            (SplitLayout::TopBottom, Eye::Left) => Rect::new(0, height - height / 2, width, height / 2),
            (SplitLayout::TopBottom, Eye::Right) => Rect::new(0, 0, width, height - height / 2),
        }
    }
}

impl EyeTarget {
    /// Area each eye renders to in a drawable of the given size
    pub fn eye_rect(self, eye: Eye, width: i32, height: i32) -> Rect {
        match self {
            EyeTarget::Multiview => Rect::new(0, 0, width, height),
            EyeTarget::Split(layout) => layout.eye_rect(eye, width, height),
        }
    }

    /// Whether both eyes share one depth buffer area
    pub fn shares_depth(self) -> bool {
        matches!(self, EyeTarget::Multiview)
    }
}

/// What a winsys hands to a renderer once connected
#[derive(Clone)]
pub struct RenderTarget {
    pub gl: Rc<Gles>,
    pub eyes: EyeTarget,
}

/// Per-renderer eye switching plus the current drawable size
pub struct EyeSelector {
    gl: Rc<Gles>,
    target: EyeTarget,
    width: i32,
    height: i32,
}

impl EyeSelector {
    pub fn new(target: &RenderTarget) -> Self {
        Self {
            gl: target.gl.clone(),
            target: target.eyes,
            width: 0,
            height: 0,
        }
    }

    pub fn target(&self) -> EyeTarget {
        self.target
    }

    pub fn resize(&mut self, width: i32, height: i32) {
        self.width = width;
        self.height = height;
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn eye_rect(&self, eye: Eye) -> Rect {
        self.target.eye_rect(eye, self.width, self.height)
    }

    /// Direct rendering at `eye` and return the area it covers
    pub fn select(&self, eye: Eye) -> Rect {
        let area = self.eye_rect(eye);
        if self.target == EyeTarget::Multiview {
            let locations = [gles::MULTIVIEW_EXT];
            let indices = [eye.index()];
            unsafe {
                self.gl
                    .draw_buffers_indexed_ext(1, locations.as_ptr(), indices.as_ptr());
            }
        }
        self.gl.viewport(area.x, area.y, area.width, area.height);
        area
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_by_side_halves() {
        let l = SplitLayout::SideBySide.eye_rect(Eye::Left, 800, 600);
        let r = SplitLayout::SideBySide.eye_rect(Eye::Right, 800, 600);
        assert_eq!(l, Rect::new(0, 0, 400, 600));
        assert_eq!(r, Rect::new(400, 0, 400, 600));
    }

    #[test]
    fn test_odd_width_covers_every_column() {
        let l = SplitLayout::SideBySide.eye_rect(Eye::Left, 801, 600);
        let r = SplitLayout::SideBySide.eye_rect(Eye::Right, 801, 600);
        assert_eq!(l.width + r.width, 801);
        assert_eq!(l.x + l.width, r.x);
    }

    #[test]
    fn test_top_bottom_puts_left_eye_on_top() {
        let l = SplitLayout::TopBottom.eye_rect(Eye::Left, 800, 601);
        let r = SplitLayout::TopBottom.eye_rect(Eye::Right, 800, 601);
        assert_eq!(r, Rect::new(0, 0, 800, 301));
        assert_eq!(l, Rect::new(0, 301, 800, 300));
    }

    #[test]
    fn test_multiview_eyes_cover_everything() {
        for eye in Eye::BOTH {
            assert_eq!(EyeTarget::Multiview.eye_rect(eye, 1920, 1080), Rect::new(0, 0, 1920, 1080));
        }
        assert!(EyeTarget::Multiview.shares_depth());
        assert!(!EyeTarget::Split(SplitLayout::SideBySide).shares_depth());
    }

    #[test]
    fn test_intersect() {
        let a = Rect::new(0, 0, 100, 100);
        assert_eq!(a.intersect(&Rect::new(50, 50, 100, 100)), Some(Rect::new(50, 50, 50, 50)));
        assert_eq!(a.intersect(&Rect::new(-20, 10, 40, 10)), Some(Rect::new(0, 10, 20, 10)));
        assert_eq!(a.intersect(&Rect::new(100, 0, 10, 10)), None);
        assert_eq!(a.intersect(&Rect::new(10, 10, 0, 5)), None);
    }

    #[test]
    fn test_selector_tracks_size() {
        let target = RenderTarget {
            gl: Rc::new(Gles::unloaded()),
            eyes: EyeTarget::Split(SplitLayout::SideBySide),
        };
        let mut eyes = EyeSelector::new(&target);
        eyes.resize(640, 480);
        assert_eq!(eyes.size(), (640, 480));
        assert_eq!(eyes.select(Eye::Right), Rect::new(320, 0, 320, 480));
    }
}
