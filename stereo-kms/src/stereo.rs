//! Stereo 3D layouts carried in DRM mode flags
//!
//! A mode advertises at most one layout in `DRM_MODE_FLAG_3D_MASK`. When
//! several modes qualify, the one with the richest layout wins; ties keep the
//! earliest mode in the connector's list.

use crate::ffi::gbm_layout;
use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Stereo 3D bits of a mode's flags, from the kernel's `drm_mode.h`
pub const DRM_MODE_FLAG_3D_MASK: u32 = 0x1f << 14;
pub const DRM_MODE_FLAG_3D_NONE: u32 = 0 << 14;
pub const DRM_MODE_FLAG_3D_FRAME_PACKING: u32 = 1 << 14;
pub const DRM_MODE_FLAG_3D_FIELD_ALTERNATIVE: u32 = 2 << 14;
pub const DRM_MODE_FLAG_3D_LINE_ALTERNATIVE: u32 = 3 << 14;
pub const DRM_MODE_FLAG_3D_SIDE_BY_SIDE_FULL: u32 = 4 << 14;
pub const DRM_MODE_FLAG_3D_L_DEPTH: u32 = 5 << 14;
pub const DRM_MODE_FLAG_3D_L_DEPTH_GFX_GFX_DEPTH: u32 = 6 << 14;
pub const DRM_MODE_FLAG_3D_TOP_AND_BOTTOM: u32 = 7 << 14;
pub const DRM_MODE_FLAG_3D_SIDE_BY_SIDE_HALF: u32 = 8 << 14;

/// Layouts a stereo surface can be scanned out with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StereoLayout {
    None,
    FramePacking,
    LineAlternative,
    SideBySideFull,
    TopAndBottom,
    SideBySideHalf,
}

impl StereoLayout {
    pub const ALL: [StereoLayout; 6] = [
        StereoLayout::None,
        StereoLayout::FramePacking,
        StereoLayout::LineAlternative,
        StereoLayout::SideBySideFull,
        StereoLayout::TopAndBottom,
        StereoLayout::SideBySideHalf,
    ];

    /// Layout encoded in a mode's flags, if it is one we can drive
    pub fn from_mode_flags(flags: u32) -> Option<Self> {
        match flags & DRM_MODE_FLAG_3D_MASK {
            DRM_MODE_FLAG_3D_NONE => Some(StereoLayout::None),
            DRM_MODE_FLAG_3D_FRAME_PACKING => Some(StereoLayout::FramePacking),
            DRM_MODE_FLAG_3D_LINE_ALTERNATIVE => Some(StereoLayout::LineAlternative),
            DRM_MODE_FLAG_3D_SIDE_BY_SIDE_FULL => Some(StereoLayout::SideBySideFull),
            DRM_MODE_FLAG_3D_TOP_AND_BOTTOM => Some(StereoLayout::TopAndBottom),
            DRM_MODE_FLAG_3D_SIDE_BY_SIDE_HALF => Some(StereoLayout::SideBySideHalf),
            _ => None,
        }
    }

    /// Name accepted on the command line
    pub fn short_name(self) -> &'static str {
        match self {
            StereoLayout::None => "none",
            StereoLayout::FramePacking => "fp",
            StereoLayout::LineAlternative => "la",
            StereoLayout::SideBySideFull => "sbsf",
            StereoLayout::TopAndBottom => "tb",
            StereoLayout::SideBySideHalf => "sbsh",
        }
    }

    /// Preference when choosing between modes, higher is better
    pub fn rank(self) -> u8 {
        match self {
            StereoLayout::None => 0,
            StereoLayout::LineAlternative => 1,
            StereoLayout::TopAndBottom => 2,
            StereoLayout::SideBySideHalf => 3,
            StereoLayout::SideBySideFull => 4,
            StereoLayout::FramePacking => 5,
        }
    }

    /// Buffer layout for a GBM surface scanned out in this mode
    ///
    /// A mono mode still gets two views, packed side by side at half width.
    pub fn gbm_layout(self) -> u32 {
        match self {
            StereoLayout::None | StereoLayout::SideBySideHalf => {
                gbm_layout::GBM_BO_STEREO_LAYOUT_SIDE_BY_SIDE_HALF
            }
            StereoLayout::FramePacking => gbm_layout::GBM_BO_STEREO_LAYOUT_FRAME_PACKING,
            StereoLayout::LineAlternative => gbm_layout::GBM_BO_STEREO_LAYOUT_LINE_ALTERNATIVE,
            StereoLayout::SideBySideFull => gbm_layout::GBM_BO_STEREO_LAYOUT_SIDE_BY_SIDE_FULL,
            StereoLayout::TopAndBottom => gbm_layout::GBM_BO_STEREO_LAYOUT_TOP_AND_BOTTOM,
        }
    }
}

impl FromStr for StereoLayout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StereoLayout::ALL
            .into_iter()
            .find(|layout| layout.short_name() == s)
            .ok_or_else(|| Error::UnknownLayout(s.to_string()))
    }
}

impl fmt::Display for StereoLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(describe_flags(self.mode_flags()))
    }
}

impl StereoLayout {
    fn mode_flags(self) -> u32 {
        match self {
            StereoLayout::None => DRM_MODE_FLAG_3D_NONE,
            StereoLayout::FramePacking => DRM_MODE_FLAG_3D_FRAME_PACKING,
            StereoLayout::LineAlternative => DRM_MODE_FLAG_3D_LINE_ALTERNATIVE,
            StereoLayout::SideBySideFull => DRM_MODE_FLAG_3D_SIDE_BY_SIDE_FULL,
            StereoLayout::TopAndBottom => DRM_MODE_FLAG_3D_TOP_AND_BOTTOM,
            StereoLayout::SideBySideHalf => DRM_MODE_FLAG_3D_SIDE_BY_SIDE_HALF,
        }
    }
}

/// Human readable name of the stereo bits in `flags`
pub fn describe_flags(flags: u32) -> &'static str {
    match flags & DRM_MODE_FLAG_3D_MASK {
        DRM_MODE_FLAG_3D_NONE => "none",
        DRM_MODE_FLAG_3D_FRAME_PACKING => "frame packing",
        DRM_MODE_FLAG_3D_FIELD_ALTERNATIVE => "field alternative",
        DRM_MODE_FLAG_3D_LINE_ALTERNATIVE => "line alternative",
        DRM_MODE_FLAG_3D_SIDE_BY_SIDE_FULL => "side by side full",
        DRM_MODE_FLAG_3D_L_DEPTH => "l depth",
        DRM_MODE_FLAG_3D_L_DEPTH_GFX_GFX_DEPTH => "l depth gfx gfx depth",
        DRM_MODE_FLAG_3D_TOP_AND_BOTTOM => "top and bottom",
        DRM_MODE_FLAG_3D_SIDE_BY_SIDE_HALF => "side by side half",
        _ => "unknown",
    }
}

/// Index of the mode to use given each mode's flags
///
/// With `wanted` set only modes of that layout qualify.
pub fn choose_mode(mode_flags: &[u32], wanted: Option<StereoLayout>) -> Option<usize> {
    let mut chosen: Option<(usize, u8)> = None;

    for (index, &flags) in mode_flags.iter().enumerate() {
        let Some(layout) = StereoLayout::from_mode_flags(flags) else {
            continue;
        };
        if wanted.is_some_and(|w| w != layout) {
            continue;
        }
        if chosen.map_or(true, |(_, rank)| layout.rank() > rank) {
            chosen = Some((index, layout.rank()));
        }
    }

    chosen.map(|(index, _)| index)
}
