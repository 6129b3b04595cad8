//! Stereo 3D scanout over DRM/KMS and GBM
//!
//! This library opens a DRM card with the stereo-3D client capability, picks
//! a connector, the best stereo mode it offers and a CRTC that can drive it,
//! and allocates GBM surfaces whose buffers carry a stereo layout.
//! KMS goes through the `drm` crate; libgbm is loaded at runtime because
//! stereo surfaces need an entry point upstream GBM does not have.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 stereo-cube gbm winsys                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       stereo-kms                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐ │
//! │  │ DRM Device  │  │ GBM Device  │  │ Stereo layouts      │ │
//! │  │ (modeset,   │  │ (stereo     │  │ (mode ranking,      │ │
//! │  │  page flip) │  │  surfaces)  │  │  layout names)      │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                drm crate ioctls / libgbm.so.1 (dlopen)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use stereo_kms::{ConnectorSelector, DrmDevice, GbmDevice};
//!
//! let drm = DrmDevice::open("/dev/dri/card0".as_ref())?;
//! let output = drm.prepare_output(ConnectorSelector::FirstConnected, None)?;
//! let gbm = GbmDevice::new(&drm)?;
//! let surface = gbm.create_stereo_surface(output.mode())?;
//! ```

pub mod drm_device;
pub mod error;
pub mod ffi;
pub mod gbm_device;
pub mod stereo;

pub use drm_device::{ConnectorSelector, DrmDevice, Framebuffer, Mode, Output};
pub use error::Error;
pub use gbm_device::{GbmDevice, GbmSurface};
pub use stereo::StereoLayout;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
