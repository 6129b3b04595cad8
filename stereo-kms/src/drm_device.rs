//! DRM card with the stereo-3D client capability
//!
//! Wraps the card node in the `drm` crate's device traits. Output
//! preparation follows the usual KMS sequence: connector, mode, CRTC.

use crate::ffi::{self, GbmBoMode};
use crate::stereo::{self, StereoLayout};
use crate::{Error, Result};
use drm::buffer::{self, DrmFourcc};
use drm::control::{self, connector, crtc, framebuffer, Device as ControlDevice, Event, PageFlipFlags};
use drm::{ClientCapability, Device};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default card node
pub const DEFAULT_CARD: &str = "/dev/dri/card0";

/// Framebuffer wrapping a scanout buffer
pub type Framebuffer = framebuffer::Handle;

/// Which connector to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorSelector {
    FirstConnected,
    Id(u32),
}

/// A display mode as reported by the kernel
#[derive(Clone, Copy)]
pub struct Mode(control::Mode);

impl Mode {
    pub fn width(&self) -> u32 {
        self.0.size().0 as u32
    }

    pub fn height(&self) -> u32 {
        self.0.size().1 as u32
    }

    pub fn vrefresh(&self) -> u32 {
        self.0.vrefresh()
    }

    pub fn flags(&self) -> u32 {
        self.0.flags().bits()
    }

    /// Stereo layout, or `None` for layouts we cannot drive
    pub fn layout(&self) -> Option<StereoLayout> {
        StereoLayout::from_mode_flags(self.flags())
    }

    pub fn layout_name(&self) -> &'static str {
        stereo::describe_flags(self.flags())
    }

    pub fn name(&self) -> String {
        self.0.name().to_string_lossy().into_owned()
    }

    /// Timings for a GBM surface scanned out in this mode
    pub fn gbm_mode(&self) -> GbmBoMode {
        bo_mode(
            self.layout().unwrap_or(StereoLayout::None),
            self.0.size(),
            self.0.hsync(),
            self.0.vsync(),
        )
    }
}

impl std::fmt::Debug for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@{} ({})",
            self.width(),
            self.height(),
            self.vrefresh(),
            self.layout_name()
        )
    }
}

/// `(hdisplay, vdisplay)` plus `(start, end, total)` sync timings to GBM's layout
fn bo_mode(layout: StereoLayout, size: (u16, u16), hsync: (u16, u16, u16), vsync: (u16, u16, u16)) -> GbmBoMode {
    GbmBoMode {
        layout: layout.gbm_layout(),
        hdisplay: size.0 as u32,
        hsync_start: hsync.0 as u32,
        hsync_end: hsync.1 as u32,
        htotal: hsync.2 as u32,
        vdisplay: size.1 as u32,
        vsync_start: vsync.0 as u32,
        vsync_end: vsync.1 as u32,
        vtotal: vsync.2 as u32,
        format: ffi::GBM_BO_FORMAT_XRGB8888,
    }
}

/// DRM connector info
#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub id: u32,
    pub connected: bool,
    pub modes: Vec<Mode>,
    handle: Option<connector::Handle>,
    current_crtc: Option<u32>,
    /// CRTCs any of the connector's encoders can drive, in encoder order
    possible_crtcs: Vec<u32>,
}

/// CRTC configuration captured before we take over the display
#[derive(Debug, Clone, Copy)]
pub struct SavedCrtc {
    pub crtc_id: u32,
    handle: crtc::Handle,
    framebuffer: Option<framebuffer::Handle>,
    position: (u32, u32),
    mode: Option<control::Mode>,
}

/// Connector, mode and CRTC chosen for scanout
#[derive(Debug, Clone)]
pub struct Output {
    pub connector_id: u32,
    pub crtc_id: u32,
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
}

impl Output {
    pub fn mode(&self) -> &Mode {
        &self.mode
    }
}

/// Locked GBM buffer as the kernel sees it
struct ScanoutBuffer {
    size: (u32, u32),
    pitch: u32,
    handle: buffer::Handle,
}

impl buffer::Buffer for ScanoutBuffer {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> DrmFourcc {
        DrmFourcc::Xrgb8888
    }

    fn pitch(&self) -> u32 {
        self.pitch
    }

    fn handle(&self) -> buffer::Handle {
        self.handle
    }
}

/// The card node, seen through the `drm` device traits
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

/// An open DRM card
pub struct DrmDevice {
    card: Card,
    path: PathBuf,
}

impl DrmDevice {
    /// Open `path` and enable stereo 3D mode flags
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.display().to_string(),
                source,
            })?;
        let card = Card(file);

        card.set_client_capability(ClientCapability::Stereo3D, true)
            .map_err(|e| Error::Unsupported(format!("error setting stereo client cap: {}", e)))?;

        info!(path = %path.display(), "Opened DRM device with stereo 3D enabled");

        Ok(Self {
            card,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connector(&self, resources: &control::ResourceHandles, handle: connector::Handle) -> Option<ConnectorInfo> {
        let info = match self.card.get_connector(handle, false) {
            Ok(info) => info,
            Err(e) => {
                warn!("cannot retrieve DRM connector {:?}: {}", handle, e);
                return None;
            }
        };

        let current_crtc = info
            .current_encoder()
            .and_then(|enc| self.card.get_encoder(enc).ok())
            .and_then(|enc| enc.crtc())
            .map(u32::from);

        let possible_crtcs = info
            .encoders()
            .iter()
            .filter_map(|&enc| self.card.get_encoder(enc).ok())
            .flat_map(|enc| resources.filter_crtcs(enc.possible_crtcs()))
            .map(u32::from)
            .collect();

        Some(ConnectorInfo {
            id: u32::from(handle),
            connected: info.state() == connector::State::Connected,
            modes: info.modes().iter().map(|&m| Mode(m)).collect(),
            handle: Some(handle),
            current_crtc,
            possible_crtcs,
        })
    }

    /// Every connector on the card, in resource order
    pub fn connectors(&self) -> Result<Vec<ConnectorInfo>> {
        let resources = self
            .card
            .resource_handles()
            .map_err(Error::drm("cannot retrieve DRM resources"))?;
        Ok(resources
            .connectors()
            .iter()
            .filter_map(|&handle| self.connector(&resources, handle))
            .collect())
    }

    /// Choose the connector, mode and CRTC to scan out on
    pub fn prepare_output(&self, selector: ConnectorSelector, wanted: Option<StereoLayout>) -> Result<Output> {
        let connectors = self.connectors()?;
        let conn = select_connector(&connectors, selector)?;

        let flags: Vec<u32> = conn.modes.iter().map(Mode::flags).collect();
        let mode = stereo::choose_mode(&flags, wanted)
            .map(|index| conn.modes[index])
            .ok_or(Error::NoMode(conn.id))?;

        info!(
            "mode for connector {} is {}x{} ({})",
            conn.id,
            mode.width(),
            mode.height(),
            mode.layout_name()
        );

        let crtc_id = pick_crtc(conn.current_crtc, &conn.possible_crtcs).ok_or(Error::NoCrtc(conn.id))?;
        let crtc = control::from_u32(crtc_id).ok_or(Error::NoCrtc(conn.id))?;
        let connector = conn.handle.ok_or(Error::NoConnector(conn.id))?;

        debug!(connector = conn.id, crtc = crtc_id, "Prepared output");

        Ok(Output {
            connector_id: conn.id,
            crtc_id,
            connector,
            crtc,
            mode,
        })
    }

    /// Wrap a buffer object in a framebuffer
    pub fn add_framebuffer(&self, width: u32, height: u32, stride: u32, handle: u32) -> Result<Framebuffer> {
        let handle = control::from_u32(handle).ok_or_else(|| Error::Gbm("buffer has no handle".into()))?;
        let buffer = ScanoutBuffer {
            size: (width, height),
            pitch: stride,
            handle,
        };
        self.card
            .add_framebuffer(&buffer, 24, 32)
            .map_err(Error::drm("failed to create fb"))
    }

    pub fn remove_framebuffer(&self, fb: Framebuffer) {
        if let Err(e) = self.card.destroy_framebuffer(fb) {
            warn!("failed to remove fb {:?}: {}", fb, e);
        }
    }

    /// Snapshot of a CRTC, used to restore the console on exit
    pub fn save_crtc(&self, output: &Output) -> Option<SavedCrtc> {
        let info = self.card.get_crtc(output.crtc).ok()?;
        Some(SavedCrtc {
            crtc_id: output.crtc_id,
            handle: info.handle(),
            framebuffer: info.framebuffer(),
            position: info.position(),
            mode: info.mode(),
        })
    }

    pub fn set_crtc(&self, output: &Output, fb: Framebuffer) -> Result<()> {
        self.card
            .set_crtc(output.crtc, Some(fb), (0, 0), &[output.connector], Some(output.mode.0))
            .map_err(Error::drm("failed to set mode"))
    }

    pub fn restore_crtc(&self, saved: &SavedCrtc, output: &Output) {
        if let Err(e) = self.card.set_crtc(
            saved.handle,
            saved.framebuffer,
            saved.position,
            &[output.connector],
            saved.mode,
        ) {
            warn!("failed to restore crtc {}: {}", saved.crtc_id, e);
        }
    }

    /// Queue a flip to `fb` with a completion event
    pub fn page_flip(&self, output: &Output, fb: Framebuffer) -> Result<()> {
        self.card
            .page_flip(output.crtc, fb, PageFlipFlags::EVENT, None)
            .map_err(Error::drm("failed to queue page flip"))
    }

    /// Block on the card until the flip queued on `output` completes
    pub fn wait_for_flip(&self, output: &Output) -> Result<()> {
        loop {
            let events = self
                .card
                .receive_events()
                .map_err(Error::drm("failed to read DRM events"))?;
            for event in events {
                if let Event::PageFlip(flip) = event {
                    if flip.crtc == output.crtc {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl AsFd for DrmDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.card.as_fd()
    }
}

/// Pick the connector to drive from `connectors`
pub fn select_connector(connectors: &[ConnectorInfo], selector: ConnectorSelector) -> Result<&ConnectorInfo> {
    match selector {
        ConnectorSelector::Id(id) => {
            let conn = connectors
                .iter()
                .find(|c| c.id == id)
                .ok_or(Error::NoConnector(id))?;
            if !conn.connected {
                return Err(Error::Disconnected(id));
            }
            Ok(conn)
        }
        ConnectorSelector::FirstConnected => connectors
            .iter()
            .find(|c| c.connected)
            .ok_or(Error::NoConnectedConnector),
    }
}

/// CRTC to use for a connector
///
/// Keeps the CRTC of the connector's current encoder when there is one,
/// otherwise the first CRTC any of its encoders can drive.
pub fn pick_crtc(current: Option<u32>, possible: &[u32]) -> Option<u32> {
    current
        .filter(|&id| id != 0)
        .or_else(|| possible.first().copied())
}
