//! Stereo in an xdg toplevel
//!
//! With `EGL_EXT_multiview_window` the window surface gets two views and the
//! compositor decides how to show them. Without it the window is a plain
//! surface and the eyes are drawn side by side.
//!
//! Frames are paced by `wl_surface.frame` callbacks. While waiting for one the
//! loop polls the display and the SIGINT wakeup socket together, so an interrupt
//! is noticed even if the compositor stops sending callbacks.

use std::ffi::c_void;
use std::os::fd::{AsFd, BorrowedFd};
use std::ptr::NonNull;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use khronos_egl as egl;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, warn};
use wayland_client::{
    protocol::{wl_callback, wl_compositor, wl_registry, wl_surface},
    Connection, Dispatch, EventQueue, Proxy, QueueHandle,
};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_sys::egl::{wl_egl_window, WaylandEgl};

use super::{FrameCallbacks, Winsys, WinsysDescriptor};
use crate::config::Settings;
use crate::egl::{EglDisplay, EglWindow, MULTIVIEW_WINDOW_EXTENSION, STEREO_SURFACE_ATTRIBS};
use crate::eyes::{EyeTarget, RenderTarget, SplitLayout};
use crate::quit::{run_frames, InterruptGuard, QuitToken};

pub const DESCRIPTOR: WinsysDescriptor = WinsysDescriptor {
    name: "wayland",
    options: &[],
    new: new_winsys,
};

const APP_ID: &str = "stereo-cube";

/// Size from a toplevel configure; zero means we pick
fn configured_size(width: i32, height: i32) -> Option<(i32, i32)> {
    (width > 0 && height > 0).then_some((width, height))
}

#[derive(Default)]
struct WaylandState {
    compositor: Option<wl_compositor::WlCompositor>,
    wm_base: Option<xdg_wm_base::XdgWmBase>,
    configured: bool,
    /// Size from the last toplevel configure, waiting for its ack
    proposed: Option<(i32, i32)>,
    /// Acked size the window has not been resized to yet
    resize: Option<(i32, i32)>,
    frame_done: bool,
    closed: bool,
}

/// `wl_egl_window` wrapping our surface, destroyed on drop
struct NativeWindow {
    api: &'static WaylandEgl,
    raw: NonNull<wl_egl_window>,
}

impl NativeWindow {
    fn new(surface: &wl_surface::WlSurface, width: i32, height: i32) -> Result<Self> {
        let api = wayland_sys::egl::wayland_egl_option()
            .ok_or_else(|| anyhow!("libwayland-egl is not available"))?;
        let raw = unsafe { (api.wl_egl_window_create)(surface.id().as_ptr(), width, height) };
        let raw = NonNull::new(raw).ok_or_else(|| anyhow!("Failed to create wl_egl_window"))?;
        Ok(Self { api, raw })
    }

    fn as_ptr(&self) -> *mut c_void {
        self.raw.as_ptr() as *mut c_void
    }

    fn resize(&self, width: i32, height: i32) {
        unsafe { (self.api.wl_egl_window_resize)(self.raw.as_ptr(), width, height, 0, 0) };
    }
}

impl Drop for NativeWindow {
    fn drop(&mut self) {
        unsafe { (self.api.wl_egl_window_destroy)(self.raw.as_ptr()) };
    }
}

/// Surface plus its xdg roles, destroyed on drop
struct Toplevel {
    surface: wl_surface::WlSurface,
    xdg_surface: xdg_surface::XdgSurface,
    toplevel: xdg_toplevel::XdgToplevel,
}

impl Drop for Toplevel {
    fn drop(&mut self) {
        self.toplevel.destroy();
        self.xdg_surface.destroy();
        self.surface.destroy();
    }
}

/// Everything acquired by `connect`, released in field order
struct Connected {
    window: EglWindow,
    native: NativeWindow,
    toplevel: Toplevel,
    _display: EglDisplay,
    state: WaylandState,
    queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    size: (i32, i32),
    _conn: Connection,
}

impl Connected {
    /// Block until the compositor wants the next frame, the window is closed
    /// or a signal is waiting on `signal_fd`
    fn wait_for_frame(&mut self, signal_fd: BorrowedFd<'_>) -> Result<()> {
        while !self.state.frame_done && !self.state.closed {
            self.queue.flush()?;
            if self.queue.dispatch_pending(&mut self.state)? > 0 {
                continue;
            }

            let Some(guard) = self.queue.prepare_read() else {
                continue;
            };

            let mut fds = [
                PollFd::new(guard.connection_fd(), PollFlags::POLLIN),
                PollFd::new(signal_fd, PollFlags::POLLIN),
            ];

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(anyhow!("Poll error: {}", e)),
            }

            let readable = |fd: &PollFd| fd.revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
            let display_ready = readable(&fds[0]);
            let signal_ready = readable(&fds[1]);

            if display_ready {
                guard.read().context("Failed to read Wayland events")?;
            }
            if signal_ready {
                // The run loop drains the signal and stops
                break;
            }
        }
        Ok(())
    }

    fn frame(&mut self, callbacks: &mut dyn FrameCallbacks, signal_fd: BorrowedFd<'_>) -> Result<()> {
        if let Some((width, height)) = self.state.resize.take() {
            if (width, height) != self.size {
                debug!("Resizing to {}x{}", width, height);
                self.native.resize(width, height);
                self.size = (width, height);
                callbacks.update_size(width, height);
            }
        }

        callbacks.draw();

        self.state.frame_done = false;
        self.toplevel.surface.frame(&self.qh, ());
        self.window.swap_buffers()?;

        self.wait_for_frame(signal_fd)
    }
}

pub struct WaylandWinsys {
    width: i32,
    height: i32,
    title: String,
    state: Option<Connected>,
}

fn new_winsys(settings: &Settings) -> Box<dyn Winsys> {
    Box::new(WaylandWinsys::new(settings))
}

impl WaylandWinsys {
    pub fn new(settings: &Settings) -> Self {
        Self {
            width: settings.wayland.width,
            height: settings.wayland.height,
            title: settings.wayland.title.clone(),
            state: None,
        }
    }
}

impl Winsys for WaylandWinsys {
    fn connect(&mut self) -> Result<RenderTarget> {
        let conn = Connection::connect_to_env().context("Failed to connect to Wayland display")?;
        let mut queue = conn.new_event_queue::<WaylandState>();
        let qh = queue.handle();
        let mut state = WaylandState::default();

        let _registry = conn.display().get_registry(&qh, ());
        queue.roundtrip(&mut state)?;

        let compositor = state
            .compositor
            .clone()
            .ok_or_else(|| anyhow!("Missing wl_compositor"))?;
        let wm_base = state
            .wm_base
            .clone()
            .ok_or_else(|| anyhow!("Missing xdg_wm_base"))?;

        let surface = compositor.create_surface(&qh, ());
        let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
        let toplevel = xdg_surface.get_toplevel(&qh, ());
        toplevel.set_title(self.title.clone());
        toplevel.set_app_id(APP_ID.to_string());
        let toplevel = Toplevel {
            surface,
            xdg_surface,
            toplevel,
        };

        toplevel.surface.commit();
        while !state.configured {
            queue.blocking_dispatch(&mut state)?;
        }
        let size = state.resize.take().unwrap_or((self.width, self.height));

        info!("Wayland: Surface configured at {}x{}", size.0, size.1);

        let display = EglDisplay::open(conn.backend().display_ptr() as *mut c_void)?;
        let multiview = display.has_extension(MULTIVIEW_WINDOW_EXTENSION);
        let config = display.choose_config()?;
        let native = NativeWindow::new(&toplevel.surface, size.0, size.1)?;

        let attribs: &[egl::Int] = if multiview {
            &STEREO_SURFACE_ATTRIBS
        } else {
            &[egl::NONE]
        };
        // `native` is stored after `window` and outlives it
        let window = unsafe { display.create_window(config, native.as_ptr(), attribs)? };

        let eyes = match window.view_count() {
            Ok(views) if multiview && views >= 2 => EyeTarget::Multiview,
            _ => {
                warn!(
                    "{} unavailable, drawing the eyes side by side",
                    MULTIVIEW_WINDOW_EXTENSION
                );
                EyeTarget::Split(SplitLayout::SideBySide)
            }
        };

        let gl = Rc::new(display.load_gles());

        self.state = Some(Connected {
            window,
            native,
            toplevel,
            _display: display,
            state,
            queue,
            qh,
            size,
            _conn: conn,
        });

        Ok(RenderTarget { gl, eyes })
    }

    fn main_loop(&mut self, callbacks: &mut dyn FrameCallbacks, quit: &QuitToken) -> Result<()> {
        let connected = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("wayland winsys is not connected"))?;
        let mut interrupt = InterruptGuard::install(quit)?;
        let wakeup = interrupt
            .as_fd()
            .try_clone_to_owned()
            .context("Failed to duplicate SIGINT wakeup socket")?;

        let (width, height) = connected.size;
        callbacks.update_size(width, height);

        let frames = run_frames(&mut interrupt, || {
            connected.frame(callbacks, wakeup.as_fd())?;
            if connected.state.closed {
                info!("Window closed");
                quit.request();
            }
            Ok(())
        })?;

        info!("Drew {} frames", frames);
        Ok(())
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global { name, interface, version } = event {
            match interface.as_str() {
                "wl_compositor" if state.compositor.is_none() => {
                    state.compositor =
                        Some(registry.bind::<wl_compositor::WlCompositor, _, _>(name, 1.min(version), qh, ()));
                }
                "xdg_wm_base" if state.wm_base.is_none() => {
                    state.wm_base =
                        Some(registry.bind::<xdg_wm_base::XdgWmBase, _, _>(name, 1.min(version), qh, ()));
                }
                _ => {}
            }
        }
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_compositor::WlCompositor,
        _: wl_compositor::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_surface::WlSurface,
        _: wl_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for WaylandState {
    fn event(
        _: &mut Self,
        wm_base: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ()> for WaylandState {
    fn event(
        state: &mut Self,
        xdg_surface: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            xdg_surface.ack_configure(serial);
            state.configured = true;
            if let Some(size) = state.proposed.take() {
                state.resize = Some(size);
            }
        }
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                if let Some(size) = configured_size(width, height) {
                    state.proposed = Some(size);
                }
            }
            xdg_toplevel::Event::Close => state.closed = true,
            _ => {}
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &wl_callback::WlCallback,
        event: wl_callback::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.frame_done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_size() {
        assert_eq!(configured_size(1280, 720), Some((1280, 720)));
        assert_eq!(configured_size(0, 0), None);
        assert_eq!(configured_size(640, 0), None);
        assert_eq!(configured_size(-1, 480), None);
    }

    #[test]
    fn test_size_from_settings() {
        let mut settings = Settings::default();
        settings.wayland.width = 1024;
        settings.wayland.title = "pair".into();
        let winsys = WaylandWinsys::new(&settings);
        assert_eq!((winsys.width, winsys.height), (1024, 600));
        assert_eq!(winsys.title, "pair");
    }

    #[test]
    fn test_takes_no_options() {
        let mut winsys = WaylandWinsys::new(&Settings::default());
        assert!(!winsys.handle_option('d', "/dev/dri/card0").unwrap());
        assert!(DESCRIPTOR.options.is_empty());
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
        let mut winsys = WaylandWinsys::new(&Settings::default());
        assert!(winsys.main_loop(&mut NoFrames, &QuitToken::new()).is_err());
    }
}
