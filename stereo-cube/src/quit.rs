//! Quit token and SIGINT bridge
//!
//! Run loops take a [`QuitToken`] and poll it once per frame boundary. While a
//! loop runs, an [`InterruptGuard`] turns SIGINT into a quit request, whichever
//! thread the kernel delivers it to, and makes a wakeup socket readable so
//! blocking waits can notice. The frame in progress still completes. A second
//! SIGINT after the first one terminates the process.

use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use signal_hook::consts::SIGINT;
use signal_hook::SigId;
use tracing::{info, warn};

/// Shared flag asking a run loop to stop
#[derive(Debug, Clone, Default)]
pub struct QuitToken(Arc<AtomicBool>);

impl QuitToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something a run loop asks between frames whether it should stop
pub trait QuitWatch {
    fn should_quit(&mut self) -> bool;
}

impl QuitWatch for QuitToken {
    fn should_quit(&mut self) -> bool {
        self.is_requested()
    }
}

/// Routes SIGINT into a quit token for as long as it lives
///
/// The handler actions are unregistered on drop.
pub struct InterruptGuard {
    token: QuitToken,
    wakeup: UnixStream,
    actions: Vec<SigId>,
}

impl InterruptGuard {
    pub fn install(token: &QuitToken) -> Result<Self> {
        let (wakeup, notifier) = UnixStream::pair().context("Failed to create SIGINT wakeup socket")?;
        wakeup
            .set_nonblocking(true)
            .context("Failed to make SIGINT wakeup socket non-blocking")?;
        notifier
            .set_nonblocking(true)
            .context("Failed to make SIGINT wakeup socket non-blocking")?;

        let mut guard = Self {
            token: token.clone(),
            wakeup,
            actions: Vec::with_capacity(3),
        };

        // Actions run in registration order, so the terminate check sees the
        // token as it was before this signal
        let flag = Arc::clone(&token.0);
        guard.actions.push(
            signal_hook::flag::register_conditional_default(SIGINT, Arc::clone(&flag))
                .context("Failed to register SIGINT handler")?,
        );
        guard
            .actions
            .push(signal_hook::flag::register(SIGINT, flag).context("Failed to register SIGINT handler")?);
        guard.actions.push(
            signal_hook::low_level::pipe::register(SIGINT, notifier)
                .context("Failed to register SIGINT wakeup")?,
        );

        Ok(guard)
    }

    fn drain(&mut self) {
        let mut buf = [0u8; 16];
        loop {
            match self.wakeup.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => info!("Interrupt received, quitting after this frame"),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Failed to read SIGINT wakeup socket: {}", e);
                    break;
                }
            }
        }
    }
}

/// Readable while a SIGINT is waiting to be drained
impl AsFd for InterruptGuard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.wakeup.as_fd()
    }
}

impl QuitWatch for InterruptGuard {
    fn should_quit(&mut self) -> bool {
        self.drain();
        self.token.is_requested()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        for id in self.actions.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Run `frame` until `watch` asks to stop, returning the number of frames run
///
/// The watch is consulted before every frame, never during one.
pub fn run_frames<W, F>(watch: &mut W, mut frame: F) -> Result<u64>
where
    W: QuitWatch + ?Sized,
    F: FnMut() -> Result<()>,
{
    let mut frames = 0;
    while !watch.should_quit() {
        frame()?;
        frames += 1;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = QuitToken::new();
        let other = token.clone();
        assert!(!token.is_requested());
        other.request();
        assert!(token.is_requested());
    }

    #[test]
    fn test_quit_completes_frame_in_progress() {
        let mut token = QuitToken::new();
        let requester = token.clone();
        let mut steps = Vec::new();
        let mut n = 0;

        let frames = run_frames(&mut token, || {
            n += 1;
            steps.push(format!("draw {}", n));
            if n == 3 {
                requester.request();
            }
            steps.push(format!("present {}", n));
            Ok(())
        })
        .unwrap();

        assert_eq!(frames, 3);
        assert_eq!(steps.last().map(String::as_str), Some("present 3"));
        assert_eq!(steps.len(), 6);
    }

    #[test]
    fn test_requested_before_loop_runs_nothing() {
        let mut token = QuitToken::new();
        token.request();
        let frames = run_frames(&mut token, || panic!("no frame expected")).unwrap();
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_frame_error_stops_loop() {
        let mut token = QuitToken::new();
        let result = run_frames(&mut token, || anyhow::bail!("device lost"));
        assert!(result.is_err());
    }

    #[test]
    fn test_process_sigint_becomes_quit_request() {
        // A second thread the kernel may pick to deliver the signal to
        let (stop, stopped) = mpsc::channel::<()>();
        let helper = thread::spawn(move || {
            let _ = stopped.recv();
        });

        let token = QuitToken::new();
        let mut guard = InterruptGuard::install(&token).unwrap();
        assert!(!guard.should_quit());

        kill(Pid::this(), Signal::SIGINT).unwrap();

        // Delivery is asynchronous; the wakeup socket turns readable once the
        // handler has run on some thread
        {
            let mut fds = [PollFd::new(guard.as_fd(), PollFlags::POLLIN)];
            let ready = loop {
                match poll(&mut fds, PollTimeout::from(5000u16)) {
                    Err(Errno::EINTR) => continue,
                    other => break other.unwrap(),
                }
            };
            assert_eq!(ready, 1);
        }

        let ran = run_frames(&mut guard, || Ok(())).unwrap();
        assert_eq!(ran, 0);
        assert!(token.is_requested());

        drop(guard);
        stop.send(()).unwrap();
        helper.join().unwrap();
    }
}
