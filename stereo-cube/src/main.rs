//! stereo-cube - stereoscopic multiview rendering demos
//!
//! Picks a window system (`-w`) and a renderer (`-r`), feeds them the rest of
//! the command line and draws both eyes until interrupted.

mod cli;
mod config;
mod driver;
mod egl;
mod eyes;
mod gles;
mod quit;
mod registry;
mod renderer;
mod winsys;

use std::path::PathBuf;

use anyhow::Result;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::UsageError;
use config::Settings;
use driver::{Driver, Outcome};
use quit::QuitToken;
use renderer::RENDERERS;
use winsys::WINSYSES;

fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {}", panic_info);
        error!("PANIC: {}", panic_info);
    }));

    // ~/.local/state/stereo-cube, or /tmp/stereo-cube
    let log_dir = std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".local/state")))
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("stereo-cube");

    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = rolling::daily(&log_dir, "stereo-cube.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,stereo_cube=info,stereo_kms=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let settings = Settings::load();
    let driver = Driver::new(&WINSYSES, &RENDERERS, &settings);
    let grammar = driver.grammar();

    let outcome = cli::parse(&grammar, std::env::args_os())
        .map_err(anyhow::Error::from)
        .and_then(|events| driver.configure(events));

    let session = match outcome {
        Ok(Outcome::Help) => {
            print!("{}", cli::usage(&WINSYSES, &RENDERERS));
            return Ok(());
        }
        Ok(Outcome::List) => {
            print!("{}", cli::listing(&WINSYSES, &RENDERERS));
            return Ok(());
        }
        Ok(Outcome::Run(session)) => session,
        Err(e) => {
            if e.downcast_ref::<UsageError>().is_some() {
                eprint!("{}", cli::usage(&WINSYSES, &RENDERERS));
            }
            return Err(e);
        }
    };

    info!(log_path = %log_dir.display(), "stereo-cube starting");
    session.run(&QuitToken::new())
}
