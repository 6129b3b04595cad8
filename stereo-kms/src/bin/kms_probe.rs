//! Probe a DRM card for stereo 3D modes
//!
//! Usage: kms-probe [DEVICE] [LAYOUT]
//!
//! Lists every connector with its modes and stereo layouts, then shows which
//! output the gbm winsys would pick.

use stereo_kms::drm_device::{ConnectorSelector, DEFAULT_CARD};
use stereo_kms::{DrmDevice, GbmDevice, StereoLayout};
use std::path::PathBuf;

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let card = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_CARD));
    let wanted = match args.next().map(|name| name.parse::<StereoLayout>()) {
        Some(Ok(layout)) => Some(layout),
        Some(Err(e)) => {
            println!("{}", e);
            std::process::exit(1);
        }
        None => None,
    };

    println!("=== Stereo mode probe: {} ===\n", card.display());

    let drm = match DrmDevice::open(&card) {
        Ok(d) => d,
        Err(e) => {
            println!("Failed to open DRM device: {}", e);
            std::process::exit(1);
        }
    };

    let connectors = match drm.connectors() {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to list connectors: {}", e);
            std::process::exit(1);
        }
    };

    for conn in &connectors {
        println!(
            "Connector {} ({}), {} modes",
            conn.id,
            if conn.connected { "connected" } else { "disconnected" },
            conn.modes.len()
        );
        for mode in &conn.modes {
            let usable = if mode.layout().is_some() { "" } else { "  [unsupported]" };
            println!(
                "    {:<12} {}x{}@{}  {}{}",
                mode.name(),
                mode.width(),
                mode.height(),
                mode.vrefresh(),
                mode.layout_name(),
                usable
            );
        }
    }

    println!("\n--- Output selection ---");
    match drm.prepare_output(ConnectorSelector::FirstConnected, wanted) {
        Ok(output) => {
            println!("  Connector: {}", output.connector_id);
            println!("  CRTC:      {}", output.crtc_id);
            println!("  Mode:      {:?}", output.mode());
        }
        Err(e) => println!("  No usable output: {}", e),
    }

    println!("\n--- GBM ---");
    match GbmDevice::new(&drm) {
        Ok(gbm) => {
            if gbm.supports_stereo() {
                println!("  gbm_surface_create_with_mode available");
            } else {
                println!("  GBM lacks gbm_surface_create_with_mode, stereo scanout unavailable");
            }
        }
        Err(e) => println!("  Failed to create GBM device: {}", e),
    }
}
