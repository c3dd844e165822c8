// keymouse: move, click and scroll the mouse pointer from the keyboard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use keymouse::cli::Args;
use keymouse::logging::init_logging;
use keymouse::startup::{launch, write_default_settings};
use keymouse_input::{PointerTracker, RdevHookBackend, RdevPointerBackend, TickSource};
use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};

const SIGNAL_POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.write_default_config {
        return write_default_settings(&args.config);
    }

    info!("keymouse starting");
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, term.clone())?;
    signal_hook::flag::register(SIGTERM, term.clone())?;

    // The hook sees real pointer motion; the pointer backend needs it for positions.
    let tracker = PointerTracker::new();
    let app = launch(
        &args,
        RdevHookBackend::new(tracker.clone()),
        RdevPointerBackend::new(tracker),
        TickSource::default(),
    )?;

    while !term.load(Ordering::Relaxed) {
        thread::sleep(SIGNAL_POLL);
    }
    info!("Termination requested");
    app.shutdown();
    Ok(())
}
