//! Startup sequence shared by the binary and its tests.
//!
//! Loads settings, wires the store to the engine, starts the file watcher
//! and installs the keyboard hook. Platform backends are passed in so the
//! whole sequence runs against virtual backends in tests.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use keymouse_config::{Settings, SettingsStore, SettingsWatcher};
use keymouse_input::{
    ActivationState, HookBackend, HookError, InputEngine, KeyboardHook, PointerBackend, TickSource,
};
use log::{info, warn};

use crate::cli::Args;

/// Delay between hook attempts while waiting for input monitoring permission.
pub const PERMISSION_RETRY: Duration = Duration::from_secs(2);

/// Read settings, falling back to defaults when the file is missing or broken.
pub fn load_settings(path: &Path) -> Settings {
    match Settings::read(path) {
        Ok(settings) => {
            info!("Loaded settings from {}", path.display());
            settings
        }
        Err(e) if path.exists() => {
            warn!("Could not read {}: {e:#}; using defaults", path.display());
            Settings::default()
        }
        Err(_) => {
            info!("{} not found, using defaults", path.display());
            Settings::default()
        }
    }
}

pub fn write_default_settings(path: &Path) -> Result<()> {
    Settings::default()
        .write(path)
        .with_context(|| format!("writing default settings to {}", path.display()))?;
    info!("Wrote default settings to {}", path.display());
    Ok(())
}

/// Install the hook. With `wait`, a missing permission is retried every
/// `retry` until it is granted; any other failure is returned at once.
pub fn start_hook<H, P>(
    hook: &KeyboardHook<H>,
    engine: &InputEngine<P>,
    wait: bool,
    retry: Duration,
) -> Result<()>
where
    H: HookBackend,
    P: PointerBackend + 'static,
{
    loop {
        match hook.start(engine.hook_handler()) {
            Ok(()) => return Ok(()),
            Err(HookError::PermissionDenied(reason)) if wait => {
                warn!("Keyboard hook not permitted yet ({reason}), retrying in {retry:?}");
                thread::sleep(retry);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Everything that has to stay alive while the program runs.
pub struct App<H: HookBackend, P: PointerBackend> {
    // Field order is drop order: unhook first, then stop the engine.
    pub hook: KeyboardHook<H>,
    pub engine: InputEngine<P>,
    pub store: Arc<SettingsStore>,
    _watcher: SettingsWatcher,
}

impl<H: HookBackend, P: PointerBackend + 'static> App<H, P> {
    /// Unhook the keyboard and leave activated mode, releasing held buttons.
    pub fn shutdown(self) {
        self.hook.stop();
        self.engine.deactivate();
        info!("keymouse stopped");
    }
}

pub fn launch<H, P>(
    args: &Args,
    hook_backend: H,
    pointer: P,
    tick_source: TickSource,
) -> Result<App<H, P>>
where
    H: HookBackend,
    P: PointerBackend + 'static,
{
    let store = Arc::new(SettingsStore::new(load_settings(&args.config)));
    let engine = InputEngine::new(store.snapshot(), pointer, tick_source)?;

    // Held weakly; the store owns the engine through its reload subscriber.
    let status_store = Arc::downgrade(&store);
    engine.subscribe(move |state| match (state, status_store.upgrade()) {
        (ActivationState::Activated, Some(store)) => {
            info!("Pointer control on, {} to leave", store.snapshot().deactivate)
        }
        (ActivationState::Activated, None) => info!("Pointer control on"),
        (ActivationState::Deactivated, _) => info!("Pointer control off"),
    });

    let reload_engine = engine.clone();
    store.subscribe(move |settings| reload_engine.apply_settings(settings.clone()));

    let watcher = SettingsWatcher::spawn(args.config.clone(), store.clone(), args.reload_interval())?;

    let hook = KeyboardHook::new(hook_backend);
    start_hook(&hook, &engine, args.wait_for_permission, PERMISSION_RETRY)?;
    info!("Press {} to take over the pointer", store.snapshot().activate);

    Ok(App {
        hook,
        engine,
        store,
        _watcher: watcher,
    })
}
