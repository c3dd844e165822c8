//! System-wide keyboard interception.
//!
//! `KeyboardHook` owns the hook lifecycle on top of a platform `HookBackend`.
//! Every key and modifier event is handed to a handler that decides whether
//! the event is swallowed or passed on. When the platform switches the hook
//! off (for instance because a callback overran its time budget) the layer
//! re-enables it on the spot, without involving the handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use keymouse_config::{KeyCode, Modifiers};
use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    /// The hook callback took too long.
    Timeout,
    /// Switched off by user input (e.g. secure input mode).
    UserInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    KeyDown { key: KeyCode, modifiers: Modifiers },
    KeyUp { key: KeyCode, modifiers: Modifiers },
    ModifiersChanged(Modifiers),
    Disabled(DisableReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    /// Swallow the event; no other application sees it.
    Consume,
    PassThrough,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("keyboard hook could not be installed, input monitoring permission is missing: {0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Callback installed into the platform backend.
pub type HookSink = Arc<dyn Fn(HookEvent) -> HookDecision + Send + Sync>;
/// Decision function for key and modifier events.
pub type HookHandler = Arc<dyn Fn(&HookEvent) -> HookDecision + Send + Sync>;

/// Platform seam for the global keyboard hook.
pub trait HookBackend: Send + Sync + 'static {
    /// Install the hook and route every event to `sink`.
    fn install(&self, sink: HookSink) -> Result<(), HookError>;
    /// Remove the hook. Events no longer reach the sink.
    fn uninstall(&self);
    /// Turn a hook the platform disabled back on.
    fn reenable(&self);
}

pub struct KeyboardHook<B: HookBackend> {
    backend: Arc<B>,
    installed: Mutex<bool>,
}

impl<B: HookBackend> KeyboardHook<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            installed: Mutex::new(false),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn is_installed(&self) -> bool {
        *self.installed.lock()
    }

    /// Install the hook. Succeeds immediately if it is already installed.
    pub fn start(&self, handler: HookHandler) -> Result<(), HookError> {
        let mut installed = self.installed.lock();
        if *installed {
            return Ok(());
        }

        let backend = Arc::downgrade(&self.backend);
        let sink: HookSink = Arc::new(move |event: HookEvent| match event {
            HookEvent::Disabled(reason) => {
                warn!("Keyboard hook disabled by the system ({reason:?}), re-enabling");
                if let Some(backend) = backend.upgrade() {
                    backend.reenable();
                }
                HookDecision::PassThrough
            }
            other => handler(&other),
        });

        self.backend.install(sink)?;
        *installed = true;
        info!("Keyboard hook installed");
        Ok(())
    }

    /// Remove the hook. Does nothing if it is not installed.
    pub fn stop(&self) {
        let mut installed = self.installed.lock();
        if *installed {
            self.backend.uninstall();
            *installed = false;
            info!("Keyboard hook removed");
        }
    }
}

impl<B: HookBackend> Drop for KeyboardHook<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct VirtualHookState {
    sink: Mutex<Option<HookSink>>,
    deny: AtomicBool,
    enabled: AtomicBool,
    installs: AtomicUsize,
    reenables: AtomicUsize,
}

/// Hook backend for testing: events are injected by hand.
#[derive(Clone, Default)]
pub struct VirtualHookBackend {
    state: Arc<VirtualHookState>,
}

impl VirtualHookBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `install` fail as it does without permission.
    pub fn deny_permission(&self, deny: bool) {
        self.state.deny.store(deny, Ordering::SeqCst);
    }

    /// Deliver an event. Returns `None` when no hook is installed.
    pub fn send(&self, event: HookEvent) -> Option<HookDecision> {
        let sink = self.state.sink.lock().clone()?;
        if !self.is_enabled() {
            return None;
        }
        Some(sink(event))
    }

    pub fn key_down(&self, key: KeyCode, modifiers: Modifiers) -> Option<HookDecision> {
        self.send(HookEvent::KeyDown { key, modifiers })
    }

    pub fn key_up(&self, key: KeyCode, modifiers: Modifiers) -> Option<HookDecision> {
        self.send(HookEvent::KeyUp { key, modifiers })
    }

    /// Switch the hook off the way the platform does and report it.
    pub fn disable(&self, reason: DisableReason) {
        self.state.enabled.store(false, Ordering::SeqCst);
        let sink = self.state.sink.lock().clone();
        if let Some(sink) = sink {
            sink(HookEvent::Disabled(reason));
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn install_count(&self) -> usize {
        self.state.installs.load(Ordering::SeqCst)
    }

    pub fn reenable_count(&self) -> usize {
        self.state.reenables.load(Ordering::SeqCst)
    }
}

impl HookBackend for VirtualHookBackend {
    fn install(&self, sink: HookSink) -> Result<(), HookError> {
        if self.state.deny.load(Ordering::SeqCst) {
            return Err(HookError::PermissionDenied("virtual backend denied".to_string()));
        }
        *self.state.sink.lock() = Some(sink);
        self.state.enabled.store(true, Ordering::SeqCst);
        self.state.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn uninstall(&self) {
        *self.state.sink.lock() = None;
        self.state.enabled.store(false, Ordering::SeqCst);
    }

    fn reenable(&self) {
        self.state.enabled.store(true, Ordering::SeqCst);
        self.state.reenables.fetch_add(1, Ordering::SeqCst);
    }
}
