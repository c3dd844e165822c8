//! Shared, read-mostly settings snapshot with change notification.
//!
//! Readers take an `Arc<Settings>` and keep it for as long as they need a
//! consistent view. Writers never mutate a published snapshot; `replace`
//! swaps in a new one and then notifies subscribers outside of any lock.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::settings::Settings;

type Listener = Arc<dyn Fn(&Arc<Settings>) + Send + Sync>;

/// Handle returned by [`SettingsStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl SettingsStore {
    pub fn new(mut settings: Settings) -> Self {
        settings.validate();
        Self {
            current: RwLock::new(Arc::new(settings)),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// Validate and publish `settings`. Subscribers run only when the
    /// validated value differs from the current snapshot.
    pub fn replace(&self, mut settings: Settings) -> bool {
        settings.validate();
        let published = {
            let mut current = self.current.write();
            if **current == settings {
                return false;
            }
            let next = Arc::new(settings);
            *current = next.clone();
            next
        };

        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        debug!("Settings changed, notifying {} subscriber(s)", listeners.len());
        for listener in listeners {
            listener(&published);
        }
        true
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Arc<Settings>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

/// Background poller that reloads a settings file into a [`SettingsStore`]
/// whenever its modification time changes.
pub struct SettingsWatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SettingsWatcher {
    pub fn spawn(path: PathBuf, store: Arc<SettingsStore>, interval: Duration) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        let mut last_modified = modified_time(&path);

        let handle = thread::Builder::new()
            .name("keymouse-settings-watch".to_string())
            .spawn(move || {
                while running_clone.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if !running_clone.load(Ordering::Acquire) {
                        break;
                    }
                    reload_if_modified(&path, &mut last_modified, &store);
                }
            })?;

        info!("Watching settings file for changes");
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SettingsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn modified_time(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Returns `true` when a changed file was read and published.
fn reload_if_modified(
    path: &std::path::Path,
    last_modified: &mut Option<SystemTime>,
    store: &SettingsStore,
) -> bool {
    let modified = modified_time(path);
    if modified.is_none() || modified == *last_modified {
        return false;
    }
    *last_modified = modified;

    match Settings::read(path) {
        Ok(settings) => {
            let changed = store.replace(settings);
            if changed {
                info!("Reloaded settings from {}", path.display());
            }
            changed
        }
        Err(e) => {
            warn!("Ignoring unreadable settings file {}: {e}", path.display());
            false
        }
    }
}
