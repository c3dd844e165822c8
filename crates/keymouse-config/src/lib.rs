// Settings model (motion tunables, key bindings) and the shared settings store

pub mod key_code;
pub mod settings;
pub mod store;

pub use key_code::{KeyBinding, KeyCode, Modifiers};
pub use settings::{MotionSettings, Settings};
pub use store::{SettingsStore, SettingsWatcher, SubscriptionId};
