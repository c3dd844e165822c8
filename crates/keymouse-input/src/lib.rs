// Keyboard-driven pointer control: hook, engine, movers, emitter, ticker

pub mod direction;
pub mod engine;
pub mod hook;
pub mod key_action;
pub mod mouse;
pub mod mover;
pub mod notifier;
#[cfg(feature = "rdev")]
pub mod rdev_backend;
pub mod ticker;

pub use direction::{Direction, DirectionStack};
pub use engine::{ActivationState, InputEngine, TickSource};
pub use hook::{
    DisableReason, HookBackend, HookDecision, HookError, HookEvent, HookHandler, KeyboardHook,
    VirtualHookBackend,
};
pub use key_action::KeyAction;
pub use mouse::{
    ButtonState, MotionKind, MouseButton, MouseController, Point, PointerBackend, PointerEvent,
    Rect, VirtualPointerBackend,
};
pub use mover::Mover;
pub use ticker::{TICK_INTERVAL, Ticker};
#[cfg(feature = "rdev")]
pub use rdev_backend::{PointerTracker, RdevHookBackend, RdevPointerBackend};
