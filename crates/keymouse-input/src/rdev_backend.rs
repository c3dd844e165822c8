//! Platform backends on top of `rdev`.
//!
//! `rdev::grab` gives a global, consuming keyboard tap, and `rdev::simulate`
//! posts pointer events. A few things the engine would like are not offered:
//!
//! - there is no pointer location query, so positions are tracked from the
//!   mouse-move events that pass through the grab;
//! - the grab loop cannot be torn down, so uninstalling only detaches the sink;
//! - the platform's timeout disable is handled inside `rdev` and never
//!   reported, so `reenable` has nothing to do;
//! - click counts and explicit drag event types cannot be set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use keymouse_config::{KeyCode, Modifiers};
use log::{debug, error};
use parking_lot::Mutex;
use rdev::{Button, Event, EventType, Key};

use crate::hook::{HookBackend, HookDecision, HookError, HookEvent, HookSink};
use crate::mouse::{ButtonState, MotionKind, MouseButton, Point, PointerBackend, Rect};

/// How long `install` waits for the grab to fail before assuming it is live.
const GRAB_START_WAIT: Duration = Duration::from_millis(250);

/// Last pointer location seen by the grab, or posted by us.
#[derive(Debug, Clone, Default)]
pub struct PointerTracker {
    position: Arc<Mutex<Option<Point>>>,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<Point> {
        *self.position.lock()
    }

    pub fn set(&self, position: Point) {
        *self.position.lock() = Some(position);
    }
}

#[derive(Default)]
struct GrabShared {
    sink: Mutex<Option<HookSink>>,
    modifiers: Mutex<Modifiers>,
    running: AtomicBool,
}

pub struct RdevHookBackend {
    shared: Arc<GrabShared>,
    tracker: PointerTracker,
}

impl RdevHookBackend {
    pub fn new(tracker: PointerTracker) -> Self {
        Self {
            shared: Arc::new(GrabShared::default()),
            tracker,
        }
    }

    fn spawn_grab(&self) -> Result<(), HookError> {
        let (err_tx, err_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();
        let tracker = self.tracker.clone();
        thread::Builder::new()
            .name("keymouse-hook".to_string())
            .spawn(move || {
                let callback_shared = shared.clone();
                let result = rdev::grab(move |event| on_event(&callback_shared, &tracker, event));
                shared.running.store(false, Ordering::SeqCst);
                if let Err(e) = result {
                    error!("Keyboard grab ended: {e:?}");
                    let _ = err_tx.send(format!("{e:?}"));
                }
            })
            .map_err(|e| HookError::Backend(e.into()))?;

        match err_rx.recv_timeout(GRAB_START_WAIT) {
            Ok(reason) => Err(HookError::PermissionDenied(reason)),
            Err(_) => Ok(()),
        }
    }
}

impl HookBackend for RdevHookBackend {
    fn install(&self, sink: HookSink) -> Result<(), HookError> {
        *self.shared.sink.lock() = Some(sink);
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("Keyboard grab already running, sink reattached");
            return Ok(());
        }
        if let Err(e) = self.spawn_grab() {
            *self.shared.sink.lock() = None;
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn uninstall(&self) {
        *self.shared.sink.lock() = None;
    }

    fn reenable(&self) {
        debug!("rdev re-arms its own tap, nothing to re-enable");
    }
}

fn on_event(shared: &GrabShared, tracker: &PointerTracker, event: Event) -> Option<Event> {
    let hook_event = match event.event_type {
        EventType::MouseMove { x, y } => {
            tracker.set(Point::new(x, y));
            return Some(event);
        }
        EventType::KeyPress(key) | EventType::KeyRelease(key) if is_modifier_key(key) => {
            let pressed = matches!(event.event_type, EventType::KeyPress(_));
            let mut modifiers = shared.modifiers.lock();
            update_modifiers(&mut modifiers, key, pressed);
            HookEvent::ModifiersChanged(*modifiers)
        }
        EventType::KeyPress(key) => match key_code(key) {
            Some(key) => HookEvent::KeyDown {
                key,
                modifiers: *shared.modifiers.lock(),
            },
            None => return Some(event),
        },
        EventType::KeyRelease(key) => match key_code(key) {
            Some(key) => HookEvent::KeyUp {
                key,
                modifiers: *shared.modifiers.lock(),
            },
            None => return Some(event),
        },
        _ => return Some(event),
    };

    let sink = shared.sink.lock().clone();
    match sink.map(|sink| sink(hook_event)) {
        Some(HookDecision::Consume) => None,
        _ => Some(event),
    }
}

fn is_modifier_key(key: Key) -> bool {
    matches!(
        key,
        Key::ControlLeft
            | Key::ControlRight
            | Key::Alt
            | Key::AltGr
            | Key::ShiftLeft
            | Key::ShiftRight
            | Key::MetaLeft
            | Key::MetaRight
    )
}

fn update_modifiers(modifiers: &mut Modifiers, key: Key, pressed: bool) {
    let flag = match key {
        Key::ControlLeft | Key::ControlRight => Modifiers::CONTROL,
        Key::Alt | Key::AltGr => Modifiers::ALT,
        Key::ShiftLeft | Key::ShiftRight => Modifiers::SHIFT,
        Key::MetaLeft | Key::MetaRight => Modifiers::META,
        _ => return,
    };
    modifiers.set(flag, pressed);
}

fn key_code(key: Key) -> Option<KeyCode> {
    let code = match key {
        Key::KeyA => KeyCode::A,
        Key::KeyB => KeyCode::B,
        Key::KeyC => KeyCode::C,
        Key::KeyD => KeyCode::D,
        Key::KeyE => KeyCode::E,
        Key::KeyF => KeyCode::F,
        Key::KeyG => KeyCode::G,
        Key::KeyH => KeyCode::H,
        Key::KeyI => KeyCode::I,
        Key::KeyJ => KeyCode::J,
        Key::KeyK => KeyCode::K,
        Key::KeyL => KeyCode::L,
        Key::KeyM => KeyCode::M,
        Key::KeyN => KeyCode::N,
        Key::KeyO => KeyCode::O,
        Key::KeyP => KeyCode::P,
        Key::KeyQ => KeyCode::Q,
        Key::KeyR => KeyCode::R,
        Key::KeyS => KeyCode::S,
        Key::KeyT => KeyCode::T,
        Key::KeyU => KeyCode::U,
        Key::KeyV => KeyCode::V,
        Key::KeyW => KeyCode::W,
        Key::KeyX => KeyCode::X,
        Key::KeyY => KeyCode::Y,
        Key::KeyZ => KeyCode::Z,
        Key::Num0 => KeyCode::Num0,
        Key::Num1 => KeyCode::Num1,
        Key::Num2 => KeyCode::Num2,
        Key::Num3 => KeyCode::Num3,
        Key::Num4 => KeyCode::Num4,
        Key::Num5 => KeyCode::Num5,
        Key::Num6 => KeyCode::Num6,
        Key::Num7 => KeyCode::Num7,
        Key::Num8 => KeyCode::Num8,
        Key::Num9 => KeyCode::Num9,
        Key::F1 => KeyCode::F1,
        Key::F2 => KeyCode::F2,
        Key::F3 => KeyCode::F3,
        Key::F4 => KeyCode::F4,
        Key::F5 => KeyCode::F5,
        Key::F6 => KeyCode::F6,
        Key::F7 => KeyCode::F7,
        Key::F8 => KeyCode::F8,
        Key::F9 => KeyCode::F9,
        Key::F10 => KeyCode::F10,
        Key::F11 => KeyCode::F11,
        Key::F12 => KeyCode::F12,
        Key::Space => KeyCode::Space,
        Key::Escape => KeyCode::Escape,
        Key::Return => KeyCode::Return,
        Key::Tab => KeyCode::Tab,
        Key::Backspace => KeyCode::Backspace,
        Key::Delete => KeyCode::Delete,
        Key::Insert => KeyCode::Insert,
        Key::Home => KeyCode::Home,
        Key::End => KeyCode::End,
        Key::PageUp => KeyCode::PageUp,
        Key::PageDown => KeyCode::PageDown,
        Key::UpArrow => KeyCode::Up,
        Key::DownArrow => KeyCode::Down,
        Key::LeftArrow => KeyCode::Left,
        Key::RightArrow => KeyCode::Right,
        Key::BackQuote => KeyCode::Grave,
        Key::Minus => KeyCode::Minus,
        Key::Equal => KeyCode::Equal,
        Key::LeftBracket => KeyCode::LeftBracket,
        Key::RightBracket => KeyCode::RightBracket,
        Key::BackSlash => KeyCode::Backslash,
        Key::SemiColon => KeyCode::Semicolon,
        Key::Quote => KeyCode::Quote,
        Key::Comma => KeyCode::Comma,
        Key::Dot => KeyCode::Period,
        Key::Slash => KeyCode::Slash,
        Key::CapsLock => KeyCode::CapsLock,
        Key::Unknown(code) => KeyCode::Other(code),
        _ => return None,
    };
    Some(code)
}

pub struct RdevPointerBackend {
    tracker: PointerTracker,
}

impl RdevPointerBackend {
    pub fn new(tracker: PointerTracker) -> Self {
        Self { tracker }
    }
}

fn simulate(event_type: &EventType) -> Result<()> {
    rdev::simulate(event_type).map_err(|e| anyhow!("simulate {event_type:?} failed: {e:?}"))
}

fn rdev_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
    }
}

impl PointerBackend for RdevPointerBackend {
    fn cursor_position(&self) -> Option<Point> {
        // Until the pointer has been seen, start from the middle of the main display.
        self.tracker
            .position()
            .or_else(|| self.display_bounds().first().map(Rect::center))
    }

    fn display_bounds(&self) -> Vec<Rect> {
        match rdev::display_size() {
            Ok((width, height)) if width > 0 && height > 0 => {
                vec![Rect::new(0.0, 0.0, width as f64, height as f64)]
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("display_size failed: {e:?}");
                Vec::new()
            }
        }
    }

    fn post_motion(&mut self, _kind: MotionKind, position: Point) -> Result<()> {
        // A held button turns a plain move into a drag on every rdev platform.
        simulate(&EventType::MouseMove {
            x: position.x,
            y: position.y,
        })?;
        self.tracker.set(position);
        Ok(())
    }

    fn post_button(
        &mut self,
        button: MouseButton,
        state: ButtonState,
        _position: Point,
        _click_count: u32,
    ) -> Result<()> {
        let button = rdev_button(button);
        match state {
            ButtonState::Down => simulate(&EventType::ButtonPress(button)),
            ButtonState::Up => simulate(&EventType::ButtonRelease(button)),
        }
    }

    fn post_scroll(&mut self, vertical: i32, horizontal: i32) -> Result<()> {
        simulate(&EventType::Wheel {
            delta_x: horizontal as i64,
            delta_y: vertical as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_arrows_map() {
        assert_eq!(key_code(Key::KeyW), Some(KeyCode::W));
        assert_eq!(key_code(Key::UpArrow), Some(KeyCode::Up));
        assert_eq!(key_code(Key::Dot), Some(KeyCode::Period));
        assert_eq!(key_code(Key::Unknown(191)), Some(KeyCode::Other(191)));
        assert_eq!(key_code(Key::PrintScreen), None);
    }

    #[test]
    fn modifier_keys_track_both_sides() {
        let mut modifiers = Modifiers::empty();
        update_modifiers(&mut modifiers, Key::ControlLeft, true);
        update_modifiers(&mut modifiers, Key::AltGr, true);
        assert_eq!(modifiers, Modifiers::CONTROL | Modifiers::ALT);

        update_modifiers(&mut modifiers, Key::ControlRight, false);
        assert_eq!(modifiers, Modifiers::ALT);

        update_modifiers(&mut modifiers, Key::CapsLock, true);
        assert_eq!(modifiers, Modifiers::ALT);
        assert!(!is_modifier_key(Key::CapsLock));
        assert!(!is_modifier_key(Key::Function));
    }

    #[test]
    fn grab_callback_consumes_on_sink_decision() {
        let shared = GrabShared::default();
        let tracker = PointerTracker::new();
        let sink: HookSink = Arc::new(|event: HookEvent| match event {
            HookEvent::KeyDown { key: KeyCode::W, .. } => HookDecision::Consume,
            _ => HookDecision::PassThrough,
        });
        *shared.sink.lock() = Some(sink);

        let event = |event_type| Event {
            time: std::time::SystemTime::now(),
            name: None,
            event_type,
        };
        assert!(on_event(&shared, &tracker, event(EventType::KeyPress(Key::KeyW))).is_none());
        assert!(on_event(&shared, &tracker, event(EventType::KeyPress(Key::KeyX))).is_some());

        assert!(
            on_event(
                &shared,
                &tracker,
                event(EventType::MouseMove { x: 10.0, y: 20.0 })
            )
            .is_some()
        );
        assert_eq!(tracker.position(), Some(Point::new(10.0, 20.0)));

        *shared.sink.lock() = None;
        assert!(on_event(&shared, &tracker, event(EventType::KeyPress(Key::KeyW))).is_some());
    }
}
