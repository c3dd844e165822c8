// Per-key dispatch table for the activated engine

use keymouse_config::KeyCode;

use crate::direction::Direction;
use crate::mouse::MouseButton;

/// What a bound key does while the engine is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Hold a direction on the cursor mover.
    Move(Direction),
    /// Hold a mouse button.
    Click(MouseButton),
    /// Hold a direction on the scroll mover.
    Scroll(Direction),
    /// Raise the cursor ceiling to the turbo speed.
    Turbo,
}

impl KeyAction {
    pub fn for_key(key: KeyCode) -> Option<Self> {
        let action = match key {
            KeyCode::W => KeyAction::Move(Direction::UP),
            KeyCode::A => KeyAction::Move(Direction::LEFT),
            KeyCode::S => KeyAction::Move(Direction::DOWN),
            KeyCode::D => KeyAction::Move(Direction::RIGHT),
            KeyCode::J => KeyAction::Click(MouseButton::Left),
            KeyCode::L => KeyAction::Click(MouseButton::Right),
            KeyCode::R => KeyAction::Scroll(Direction::UP),
            KeyCode::F => KeyAction::Scroll(Direction::DOWN),
            // Q and E are deliberately not mirrored: Q scrolls right, E left.
            KeyCode::Q => KeyAction::Scroll(Direction::RIGHT),
            KeyCode::E => KeyAction::Scroll(Direction::LEFT),
            KeyCode::H => KeyAction::Turbo,
            _ => return None,
        };
        Some(action)
    }
}

/// Whether the activated engine swallows `key`. The deactivate key is
/// always swallowed so it never leaks into the focused application.
pub fn is_intercepted(key: KeyCode, deactivate_key: KeyCode) -> bool {
    key == deactivate_key || KeyAction::for_key(key).is_some()
}
