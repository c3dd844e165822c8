//! Pointer event emission.
//!
//! Turns displacement and click intents into platform pointer events via a
//! `PointerBackend`. Tracks which buttons are held (so moves become drags and
//! a forced release never leaves a button stuck) and per-button click timing
//! for multi-click ordinals.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};
use parking_lot::Mutex;

/// Presses closer together than this count toward one multi-click sequence.
pub const MULTI_CLICK_THRESHOLD: Duration = Duration::from_millis(300);

/// Bounds used when no display can be enumerated.
pub const FALLBACK_BOUNDS: Rect = Rect {
    x: 0.0,
    y: 0.0,
    width: 1920.0,
    height: 1080.0,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect {
            x,
            y,
            width: self.max_x().max(other.max_x()) - x,
            height: self.max_y().max(other.max_y()) - y,
        }
    }

    /// Clamp a point inside, keeping it one unit short of the high edges.
    pub fn clamp(&self, point: Point) -> Point {
        let high_x = (self.max_x() - 1.0).max(self.x);
        let high_y = (self.max_y() - 1.0).max(self.y);
        Point::new(point.x.clamp(self.x, high_x), point.y.clamp(self.y, high_y))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Down,
    Up,
}

/// Pointer motion flavour. Drags keep window move/resize previews live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    Move,
    Drag(MouseButton),
}

/// Platform abstraction for pointer queries and event synthesis.
pub trait PointerBackend: Send {
    /// Current absolute pointer location, if the platform can report it.
    fn cursor_position(&self) -> Option<Point>;
    /// Bounds of every active display. Empty when none can be enumerated.
    fn display_bounds(&self) -> Vec<Rect>;
    fn post_motion(&mut self, kind: MotionKind, position: Point) -> Result<()>;
    fn post_button(
        &mut self,
        button: MouseButton,
        state: ButtonState,
        position: Point,
        click_count: u32,
    ) -> Result<()>;
    /// Pixel-granularity scroll on two independent wheel axes.
    fn post_scroll(&mut self, vertical: i32, horizontal: i32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
struct ClickTimer {
    last_press: Option<Instant>,
    count: u32,
}

impl ClickTimer {
    fn register_press(&mut self, now: Instant) -> u32 {
        self.count = match self.last_press {
            Some(last) if now.saturating_duration_since(last) <= MULTI_CLICK_THRESHOLD => {
                self.count + 1
            }
            _ => 1,
        };
        self.last_press = Some(now);
        self.count
    }
}

pub struct MouseController<P: PointerBackend> {
    backend: P,
    left_held: bool,
    right_held: bool,
    left_clicks: ClickTimer,
    right_clicks: ClickTimer,
    reported_missing_displays: bool,
}

impl<P: PointerBackend> MouseController<P> {
    pub fn new(backend: P) -> Self {
        Self {
            backend,
            left_held: false,
            right_held: false,
            left_clicks: ClickTimer::default(),
            right_clicks: ClickTimer::default(),
            reported_missing_displays: false,
        }
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    pub fn is_held(&self, button: MouseButton) -> bool {
        match button {
            MouseButton::Left => self.left_held,
            MouseButton::Right => self.right_held,
        }
    }

    /// Union of all active display bounds, or [`FALLBACK_BOUNDS`].
    pub fn screen_bounds(&mut self) -> Rect {
        let displays = self.backend.display_bounds();
        let Some((first, rest)) = displays.split_first() else {
            if !self.reported_missing_displays {
                warn!("No displays could be enumerated; using fallback screen bounds");
                self.reported_missing_displays = true;
            }
            return FALLBACK_BOUNDS;
        };
        rest.iter().fold(*first, |acc, rect| acc.union(rect))
    }

    pub fn move_cursor(&mut self, dx: i32, dy: i32) {
        if dx == 0 && dy == 0 {
            return;
        }
        let Some(current) = self.backend.cursor_position() else {
            debug!("Pointer location unavailable, skipping move");
            return;
        };
        let bounds = self.screen_bounds();
        let target = bounds.clamp(Point::new(current.x + dx as f64, current.y + dy as f64));

        let kind = if self.left_held {
            MotionKind::Drag(MouseButton::Left)
        } else if self.right_held {
            MotionKind::Drag(MouseButton::Right)
        } else {
            MotionKind::Move
        };
        if let Err(e) = self.backend.post_motion(kind, target) {
            debug!("Dropped pointer motion: {e}");
        }
    }

    pub fn mouse_down(&mut self, button: MouseButton) {
        self.mouse_down_at(button, Instant::now());
    }

    /// Press `button` as of `now`. A button that is already held is left alone.
    pub fn mouse_down_at(&mut self, button: MouseButton, now: Instant) {
        if self.is_held(button) {
            return;
        }
        let click_count = match button {
            MouseButton::Left => {
                self.left_held = true;
                self.left_clicks.register_press(now)
            }
            MouseButton::Right => {
                self.right_held = true;
                self.right_clicks.register_press(now)
            }
        };
        let position = self.button_position();
        if let Err(e) = self
            .backend
            .post_button(button, ButtonState::Down, position, click_count)
        {
            debug!("Dropped {button:?} press: {e}");
        }
    }

    /// Release `button` if it is held, carrying the ordinal of its press.
    pub fn mouse_up(&mut self, button: MouseButton) {
        let click_count = match button {
            MouseButton::Left if self.left_held => {
                self.left_held = false;
                self.left_clicks.count
            }
            MouseButton::Right if self.right_held => {
                self.right_held = false;
                self.right_clicks.count
            }
            _ => return,
        };
        let position = self.button_position();
        if let Err(e) = self
            .backend
            .post_button(button, ButtonState::Up, position, click_count)
        {
            debug!("Dropped {button:?} release: {e}");
        }
    }

    /// Release every held button.
    pub fn release_all(&mut self) {
        self.mouse_up(MouseButton::Left);
        self.mouse_up(MouseButton::Right);
    }

    pub fn scroll(&mut self, vertical: i32, horizontal: i32) {
        if vertical == 0 && horizontal == 0 {
            return;
        }
        if let Err(e) = self.backend.post_scroll(vertical, horizontal) {
            debug!("Dropped scroll: {e}");
        }
    }

    fn button_position(&mut self) -> Point {
        match self.backend.cursor_position() {
            Some(position) => position,
            None => self.screen_bounds().center(),
        }
    }
}

/// Event recorded by [`VirtualPointerBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    Motion {
        kind: MotionKind,
        position: Point,
    },
    Button {
        button: MouseButton,
        state: ButtonState,
        position: Point,
        click_count: u32,
    },
    Scroll {
        vertical: i32,
        horizontal: i32,
    },
}

#[derive(Debug)]
struct VirtualPointerState {
    position: Option<Point>,
    displays: Vec<Rect>,
    events: Vec<PointerEvent>,
    fail_posts: bool,
}

/// In-memory pointer backend for testing.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
#[derive(Debug, Clone)]
pub struct VirtualPointerBackend {
    state: Arc<Mutex<VirtualPointerState>>,
}

impl VirtualPointerBackend {
    pub fn new(displays: Vec<Rect>, position: Point) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualPointerState {
                position: Some(position),
                displays,
                events: Vec::new(),
                fail_posts: false,
            })),
        }
    }

    pub fn position(&self) -> Option<Point> {
        self.state.lock().position
    }

    pub fn set_position(&self, position: Option<Point>) {
        self.state.lock().position = position;
    }

    pub fn set_displays(&self, displays: Vec<Rect>) {
        self.state.lock().displays = displays;
    }

    /// Make every post fail, as if event construction were refused.
    pub fn set_fail_posts(&self, fail: bool) {
        self.state.lock().fail_posts = fail;
    }

    pub fn events(&self) -> Vec<PointerEvent> {
        self.state.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<PointerEvent> {
        std::mem::take(&mut self.state.lock().events)
    }

    fn record(&self, event: PointerEvent) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_posts {
            anyhow::bail!("virtual backend refused {event:?}");
        }
        if let PointerEvent::Motion { position, .. } = event {
            state.position = Some(position);
        }
        state.events.push(event);
        Ok(())
    }
}

impl Default for VirtualPointerBackend {
    fn default() -> Self {
        Self::new(vec![FALLBACK_BOUNDS], FALLBACK_BOUNDS.center())
    }
}

impl PointerBackend for VirtualPointerBackend {
    fn cursor_position(&self) -> Option<Point> {
        self.state.lock().position
    }

    fn display_bounds(&self) -> Vec<Rect> {
        self.state.lock().displays.clone()
    }

    fn post_motion(&mut self, kind: MotionKind, position: Point) -> Result<()> {
        self.record(PointerEvent::Motion { kind, position })
    }

    fn post_button(
        &mut self,
        button: MouseButton,
        state: ButtonState,
        position: Point,
        click_count: u32,
    ) -> Result<()> {
        self.record(PointerEvent::Button {
            button,
            state,
            position,
            click_count,
        })
    }

    fn post_scroll(&mut self, vertical: i32, horizontal: i32) -> Result<()> {
        self.record(PointerEvent::Scroll {
            vertical,
            horizontal,
        })
    }
}
