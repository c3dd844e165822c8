//! Velocity model shared by cursor motion and scrolling.
//!
//! Speed ramps up by `acceleration` per tick while any direction is held and
//! decays at twice that rate once everything is released. Each tick the held
//! direction set is resolved into an integer displacement.

use keymouse_config::MotionSettings;

use crate::direction::{Direction, DirectionStack};

/// Diagonal scale for cursor motion, so diagonal speed matches cardinal speed.
pub const CURSOR_DIAGONAL_RATIO: f64 = std::f64::consts::FRAC_1_SQRT_2;
/// Scrolling applies no diagonal correction.
pub const SCROLL_DIAGONAL_RATIO: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct Mover {
    directions: DirectionStack,
    speed: f64,
    max_speed: f64,
    default_max_speed: f64,
    acceleration: f64,
    start_speed: f64,
    diagonal_ratio: f64,
}

impl Mover {
    pub fn new(settings: &MotionSettings, diagonal_ratio: f64) -> Self {
        Self {
            directions: DirectionStack::new(),
            speed: 0.0,
            max_speed: settings.max_speed,
            default_max_speed: settings.max_speed,
            acceleration: settings.acceleration,
            start_speed: settings.start_speed,
            diagonal_ratio,
        }
    }

    pub fn cursor(settings: &MotionSettings) -> Self {
        Self::new(settings, CURSOR_DIAGONAL_RATIO)
    }

    pub fn scroll(settings: &MotionSettings) -> Self {
        Self::new(settings, SCROLL_DIAGONAL_RATIO)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn direction(&self) -> Direction {
        self.directions.current()
    }

    pub fn add_direction(&mut self, direction: Direction) {
        if self.directions.push(direction) {
            // Resuming keeps leftover momentum if it is faster than a fresh start.
            self.speed = self.speed.max(self.start_speed).min(self.max_speed);
        }
    }

    pub fn remove_direction(&mut self, direction: Direction) {
        self.directions.remove(direction);
    }

    /// Advance speed by one tick.
    pub fn accelerate(&mut self) {
        if self.directions.current().is_empty() {
            self.speed = (self.speed - self.acceleration * 2.0).max(0.0);
        } else {
            self.speed = (self.speed + self.acceleration).min(self.max_speed);
        }
    }

    /// Displacement for the current speed and held directions.
    pub fn vector(&mut self) -> (i32, i32) {
        let direction = self.directions.current();
        if direction.is_empty() {
            return (0, 0);
        }

        let (mut x, mut y) = direction.unit();
        if x == 0.0 && y == 0.0 {
            // Opposing keys cancel; keep momentum for when one is released.
            return (0, 0);
        }
        if x != 0.0 && y != 0.0 {
            x *= self.diagonal_ratio;
            y *= self.diagonal_ratio;
        }

        let dx = (x * self.speed).round() as i32;
        let dy = (y * self.speed).round() as i32;
        if dx == 0 && dy == 0 {
            // Too slow to produce a visible step.
            self.speed = 0.0;
        }
        (dx, dy)
    }

    /// One control-loop tick: displacement at the current speed, then
    /// acceleration for the next tick.
    pub fn step(&mut self) -> (i32, i32) {
        let displacement = self.vector();
        self.accelerate();
        displacement
    }

    /// Temporarily change the ceiling (turbo).
    pub fn set_max_speed(&mut self, max_speed: f64) {
        self.max_speed = max_speed;
        self.speed = self.speed.min(self.max_speed);
    }

    pub fn reset_max_speed(&mut self) {
        self.set_max_speed(self.default_max_speed);
    }

    /// Hot-swap tunables without interrupting motion in progress.
    pub fn update_parameters(&mut self, settings: &MotionSettings) {
        self.acceleration = settings.acceleration;
        self.start_speed = settings.start_speed;
        self.default_max_speed = settings.max_speed;
        self.set_max_speed(settings.max_speed);
    }

    pub fn reset(&mut self) {
        self.speed = 0.0;
        self.max_speed = self.default_max_speed;
        self.directions.clear();
    }
}
