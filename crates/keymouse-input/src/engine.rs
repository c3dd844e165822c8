//! Activation state machine and per-tick motion driver.
//!
//! The engine decides for every hooked key event whether it is consumed,
//! tracks held keys and mover directions, and on each tick turns both movers
//! into pointer and scroll events. All entry points (hook events, ticks,
//! settings reloads, programmatic deactivation) serialize on one mutex.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use keymouse_config::{KeyCode, Modifiers, Settings};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::hook::{HookDecision, HookEvent, HookHandler};
use crate::key_action::{KeyAction, is_intercepted};
use crate::mouse::{MouseButton, MouseController, PointerBackend};
use crate::mover::Mover;
use crate::notifier::Notifier;
use crate::ticker::{TICK_INTERVAL, Ticker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Deactivated,
    Activated,
}

/// Where ticks come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    /// A background ticker firing at the given period while activated.
    Fixed(Duration),
    /// Nothing ticks on its own; the owner calls [`InputEngine::tick`].
    Manual,
}

impl Default for TickSource {
    fn default() -> Self {
        TickSource::Fixed(TICK_INTERVAL)
    }
}

struct EngineState<P: PointerBackend> {
    activation: ActivationState,
    cursor: Mover,
    scroll: Mover,
    mouse: MouseController<P>,
    held_keys: HashSet<KeyCode>,
    /// Last reported modifier set. Not used for gating yet.
    modifiers: Modifiers,
    /// Key whose down event toggled activation; its matching up is swallowed once.
    swallow_release: Option<KeyCode>,
    settings: Arc<Settings>,
    ticker: Option<Ticker>,
    /// Bumped on every transition so ticks queued by a stopped ticker are dropped.
    generation: u64,
}

impl<P: PointerBackend> EngineState<P> {
    fn key_down(&mut self, action: KeyAction) {
        match action {
            KeyAction::Move(direction) => self.cursor.add_direction(direction),
            KeyAction::Click(button) => self.mouse.mouse_down(button),
            KeyAction::Scroll(direction) => self.scroll.add_direction(direction),
            KeyAction::Turbo => self.cursor.set_max_speed(self.settings.turbo_max_speed),
        }
    }

    fn key_up(&mut self, action: KeyAction) {
        match action {
            KeyAction::Move(direction) => self.cursor.remove_direction(direction),
            KeyAction::Click(button) => self.mouse.mouse_up(button),
            KeyAction::Scroll(direction) => self.scroll.remove_direction(direction),
            KeyAction::Turbo => self.cursor.reset_max_speed(),
        }
    }

    fn turbo_held(&self) -> bool {
        self.held_keys
            .iter()
            .any(|key| KeyAction::for_key(*key) == Some(KeyAction::Turbo))
    }
}

struct EngineInner<P: PointerBackend> {
    state: Mutex<EngineState<P>>,
    notifier: Notifier<ActivationState>,
}

impl<P: PointerBackend + 'static> EngineInner<P> {
    fn handle_event(self: &Arc<Self>, event: &HookEvent) -> HookDecision {
        let mut state = self.state.lock();
        match *event {
            HookEvent::ModifiersChanged(modifiers) => {
                state.modifiers = modifiers;
                HookDecision::PassThrough
            }
            HookEvent::Disabled(_) => HookDecision::PassThrough,
            HookEvent::KeyDown { key, modifiers } => {
                state.modifiers = modifiers;
                self.key_down(&mut state, key, modifiers)
            }
            HookEvent::KeyUp { key, modifiers } => {
                state.modifiers = modifiers;
                Self::key_up(&mut state, key)
            }
        }
    }

    fn key_down(
        self: &Arc<Self>,
        state: &mut EngineState<P>,
        key: KeyCode,
        modifiers: Modifiers,
    ) -> HookDecision {
        match state.activation {
            ActivationState::Deactivated => {
                if state.settings.activate.matches(key, modifiers) {
                    self.activate(state);
                    state.swallow_release = Some(key);
                    HookDecision::Consume
                } else {
                    HookDecision::PassThrough
                }
            }
            ActivationState::Activated => {
                if state.settings.deactivate.matches(key, modifiers) {
                    self.deactivate(state);
                    state.swallow_release = Some(key);
                    return HookDecision::Consume;
                }
                if state.settings.activate.matches(key, modifiers) {
                    // Already active; the chord never doubles as an action key.
                    state.swallow_release = Some(key);
                    return HookDecision::Consume;
                }
                if !is_intercepted(key, state.settings.deactivate.key) {
                    return HookDecision::PassThrough;
                }
                if !state.held_keys.insert(key) {
                    // OS key repeat.
                    return HookDecision::Consume;
                }
                if let Some(action) = KeyAction::for_key(key) {
                    debug!("{key} down: {action:?}");
                    state.key_down(action);
                }
                HookDecision::Consume
            }
        }
    }

    fn key_up(state: &mut EngineState<P>, key: KeyCode) -> HookDecision {
        if state.swallow_release == Some(key) {
            state.swallow_release = None;
            return HookDecision::Consume;
        }
        if state.activation != ActivationState::Activated
            || !is_intercepted(key, state.settings.deactivate.key)
        {
            return HookDecision::PassThrough;
        }
        state.held_keys.remove(&key);
        if let Some(action) = KeyAction::for_key(key) {
            debug!("{key} up: {action:?}");
            state.key_up(action);
        }
        HookDecision::Consume
    }

    fn activate(self: &Arc<Self>, state: &mut EngineState<P>) {
        state.activation = ActivationState::Activated;
        state.generation += 1;
        let generation = state.generation;
        if let Some(ticker) = state.ticker.as_mut() {
            let engine = Arc::downgrade(self);
            let started = ticker.start(move || {
                if let Some(engine) = engine.upgrade() {
                    engine.tick(Some(generation));
                }
            });
            if let Err(e) = started {
                warn!("Failed to start ticker: {e}");
            }
        }
        info!("Activated");
        self.notifier.notify(ActivationState::Activated);
    }

    fn deactivate(&self, state: &mut EngineState<P>) {
        if state.activation == ActivationState::Deactivated {
            return;
        }
        state.activation = ActivationState::Deactivated;
        state.generation += 1;
        if let Some(ticker) = state.ticker.as_mut() {
            ticker.stop();
        }
        state.mouse.release_all();
        state.cursor.reset();
        state.scroll.reset();
        state.held_keys.clear();
        info!("Deactivated");
        self.notifier.notify(ActivationState::Deactivated);
    }

    /// `generation` is `None` for manual ticks.
    fn tick(&self, generation: Option<u64>) {
        let mut state = self.state.lock();
        if state.activation != ActivationState::Activated {
            return;
        }
        if generation.is_some_and(|g| g != state.generation) {
            return;
        }

        let (dx, dy) = state.cursor.step();
        state.mouse.move_cursor(dx, dy);

        // Mover "up" is -y; content should scroll up, so the vertical axis flips.
        let (sx, sy) = state.scroll.step();
        state.mouse.scroll(-sy, sx);
    }
}

impl<P: PointerBackend> Drop for EngineInner<P> {
    fn drop(&mut self) {
        self.state.get_mut().mouse.release_all();
    }
}

/// Keyboard-to-pointer engine. Clones share one engine.
pub struct InputEngine<P: PointerBackend> {
    inner: Arc<EngineInner<P>>,
}

impl<P: PointerBackend> Clone for InputEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: PointerBackend + 'static> InputEngine<P> {
    pub fn new(settings: Arc<Settings>, backend: P, tick_source: TickSource) -> Result<Self> {
        let ticker = match tick_source {
            TickSource::Fixed(period) => Some(Ticker::new(period)),
            TickSource::Manual => None,
        };
        let state = EngineState {
            activation: ActivationState::Deactivated,
            cursor: Mover::cursor(&settings.cursor),
            scroll: Mover::scroll(&settings.scroll),
            mouse: MouseController::new(backend),
            held_keys: HashSet::new(),
            modifiers: Modifiers::empty(),
            swallow_release: None,
            settings,
            ticker,
            generation: 0,
        };
        Ok(Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(state),
                notifier: Notifier::spawn("keymouse-notify")?,
            }),
        })
    }

    /// Register an observer for activation changes. Observers run on a
    /// separate thread, in transition order.
    pub fn subscribe(&self, observer: impl Fn(ActivationState) + Send + Sync + 'static) {
        self.inner.notifier.subscribe(observer);
    }

    pub fn state(&self) -> ActivationState {
        self.inner.state.lock().activation
    }

    pub fn modifiers(&self) -> Modifiers {
        self.inner.state.lock().modifiers
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.inner.state.lock().settings.clone()
    }

    pub fn is_button_held(&self, button: MouseButton) -> bool {
        self.inner.state.lock().mouse.is_held(button)
    }

    pub fn handle_event(&self, event: &HookEvent) -> HookDecision {
        self.inner.handle_event(event)
    }

    /// Handler for [`crate::KeyboardHook::start`]. It holds the engine
    /// weakly; once the engine is gone every event passes through.
    pub fn hook_handler(&self) -> HookHandler {
        let engine = Arc::downgrade(&self.inner);
        Arc::new(move |event: &HookEvent| handle_weak(&engine, event))
    }

    /// Leave activated mode, releasing any held buttons.
    pub fn deactivate(&self) {
        let mut state = self.inner.state.lock();
        self.inner.deactivate(&mut state);
    }

    /// Swap in new settings. Motion in progress keeps its directions and
    /// speed (clamped to the new ceiling).
    pub fn apply_settings(&self, settings: Arc<Settings>) {
        let mut state = self.inner.state.lock();
        state.cursor.update_parameters(&settings.cursor);
        state.scroll.update_parameters(&settings.scroll);
        state.settings = settings;
        if state.turbo_held() {
            let turbo = state.settings.turbo_max_speed;
            state.cursor.set_max_speed(turbo);
        }
        debug!(
            "Settings applied (activate {}, deactivate {})",
            state.settings.activate, state.settings.deactivate
        );
    }

    /// Advance one control-loop step. Does nothing unless activated.
    pub fn tick(&self) {
        self.inner.tick(None);
    }
}

fn handle_weak<P: PointerBackend + 'static>(
    engine: &Weak<EngineInner<P>>,
    event: &HookEvent,
) -> HookDecision {
    match engine.upgrade() {
        Some(engine) => engine.handle_event(event),
        None => HookDecision::PassThrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mouse::{ButtonState, PointerEvent, VirtualPointerBackend};
    use keymouse_config::{KeyBinding, MotionSettings};
    use std::thread;

    fn down(key: KeyCode, modifiers: Modifiers) -> HookEvent {
        HookEvent::KeyDown { key, modifiers }
    }

    fn up(key: KeyCode) -> HookEvent {
        HookEvent::KeyUp {
            key,
            modifiers: Modifiers::empty(),
        }
    }

    fn activate_chord() -> HookEvent {
        down(KeyCode::Space, Modifiers::CONTROL | Modifiers::ALT)
    }

    fn engine_with(settings: Settings) -> (InputEngine<VirtualPointerBackend>, VirtualPointerBackend) {
        let backend = VirtualPointerBackend::default();
        let engine = InputEngine::new(Arc::new(settings), backend.clone(), TickSource::Manual).unwrap();
        (engine, backend)
    }

    fn engine() -> (InputEngine<VirtualPointerBackend>, VirtualPointerBackend) {
        engine_with(Settings::default())
    }

    fn motion_ys(events: &[PointerEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                PointerEvent::Motion { position, .. } => Some(position.y),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn activation_needs_exact_modifiers() {
        let (engine, _) = engine();
        assert_eq!(
            engine.handle_event(&down(KeyCode::Space, Modifiers::CONTROL)),
            HookDecision::PassThrough
        );
        assert_eq!(
            engine.handle_event(&down(
                KeyCode::Space,
                Modifiers::CONTROL | Modifiers::ALT | Modifiers::SHIFT
            )),
            HookDecision::PassThrough
        );
        assert_eq!(engine.state(), ActivationState::Deactivated);

        assert_eq!(engine.handle_event(&activate_chord()), HookDecision::Consume);
        assert_eq!(engine.state(), ActivationState::Activated);
    }

    #[test]
    fn deactivated_engine_passes_everything_through() {
        let (engine, backend) = engine();
        assert_eq!(
            engine.handle_event(&down(KeyCode::W, Modifiers::empty())),
            HookDecision::PassThrough
        );
        assert_eq!(engine.handle_event(&up(KeyCode::W)), HookDecision::PassThrough);
        engine.tick();
        assert!(backend.events().is_empty());
    }

    #[test]
    fn key_repeat_changes_nothing() {
        let (engine, backend) = engine();
        engine.handle_event(&activate_chord());

        assert_eq!(
            engine.handle_event(&down(KeyCode::W, Modifiers::empty())),
            HookDecision::Consume
        );
        assert_eq!(
            engine.handle_event(&down(KeyCode::W, Modifiers::empty())),
            HookDecision::Consume
        );
        engine.tick();
        assert_eq!(motion_ys(&backend.take_events()), vec![537.0]);

        // A single release ends the hold; the repeat never pushed a second entry.
        engine.handle_event(&up(KeyCode::W));
        engine.tick();
        assert!(motion_ys(&backend.take_events()).is_empty());
    }

    #[test]
    fn deactivation_releases_held_button_once() {
        let (engine, backend) = engine();
        engine.handle_event(&activate_chord());
        engine.handle_event(&down(KeyCode::J, Modifiers::empty()));
        assert!(engine.is_button_held(MouseButton::Left));
        backend.take_events();

        assert_eq!(
            engine.handle_event(&down(KeyCode::Escape, Modifiers::empty())),
            HookDecision::Consume
        );
        assert_eq!(engine.state(), ActivationState::Deactivated);
        assert!(!engine.is_button_held(MouseButton::Left));

        let releases: Vec<_> = backend
            .take_events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    PointerEvent::Button {
                        button: MouseButton::Left,
                        state: ButtonState::Up,
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(releases.len(), 1);

        assert_eq!(engine.handle_event(&up(KeyCode::J)), HookDecision::PassThrough);
        assert!(backend.events().is_empty());
    }

    #[test]
    fn programmatic_deactivate_resets_motion() {
        let (engine, backend) = engine();
        engine.handle_event(&activate_chord());
        engine.handle_event(&down(KeyCode::D, Modifiers::empty()));
        engine.tick();
        engine.deactivate();
        engine.deactivate();
        backend.take_events();

        engine.handle_event(&activate_chord());
        engine.tick();
        assert!(backend.events().is_empty(), "direction survived deactivation");
    }

    #[test]
    fn scroll_keys_map_to_scroll_axes() {
        let (engine, backend) = engine();
        engine.handle_event(&activate_chord());

        engine.handle_event(&down(KeyCode::R, Modifiers::empty()));
        engine.tick();
        assert_eq!(
            backend.take_events(),
            vec![PointerEvent::Scroll {
                vertical: 2,
                horizontal: 0
            }]
        );
        engine.handle_event(&up(KeyCode::R));
        engine.deactivate();
        engine.handle_event(&activate_chord());

        engine.handle_event(&down(KeyCode::Q, Modifiers::empty()));
        engine.tick();
        assert_eq!(
            backend.take_events(),
            vec![PointerEvent::Scroll {
                vertical: 0,
                horizontal: 2
            }]
        );
        engine.handle_event(&up(KeyCode::Q));
        engine.deactivate();
        engine.handle_event(&activate_chord());

        engine.handle_event(&down(KeyCode::E, Modifiers::empty()));
        engine.tick();
        assert_eq!(
            backend.take_events(),
            vec![PointerEvent::Scroll {
                vertical: 0,
                horizontal: -2
            }]
        );
    }

    fn fast_cursor() -> Settings {
        Settings {
            cursor: MotionSettings {
                acceleration: 10.0,
                max_speed: 5.0,
                start_speed: 5.0,
            },
            ..Settings::default()
        }
    }

    #[test]
    fn turbo_raises_ceiling_while_held() {
        let (engine, backend) = engine_with(fast_cursor());
        engine.handle_event(&activate_chord());
        engine.handle_event(&down(KeyCode::W, Modifiers::empty()));
        engine.tick();
        engine.tick();
        engine.handle_event(&down(KeyCode::H, Modifiers::empty()));
        engine.tick();
        engine.tick();
        engine.handle_event(&up(KeyCode::H));
        engine.tick();

        assert_eq!(
            motion_ys(&backend.events()),
            vec![535.0, 530.0, 525.0, 510.0, 505.0]
        );
    }

    #[test]
    fn reload_keeps_turbo_and_reclamps() {
        let (engine, backend) = engine_with(fast_cursor());
        engine.handle_event(&activate_chord());
        engine.handle_event(&down(KeyCode::W, Modifiers::empty()));
        engine.handle_event(&down(KeyCode::H, Modifiers::empty()));

        engine.apply_settings(Arc::new(Settings {
            turbo_max_speed: 12.0,
            ..fast_cursor()
        }));
        engine.tick();
        engine.tick();
        engine.tick();

        assert_eq!(motion_ys(&backend.events()), vec![535.0, 523.0, 511.0]);
        assert_eq!(engine.state(), ActivationState::Activated);
    }

    #[test]
    fn reload_swaps_bindings() {
        let (engine, _) = engine();
        engine.apply_settings(Arc::new(Settings {
            activate: KeyBinding::new(KeyCode::F1, Modifiers::empty()),
            deactivate: KeyBinding::new(KeyCode::F2, Modifiers::empty()),
            ..Settings::default()
        }));

        assert_eq!(engine.handle_event(&activate_chord()), HookDecision::PassThrough);
        assert_eq!(
            engine.handle_event(&down(KeyCode::F1, Modifiers::empty())),
            HookDecision::Consume
        );
        assert_eq!(
            engine.handle_event(&down(KeyCode::Escape, Modifiers::empty())),
            HookDecision::PassThrough
        );
        assert_eq!(
            engine.handle_event(&down(KeyCode::F2, Modifiers::empty())),
            HookDecision::Consume
        );
        assert_eq!(engine.state(), ActivationState::Deactivated);
    }

    #[test]
    fn unbound_keys_and_modifiers_pass_through_when_active() {
        let (engine, _) = engine();
        engine.handle_event(&activate_chord());

        assert_eq!(
            engine.handle_event(&down(KeyCode::X, Modifiers::empty())),
            HookDecision::PassThrough
        );
        assert_eq!(
            engine.handle_event(&HookEvent::ModifiersChanged(Modifiers::SHIFT)),
            HookDecision::PassThrough
        );
        assert_eq!(engine.modifiers(), Modifiers::SHIFT);
    }

    #[test]
    fn orphan_key_up_is_consumed() {
        let (engine, backend) = engine();
        engine.handle_event(&activate_chord());
        assert_eq!(engine.handle_event(&up(KeyCode::D)), HookDecision::Consume);
        assert_eq!(engine.handle_event(&up(KeyCode::L)), HookDecision::Consume);
        engine.tick();
        assert!(backend.events().is_empty());
    }

    #[test]
    fn activate_chord_on_action_key_is_not_dispatched() {
        let (engine, backend) = engine_with(Settings {
            activate: KeyBinding::new(KeyCode::H, Modifiers::CONTROL),
            ..fast_cursor()
        });
        assert_eq!(
            engine.handle_event(&down(KeyCode::H, Modifiers::CONTROL)),
            HookDecision::Consume
        );
        engine.handle_event(&down(KeyCode::W, Modifiers::empty()));
        assert_eq!(
            engine.handle_event(&down(KeyCode::H, Modifiers::CONTROL)),
            HookDecision::Consume
        );
        engine.tick();
        engine.tick();

        // Turbo never engaged: the ceiling stays at 5.
        assert_eq!(motion_ys(&backend.events()), vec![535.0, 530.0]);
        assert_eq!(engine.handle_event(&up(KeyCode::H)), HookDecision::Consume);
        assert_eq!(engine.state(), ActivationState::Activated);
    }

    #[test]
    fn toggle_key_release_is_swallowed_once() {
        let (engine, _) = engine();
        engine.handle_event(&activate_chord());
        assert_eq!(engine.handle_event(&up(KeyCode::Space)), HookDecision::Consume);
        assert_eq!(
            engine.handle_event(&up(KeyCode::Space)),
            HookDecision::PassThrough
        );

        engine.handle_event(&down(KeyCode::Escape, Modifiers::empty()));
        assert_eq!(engine.state(), ActivationState::Deactivated);
        assert_eq!(engine.handle_event(&up(KeyCode::Escape)), HookDecision::Consume);
        assert_eq!(
            engine.handle_event(&up(KeyCode::Escape)),
            HookDecision::PassThrough
        );
    }

    #[test]
    fn same_binding_toggles() {
        let toggle = KeyBinding::new(KeyCode::F9, Modifiers::empty());
        let (engine, _) = engine_with(Settings {
            activate: toggle,
            deactivate: toggle,
            ..Settings::default()
        });
        engine.handle_event(&down(KeyCode::F9, Modifiers::empty()));
        engine.handle_event(&up(KeyCode::F9));
        assert_eq!(engine.state(), ActivationState::Activated);
        engine.handle_event(&down(KeyCode::F9, Modifiers::empty()));
        assert_eq!(engine.state(), ActivationState::Deactivated);
    }

    #[test]
    fn stale_generation_tick_is_dropped() {
        let (engine, backend) = engine();
        engine.handle_event(&activate_chord());
        engine.handle_event(&down(KeyCode::S, Modifiers::empty()));

        engine.inner.tick(Some(0));
        assert!(backend.events().is_empty());

        engine.inner.tick(Some(1));
        assert_eq!(motion_ys(&backend.events()), vec![543.0]);
    }

    #[test]
    fn observers_see_transitions_in_order() {
        let (engine, _) = engine();
        let (tx, rx) = crossbeam_channel::unbounded();
        engine.subscribe(move |state| tx.send(state).unwrap());

        engine.handle_event(&activate_chord());
        engine.deactivate();
        engine.handle_event(&activate_chord());

        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            got,
            vec![
                ActivationState::Activated,
                ActivationState::Deactivated,
                ActivationState::Activated
            ]
        );
    }

    #[test]
    fn fixed_ticker_moves_until_deactivated() {
        let backend = VirtualPointerBackend::default();
        let engine = InputEngine::new(
            Arc::new(Settings::default()),
            backend.clone(),
            TickSource::Fixed(Duration::from_millis(5)),
        )
        .unwrap();
        engine.handle_event(&activate_chord());
        engine.handle_event(&down(KeyCode::D, Modifiers::empty()));
        thread::sleep(Duration::from_millis(60));
        engine.deactivate();

        let after_stop = backend.events().len();
        assert!(after_stop > 0);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(backend.events().len(), after_stop);
    }

    #[test]
    fn handler_passes_through_once_engine_is_dropped() {
        let (engine, backend) = engine();
        let handler = engine.hook_handler();
        assert_eq!(handler(&activate_chord()), HookDecision::Consume);
        handler(&down(KeyCode::J, Modifiers::empty()));

        drop(engine);
        assert_eq!(
            handler(&down(KeyCode::W, Modifiers::empty())),
            HookDecision::PassThrough
        );
        // Dropping the engine let go of the held button.
        assert!(matches!(
            backend.events().last(),
            Some(PointerEvent::Button {
                state: ButtonState::Up,
                ..
            })
        ));
    }
}
