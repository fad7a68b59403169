//! Turns keyboard state into per-frame gameplay inputs.

use macroquad::prelude::{is_key_down, KeyCode};
use shared::InputFlags;

/// How long fire must be held for the release to fire a charged shot.
pub const CHARGE_THRESHOLD_MS: u32 = 500;

/// Which keys drive which action. Any key in a list triggers the action.
#[derive(Debug, Clone)]
pub struct Keybinds {
    pub up: Vec<KeyCode>,
    pub down: Vec<KeyCode>,
    pub left: Vec<KeyCode>,
    pub right: Vec<KeyCode>,
    pub fire: Vec<KeyCode>,
}

impl Default for Keybinds {
    fn default() -> Self {
        Self {
            up: vec![KeyCode::W, KeyCode::Up],
            down: vec![KeyCode::S, KeyCode::Down],
            left: vec![KeyCode::A, KeyCode::Left],
            right: vec![KeyCode::D, KeyCode::Right],
            fire: vec![KeyCode::Space],
        }
    }
}

/// Action keys held during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeySnapshot {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub fire: bool,
}

/// Reads the current keyboard state. Needs a running macroquad window.
pub fn poll_keys(binds: &Keybinds) -> KeySnapshot {
    let any = |keys: &[KeyCode]| keys.iter().any(|&key| is_key_down(key));
    KeySnapshot {
        up: any(&binds.up),
        down: any(&binds.down),
        left: any(&binds.left),
        right: any(&binds.right),
        fire: any(&binds.fire),
    }
}

/// Numbers inputs and turns each fire press into exactly one shot, decided
/// on release: a short press fires a normal shot, a long one a charged shot.
#[derive(Debug)]
pub struct InputSampler {
    next_tick: u32,
    fire_held_since: Option<u32>,
}

impl InputSampler {
    /// Tick 0 is reserved for the address registration packet.
    pub fn new() -> Self {
        Self {
            next_tick: 1,
            fire_held_since: None,
        }
    }

    pub fn next_tick(&self) -> u32 {
        self.next_tick
    }

    pub fn sample(&mut self, keys: KeySnapshot, now_ms: u32) -> (u32, InputFlags) {
        let mut inputs = InputFlags::NONE;
        if keys.up {
            inputs |= InputFlags::UP;
        }
        if keys.down {
            inputs |= InputFlags::DOWN;
        }
        if keys.left {
            inputs |= InputFlags::LEFT;
        }
        if keys.right {
            inputs |= InputFlags::RIGHT;
        }

        match (keys.fire, self.fire_held_since) {
            (true, None) => self.fire_held_since = Some(now_ms),
            (false, Some(since)) => {
                inputs |= if now_ms.wrapping_sub(since) >= CHARGE_THRESHOLD_MS {
                    InputFlags::HOLD
                } else {
                    InputFlags::PRESSED
                };
                self.fire_held_since = None;
            }
            _ => {}
        }

        let tick = self.next_tick;
        self.next_tick += 1;
        (tick, inputs)
    }
}

impl Default for InputSampler {
    fn default() -> Self {
        Self::new()
    }
}
