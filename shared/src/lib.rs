//! Code shared by the client and the server: world constants, the movement
//! and collision rules both sides must agree on, the wire protocol, and the
//! UDP transport engine.
//!
//! Movement lives here rather than in the server so that client-side
//! prediction runs exactly the same arithmetic as the authoritative
//! simulation; any divergence would show up as constant reconciliation
//! snapping.

pub mod clock;
pub mod protocol;
pub mod ring_buffer;
pub mod transport;

pub use clock::Clock;
pub use protocol::udp::InputFlags;
pub use ring_buffer::RingBuffer;

pub const WORLD_WIDTH: f32 = 1920.0;
pub const WORLD_HEIGHT: f32 = 1080.0;

pub const PLAYER_WIDTH: f32 = 60.0;
pub const PLAYER_HEIGHT: f32 = 30.0;
pub const PLAYER_SPEED: f32 = 5.0;
pub const PLAYER_SPAWN: (f32, f32) = (100.0, 500.0);

/// Simulation rate shared by the server tick loop and the client frame loop.
pub const TICK_RATE: u32 = 60;
pub const TICK_SECONDS: f32 = 1.0 / TICK_RATE as f32;

pub const DEFAULT_TCP_PORT: u16 = 4242;
pub const DEFAULT_UDP_PORT: u16 = 5252;

/// Axis-aligned rectangle, `x`/`y` being the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Strict overlap test: rectangles that only share an edge do not collide.
pub fn check_collision(a: &Rect, b: &Rect) -> bool {
    !(a.right() <= b.x || b.right() <= a.x || a.bottom() <= b.y || b.bottom() <= a.y)
}

/// Applies the movement bits of one input to a position.
///
/// Used verbatim by the server when an input packet arrives and by the
/// client when predicting or replaying pending inputs.
pub fn apply_movement(x: f32, y: f32, inputs: InputFlags, speed: f32) -> (f32, f32) {
    let mut x = x;
    let mut y = y;

    if inputs.contains(InputFlags::UP) {
        y -= speed;
    }
    if inputs.contains(InputFlags::DOWN) {
        y += speed;
    }
    if inputs.contains(InputFlags::LEFT) {
        x -= speed;
    }
    if inputs.contains(InputFlags::RIGHT) {
        x += speed;
    }

    (
        x.clamp(0.0, WORLD_WIDTH - PLAYER_WIDTH),
        y.clamp(0.0, WORLD_HEIGHT - PLAYER_HEIGHT),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_projectile_hits_enemy() {
        let projectile = Rect::new(100.0, 100.0, 10.0, 5.0);
        let enemy = Rect::new(105.0, 98.0, 32.0, 32.0);
        assert!(check_collision(&projectile, &enemy));
        assert!(check_collision(&enemy, &projectile));
    }

    #[test]
    fn test_projectile_misses_distant_enemy() {
        let projectile = Rect::new(100.0, 100.0, 10.0, 5.0);
        let enemy = Rect::new(300.0, 300.0, 32.0, 32.0);
        assert!(!check_collision(&projectile, &enemy));
    }

    #[test]
    fn test_touching_edges_do_not_collide() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        assert!(!check_collision(&a, &b));
    }

    #[test]
    fn test_movement_combines_bits() {
        let (x, y) = apply_movement(
            200.0,
            200.0,
            InputFlags::UP | InputFlags::RIGHT,
            PLAYER_SPEED,
        );
        assert_approx_eq!(x, 205.0);
        assert_approx_eq!(y, 195.0);
    }

    #[test]
    fn test_movement_ignores_shoot_bits() {
        let (x, y) = apply_movement(
            200.0,
            200.0,
            InputFlags::PRESSED | InputFlags::HOLD,
            PLAYER_SPEED,
        );
        assert_eq!((x, y), (200.0, 200.0));
    }

    #[test]
    fn test_movement_clamped_to_world() {
        let (x, y) = apply_movement(1.0, 2.0, InputFlags::UP | InputFlags::LEFT, PLAYER_SPEED);
        assert_eq!((x, y), (0.0, 0.0));

        let (x, _) = apply_movement(WORLD_WIDTH, 0.0, InputFlags::RIGHT, PLAYER_SPEED);
        assert_eq!(x, WORLD_WIDTH - PLAYER_WIDTH);
    }
}
