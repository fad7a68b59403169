use crate::game::{EntityView, GameSnapshot, PlayerView, SessionStatus};
use macroquad::prelude::*;
use shared::protocol::udp::EntityKind;
use shared::{PLAYER_HEIGHT, PLAYER_WIDTH, WORLD_HEIGHT, WORLD_WIDTH};

/// Hitbox sizes as drawn; enemies grow with the level on the server, so
/// the drawn size is only indicative.
fn entity_size(kind: EntityKind) -> (f32, f32) {
    match kind {
        EntityKind::Shot => (10.0, 5.0),
        EntityKind::ChargedShot => (40.0, 20.0),
        EntityKind::Enemy => (32.0, 32.0),
        EntityKind::EliteEnemy => (48.0, 48.0),
    }
}

fn entity_color(kind: EntityKind) -> Color {
    match kind {
        EntityKind::Shot => YELLOW,
        EntityKind::ChargedShot => ORANGE,
        EntityKind::Enemy => Color::from_rgba(255, 68, 68, 255),
        EntityKind::EliteEnemy => MAGENTA,
    }
}

/// Draws world coordinates scaled to the current window.
pub struct Renderer {
    scale: f32,
}

impl Renderer {
    pub fn new() -> Self {
        Self { scale: 1.0 }
    }

    fn update_scale(&mut self) {
        self.scale = (screen_width() / WORLD_WIDTH).min(screen_height() / WORLD_HEIGHT);
    }

    pub fn draw_game(&mut self, snapshot: &GameSnapshot) {
        self.update_scale();
        clear_background(Color::from_rgba(26, 26, 26, 255));
        draw_rectangle_lines(
            0.0,
            0.0,
            WORLD_WIDTH * self.scale,
            WORLD_HEIGHT * self.scale,
            2.0,
            Color::from_rgba(68, 68, 68, 255),
        );

        for entity in &snapshot.entities {
            self.draw_entity(entity);
        }
        for player in &snapshot.players {
            self.draw_player(player);
        }

        self.draw_hud(snapshot);
    }

    fn draw_entity(&self, entity: &EntityView) {
        let (width, height) = entity_size(entity.kind);
        draw_rectangle(
            entity.x * self.scale,
            entity.y * self.scale,
            width * self.scale,
            height * self.scale,
            entity_color(entity.kind),
        );
    }

    fn draw_player(&self, player: &PlayerView) {
        let color = if player.local {
            GREEN
        } else {
            Color::from_rgba(0, 170, 255, 255)
        };
        let (x, y) = (player.x * self.scale, player.y * self.scale);
        draw_rectangle(x, y, PLAYER_WIDTH * self.scale, PLAYER_HEIGHT * self.scale, color);
        draw_rectangle_lines(
            x,
            y,
            PLAYER_WIDTH * self.scale,
            PLAYER_HEIGHT * self.scale,
            2.0,
            WHITE,
        );
        draw_text(&player.id.to_string(), x, y - 4.0, 16.0, WHITE);
    }

    fn draw_hud(&self, snapshot: &GameSnapshot) {
        let rtt = snapshot
            .rtt_ms
            .map(|ms| format!("{}ms", ms))
            .unwrap_or_else(|| "--".to_string());
        let ping_color = match snapshot.rtt_ms {
            Some(ms) if ms < 50 => GREEN,
            Some(ms) if ms < 100 => YELLOW,
            _ => RED,
        };
        draw_text(&format!("RTT {}", rtt), 10.0, 20.0, 18.0, ping_color);
        draw_text(
            &format!("loss {:.1}%", snapshot.packet_loss),
            10.0,
            40.0,
            18.0,
            WHITE,
        );
        draw_text(
            &format!("{} players, {} entities", snapshot.players.len(), snapshot.entities.len()),
            10.0,
            60.0,
            18.0,
            WHITE,
        );

        let banner = match snapshot.status {
            SessionStatus::Playing => return,
            SessionStatus::GameOver => "GAME OVER",
            SessionStatus::Kicked => "KICKED FROM ROOM",
        };
        let size = measure_text(banner, None, 48, 1.0);
        draw_text(
            banner,
            (screen_width() - size.width) / 2.0,
            screen_height() / 2.0,
            48.0,
            RED,
        );
    }

    /// Plain text screen used while waiting in the lobby.
    pub fn draw_lobby(&mut self, lines: &[String]) {
        clear_background(Color::from_rgba(26, 26, 26, 255));
        for (i, line) in lines.iter().enumerate() {
            draw_text(line, 20.0, 40.0 + i as f32 * 24.0, 22.0, WHITE);
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}
