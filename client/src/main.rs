use clap::Parser;
use client::game::SessionStatus;
use client::input::{poll_keys, Keybinds};
use client::lobby::{LobbyClient, LobbyError, LobbyState};
use client::network::GameSession;
use client::rendering::Renderer;
use log::{error, info, warn};
use macroquad::prelude::*;
use std::task::Poll;
use std::time::{Duration, Instant};

const LOBBY_REFRESH: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lobby server host
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Lobby server TCP port
    #[arg(short = 'p', long, default_value_t = shared::DEFAULT_TCP_PORT)]
    tcp_port: u16,

    #[arg(short = 'u', long, default_value = "player")]
    username: String,

    /// Join this room instead of creating one
    #[arg(short = 'r', long)]
    room: Option<u32>,
}

enum Phase {
    CreatingRoom,
    JoiningRoom(u32),
    InRoom { last_refresh: Option<Instant> },
    Playing(GameSession),
    Finished(String),
}

struct App {
    lobby: LobbyClient,
    phase: Phase,
    binds: Keybinds,
    renderer: Renderer,
    log_lines: Vec<String>,
}

impl App {
    fn say(&mut self, line: String) {
        info!("{}", line);
        self.log_lines.push(line);
        if self.log_lines.len() > 20 {
            self.log_lines.remove(0);
        }
    }

    fn fail(&mut self, what: &str, e: LobbyError) {
        error!("{}: {}", what, e);
        self.phase = Phase::Finished(format!("{}: {}", what, e));
    }

    fn frame(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Finished(String::new())) {
            Phase::CreatingRoom => match self.lobby.create_room() {
                Poll::Pending => self.phase = Phase::CreatingRoom,
                Poll::Ready(Ok(room_id)) => {
                    self.say(format!("Created room {}", room_id));
                    self.phase = Phase::JoiningRoom(room_id);
                }
                Poll::Ready(Err(e)) => self.fail("Could not create a room", e),
            },
            Phase::JoiningRoom(room_id) => match self.lobby.join_room(room_id) {
                Poll::Pending => self.phase = Phase::JoiningRoom(room_id),
                Poll::Ready(Ok(true)) => {
                    self.say(format!(
                        "Joined room {}. Enter starts the game (host only), T sends a greeting.",
                        room_id
                    ));
                    self.phase = Phase::InRoom { last_refresh: None };
                }
                Poll::Ready(Ok(false)) => {
                    self.phase = Phase::Finished(format!("Room {} refused the join", room_id));
                }
                Poll::Ready(Err(e)) => self.fail("Could not join the room", e),
            },
            Phase::InRoom { last_refresh } => self.room_frame(last_refresh),
            Phase::Playing(mut session) => {
                session.frame(poll_keys(&self.binds));
                self.renderer.draw_game(&session.snapshot());
                if session.status() == SessionStatus::Playing {
                    self.phase = Phase::Playing(session);
                } else {
                    let status = session.status();
                    session.disconnect();
                    self.phase = Phase::Finished(format!("Game ended: {:?}", status));
                }
                return;
            }
            Phase::Finished(message) => self.phase = Phase::Finished(message),
        }

        let mut lines = self.log_lines.clone();
        if let Phase::Finished(message) = &self.phase {
            lines.push(message.clone());
            lines.push("Press Escape to quit.".to_string());
        }
        self.renderer.draw_lobby(&lines);
    }

    fn room_frame(&mut self, last_refresh: Option<Instant>) {
        if !self.lobby.check_connection() {
            self.phase = Phase::Finished("Lost connection to the lobby".to_string());
            return;
        }

        if is_key_pressed(KeyCode::Enter) {
            if let Err(e) = self.lobby.send_start_game() {
                return self.fail("Could not request start", e);
            }
        }
        if is_key_pressed(KeyCode::T) {
            if let Err(e) = self.lobby.send_chat("hello!") {
                warn!("Chat failed: {}", e);
            }
        }
        while let Ok(Some(line)) = self.lobby.receive_chat() {
            self.say(format!("[{}] {}", line.sender_id, line.text));
        }

        let due = last_refresh.map_or(true, |at| at.elapsed() >= LOBBY_REFRESH);
        if !due {
            self.phase = Phase::InRoom { last_refresh };
            return;
        }

        match self.lobby.get_lobby_state() {
            Ok(LobbyState::GameStarting) => self.start_game(),
            Ok(LobbyState::Waiting { host_id, players }) => {
                let roster: Vec<String> = players
                    .iter()
                    .map(|(id, name)| {
                        if *id == host_id {
                            format!("{} (host)", name)
                        } else {
                            name.clone()
                        }
                    })
                    .collect();
                let line = format!("Players: {}", roster.join(", "));
                match self
                    .log_lines
                    .iter_mut()
                    .find(|existing| existing.starts_with("Players: "))
                {
                    Some(existing) => *existing = line,
                    None => self.log_lines.push(line),
                }
                self.phase = Phase::InRoom {
                    last_refresh: Some(Instant::now()),
                };
            }
            Err(e) => self.fail("Could not read lobby state", e),
        }
    }

    fn start_game(&mut self) {
        let (Some(server), Some(player_id)) = (self.lobby.udp_addr(), self.lobby.player_id())
        else {
            self.phase = Phase::Finished("No session with the server".to_string());
            return;
        };

        match GameSession::start(server, player_id) {
            Ok(session) => {
                self.say("Game starting".to_string());
                self.phase = Phase::Playing(session);
            }
            Err(e) => {
                error!("Could not open the gameplay socket: {}", e);
                self.phase = Phase::Finished(format!("Gameplay socket failed: {}", e));
            }
        }
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Arcade Netcode".to_string(),
        window_width: 1280,
        window_height: 720,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("Connecting to {}:{} as {}", args.server, args.tcp_port, args.username);
    let mut lobby = match LobbyClient::connect((args.server.as_str(), args.tcp_port)) {
        Ok(lobby) => lobby,
        Err(e) => {
            error!("Could not reach the lobby: {}", e);
            return;
        }
    };
    if let Err(e) = lobby.handshake(&args.username) {
        error!("Handshake failed: {}", e);
        return;
    }

    info!("Controls: WASD/arrows to move, Space to shoot (hold to charge), Escape to quit");
    let mut app = App {
        lobby,
        phase: match args.room {
            Some(room_id) => Phase::JoiningRoom(room_id),
            None => Phase::CreatingRoom,
        },
        binds: Keybinds::default(),
        renderer: Renderer::new(),
        log_lines: Vec::new(),
    };

    while !is_key_pressed(KeyCode::Escape) {
        app.frame();
        next_frame().await;
    }

    if let Phase::Playing(mut session) = app.phase {
        session.disconnect();
    }
}
