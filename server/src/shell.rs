//! Operator shell read from the server's standard input.

use crate::lobby::Sessions;
use crate::room_manager::RoomManager;
use std::fmt::Write as _;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

const USAGE: &str = "commands: help, list_rooms, room_info <id>, create_room, \
                     kick_player <room_id> <player_id>, delete_room <id>, exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    ListRooms,
    RoomInfo(u32),
    CreateRoom,
    KickPlayer { room_id: u32, player_id: u32 },
    DeleteRoom(u32),
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

fn parse_id(word: Option<&str>, usage: &'static str) -> Result<u32, ParseCommandError> {
    word.and_then(|w| w.parse().ok())
        .ok_or(ParseCommandError::Usage(usage))
}

impl FromStr for ShellCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Err(ParseCommandError::Empty);
        };

        let parsed = match command {
            "help" => Self::Help,
            "list_rooms" => Self::ListRooms,
            "create_room" => Self::CreateRoom,
            "exit" => Self::Exit,
            "room_info" => Self::RoomInfo(parse_id(words.next(), "room_info <id>")?),
            "delete_room" => Self::DeleteRoom(parse_id(words.next(), "delete_room <id>")?),
            "kick_player" => {
                const KICK_USAGE: &str = "kick_player <room_id> <player_id>";
                Self::KickPlayer {
                    room_id: parse_id(words.next(), KICK_USAGE)?,
                    player_id: parse_id(words.next(), KICK_USAGE)?,
                }
            }
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };
        Ok(parsed)
    }
}

/// What the shell commands act on.
pub struct ShellContext {
    rooms: Arc<RoomManager>,
    sessions: Sessions,
}

impl ShellContext {
    pub fn new(rooms: Arc<RoomManager>, sessions: Sessions) -> Self {
        Self { rooms, sessions }
    }
}

pub enum ShellOutcome {
    Continue(String),
    Exit,
}

impl ShellCommand {
    pub fn execute(self, context: &ShellContext) -> ShellOutcome {
        let rooms = &context.rooms;
        let output = match self {
            Self::Help => USAGE.to_string(),
            Self::Exit => return ShellOutcome::Exit,
            Self::CreateRoom => format!("created room {}", rooms.create_room()),
            Self::ListRooms => {
                let listed = rooms.list_rooms();
                if listed.is_empty() {
                    "no rooms".to_string()
                } else {
                    let mut out = String::new();
                    for info in listed {
                        let _ = writeln!(
                            out,
                            "room {}: {:?}, {} players",
                            info.id,
                            info.status,
                            info.players.len()
                        );
                    }
                    out.trim_end().to_string()
                }
            }
            Self::RoomInfo(room_id) => match rooms.room_info(room_id) {
                Some(info) => {
                    let mut out = format!(
                        "room {}: {:?}, host {}, level {}, {:.1}s elapsed, {} entities",
                        info.id,
                        info.status,
                        info.host_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        info.level,
                        info.elapsed_secs,
                        info.entity_count
                    );
                    for (player_id, username) in &info.players {
                        let _ = write!(out, "\n  player {} ({})", player_id, username);
                    }
                    out
                }
                None => format!("room {} not found", room_id),
            },
            Self::KickPlayer { room_id, player_id } => {
                if rooms.kick_player(room_id, player_id) {
                    context.sessions.close(player_id);
                    format!("kicked player {} from room {}", player_id, room_id)
                } else {
                    format!("player {} not found in room {}", player_id, room_id)
                }
            }
            Self::DeleteRoom(room_id) => match rooms.delete_room(room_id) {
                Some(kicked) => {
                    for player_id in &kicked {
                        context.sessions.close(*player_id);
                    }
                    format!("deleted room {} ({} players kicked)", room_id, kicked.len())
                }
                None => format!("room {} not found", room_id),
            },
        };
        ShellOutcome::Continue(output)
    }
}

fn respond(line: &str, context: &ShellContext) -> ShellOutcome {
    match line.parse::<ShellCommand>() {
        Ok(command) => command.execute(context),
        Err(ParseCommandError::Empty) => ShellOutcome::Continue(String::new()),
        Err(ParseCommandError::Unknown(word)) => {
            ShellOutcome::Continue(format!("unknown command '{}'. {}", word, USAGE))
        }
        Err(e) => ShellOutcome::Continue(e.to_string()),
    }
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, output: &str) -> io::Result<()> {
    if output.is_empty() {
        return Ok(());
    }
    writer.write_all(output.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Reads commands line by line until `exit` or end of input.
pub async fn run_shell<R, W>(reader: R, mut writer: W, context: &ShellContext) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        match respond(&line, context) {
            ShellOutcome::Continue(output) => reply(&mut writer, &output).await?,
            ShellOutcome::Exit => break,
        }
    }

    Ok(())
}

/// Like [`run_shell`], over lines delivered by [`spawn_stdin_reader`].
pub async fn run_shell_lines<W>(
    mut lines: mpsc::Receiver<String>,
    mut writer: W,
    context: &ShellContext,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        match respond(&line, context) {
            ShellOutcome::Continue(output) => reply(&mut writer, &output).await?,
            ShellOutcome::Exit => break,
        }
    }

    Ok(())
}

/// Reads standard input on a detached thread, so a pending read never
/// holds up runtime shutdown. The channel closes at end of input.
pub fn spawn_stdin_reader() -> io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}
