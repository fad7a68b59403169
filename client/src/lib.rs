//! # Game Client Library
//!
//! Client side of the arcade shooter: the TCP lobby client, the UDP game
//! session, and the predicted game state the front-end draws from.
//!
//! ## Architecture Overview
//!
//! ### Lobby (`lobby`)
//! A blocking `CONNECT` handshake, then a non-blocking socket. Room creation
//! and joining are small state machines advanced once per frame, so the
//! render loop never stalls on the network. Chat relayed by the server is
//! buffered separately from request/response traffic.
//!
//! ### Client-Side Prediction (`game`)
//! Every sampled input moves the local player immediately and is kept in a
//! pending ledger. When the server reports the local player's authoritative
//! position together with the last input tick it processed, the client
//! snaps to that position, drops the acknowledged inputs and replays the
//! rest. Remote players and entities are shown exactly as reported.
//!
//! ### Gameplay transport (`network`)
//! A [`network::GameSession`] runs the shared UDP endpoint: its process loop
//! feeds server datagrams into the game state while the render loop sends
//! one input per frame and a periodic ping for the round-trip estimate.
//!
//! ### Input and rendering (`input`, `rendering`)
//! Keyboard sampling with configurable keybinds and charged-shot detection,
//! and a thin macroquad front-end.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::KeySnapshot;
//! use client::lobby::{LobbyClient, LobbyState};
//! use client::network::GameSession;
//! use std::task::Poll;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut lobby = LobbyClient::connect("127.0.0.1:4242")?;
//!     let session = lobby.handshake("Alice")?;
//!
//!     let room_id = loop {
//!         if let Poll::Ready(room) = lobby.create_room() {
//!             break room?;
//!         }
//!     };
//!     while lobby.join_room(room_id).is_pending() {}
//!
//!     lobby.send_start_game()?;
//!     while lobby.get_lobby_state()? != LobbyState::GameStarting {}
//!
//!     let server = lobby.udp_addr().ok_or("no session")?;
//!     let mut game = GameSession::start(server, session.player_id)?;
//!     game.frame(KeySnapshot::default());
//!     println!("{:?}", game.snapshot());
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod lobby;
pub mod network;
pub mod rendering;
