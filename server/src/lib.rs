//! # Game Server Library
//!
//! Authoritative server for the arcade shooter. Players connect over TCP to
//! a lobby, create or join rooms, and once the host starts the game they
//! exchange gameplay traffic over UDP with the room's simulation.
//!
//! ## Architecture
//!
//! ### Lobby (`lobby`)
//! One OS thread per TCP connection. The thread performs the `CONNECT`
//! handshake, serves room listing/creation/joining, and after a successful
//! join stays in the in-room loop (lobby state polling, start requests,
//! chat). Room policy is delegated to a [`lobby::LobbyHandler`].
//!
//! ### Rooms (`room_manager`, `game`)
//! The [`room_manager::RoomManager`] is the lobby handler and the registry of
//! rooms. Each [`game::Game`] owns its players and entities and runs the
//! per-tick simulation: entity movement, collisions, state broadcast, level
//! progression, enemy spawning and the periodic full-state sync.
//!
//! ### Gameplay transport (`network`)
//! The UDP endpoint from the `shared` crate runs its receive, process and
//! send loops; the [`network::UdpDispatcher`] applies player input as soon as
//! it is popped from the incoming queue. A tokio interval drives the
//! simulation tick for every playing room.
//!
//! ### Operator shell (`shell`)
//! Line commands on standard input for inspecting and managing rooms.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default())?;
//!
//!     // Runs until `exit`, end of stdin, or Ctrl-C.
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod game;
pub mod lobby;
pub mod network;
pub mod room_manager;
pub mod shell;
