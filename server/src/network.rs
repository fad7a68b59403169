//! Server network layer: the UDP packet dispatcher and the orchestration of
//! the UDP endpoint, the TCP lobby and the fixed-rate simulation loop.

use crate::config::ServerConfig;
use crate::lobby::{LobbyServer, Sessions};
use crate::room_manager::RoomManager;
use crate::shell::{run_shell_lines, spawn_stdin_reader, ShellContext};
use log::{debug, info, trace};
use shared::protocol::udp::{Ping, PlayerDisconnect, PlayerInput, Pong, UdpOpcode};
use shared::protocol::{decode, peek_opcode};
use shared::transport::{Outbox, PacketHandler, UdpEndpoint};
use shared::Clock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Routes gameplay datagrams from the process loop to the rooms.
pub struct UdpDispatcher {
    rooms: Arc<RoomManager>,
}

impl UdpDispatcher {
    pub fn new(rooms: Arc<RoomManager>) -> Self {
        Self { rooms }
    }

    fn handle_input(&self, data: &[u8], from: SocketAddr, outbox: &Outbox) {
        let input = match decode::<PlayerInput>(data) {
            Ok(input) => input,
            Err(e) => {
                trace!("Malformed input from {}: {}", from, e);
                return;
            }
        };

        match self.rooms.room_of_player(input.player_id) {
            Some(room) => {
                room.handle_input(&input, from, outbox);
            }
            None => trace!("Input for player {} who is in no room", input.player_id),
        }
    }

    fn handle_disconnect(&self, data: &[u8], from: SocketAddr) {
        let Ok(message) = decode::<PlayerDisconnect>(data) else {
            return;
        };

        // Only the registered endpoint may disconnect its player.
        let registered = self
            .rooms
            .room_of_player(message.player_id)
            .and_then(|room| room.player(message.player_id))
            .and_then(|player| player.addr);
        if registered == Some(from) {
            info!("Player {} left the game", message.player_id);
            self.rooms.remove_player(message.player_id);
        } else {
            debug!(
                "Ignoring disconnect for player {} from {}",
                message.player_id, from
            );
        }
    }
}

impl PacketHandler for UdpDispatcher {
    fn handle_packet(&self, data: &[u8], from: SocketAddr, outbox: &Outbox) {
        let Some(opcode) = peek_opcode(data) else {
            return;
        };

        match UdpOpcode::try_from(opcode) {
            Ok(UdpOpcode::PlayerInput) => self.handle_input(data, from, outbox),
            Ok(UdpOpcode::Ping) => {
                if let Ok(ping) = decode::<Ping>(data) {
                    outbox.queue_message(
                        &Pong {
                            timestamp: ping.timestamp,
                        },
                        from,
                    );
                }
            }
            Ok(UdpOpcode::PlayerDisconnect) => self.handle_disconnect(data, from),
            Ok(other) => trace!("Dropping unexpected {:?} from {}", other, from),
            Err(_) => trace!("Dropping unknown opcode {} from {}", opcode, from),
        }
    }
}

/// Main server: owns the UDP endpoint, the lobby and the room registry.
pub struct Server {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    udp: UdpEndpoint,
    lobby: LobbyServer,
}

impl Server {
    /// Binds both sockets. Nothing runs until [`Server::start`].
    pub fn bind(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let clock = Clock::new();
        let udp = UdpEndpoint::bind(config.udp_addr(), config.ring_capacity)?;
        let rooms = Arc::new(RoomManager::new(
            config.room_settings(),
            clock,
            udp.outbox(),
        ));

        let lobby = LobbyServer::bind(
            config.tcp_addr(),
            rooms.clone(),
            udp.local_addr().port(),
            clock,
        )?;

        Ok(Self {
            config,
            rooms,
            udp,
            lobby,
        })
    }

    pub fn start(&mut self) -> std::io::Result<()> {
        self.udp
            .start(Arc::new(UdpDispatcher::new(Arc::clone(&self.rooms))))?;
        self.lobby.start()?;
        info!(
            "Server started: lobby on {}, gameplay on {}",
            self.lobby.local_addr(),
            self.udp.local_addr()
        );
        Ok(())
    }

    pub fn rooms(&self) -> Arc<RoomManager> {
        Arc::clone(&self.rooms)
    }

    pub fn sessions(&self) -> Sessions {
        self.lobby.sessions()
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.lobby.local_addr()
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp.local_addr()
    }

    /// Starts everything and runs until the operator shell exits, stdin
    /// reaches EOF or Ctrl-C is pressed.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.start()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticker = tokio::spawn(run_tick_loop(
            self.rooms(),
            self.config.tick_duration(),
            shutdown_rx,
        ));

        let context = ShellContext::new(self.rooms(), self.sessions());
        let stdin = spawn_stdin_reader()?;
        let stdout = tokio::io::stdout();

        tokio::select! {
            result = run_shell_lines(stdin, stdout, &context) => result?,
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }

        info!("Shutting down");
        let _ = shutdown_tx.send(true);
        ticker.await?;
        self.stop();
        Ok(())
    }

    pub fn stop(&mut self) {
        self.lobby.stop();
        self.udp.stop();
        info!("Server stopped");
    }
}

/// Ticks every playing room at a fixed rate until `shutdown` flips.
pub async fn run_tick_loop(
    rooms: Arc<RoomManager>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let dt = tick.as_secs_f32();
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                rooms.tick_all(dt);
                ticks += 1;
                if ticks % 600 == 0 {
                    debug!("Tick {}: {} rooms", ticks, rooms.room_count());
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::RoomSettings;
    use shared::InputFlags;

    fn setup() -> (Arc<RoomManager>, UdpDispatcher, Outbox) {
        let outbox = Outbox::new(1024);
        let rooms = Arc::new(RoomManager::new(
            RoomSettings::default(),
            Clock::new(),
            outbox.clone(),
        ));
        let dispatcher = UdpDispatcher::new(Arc::clone(&rooms));
        (rooms, dispatcher, outbox)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn input_bytes(player_id: u32, tick: u32, inputs: InputFlags) -> Vec<u8> {
        shared::protocol::encode(&PlayerInput {
            player_id,
            tick,
            inputs,
        })
        .unwrap()
    }

    #[test]
    fn test_ping_is_answered_with_same_timestamp() {
        let (_, dispatcher, outbox) = setup();
        let ping = shared::protocol::encode(&Ping { timestamp: 1234 }).unwrap();

        dispatcher.handle_packet(&ping, addr(5000), &outbox);

        let reply = outbox.pop().unwrap();
        assert_eq!(reply.addr, addr(5000));
        assert_eq!(decode::<Pong>(reply.payload()).unwrap().timestamp, 1234);
    }

    #[test]
    fn test_input_reaches_room() {
        let (rooms, dispatcher, outbox) = setup();
        let room_id = rooms.create_room();
        rooms.join_room(1, "Alice", room_id);
        rooms.room(room_id).unwrap().start(1);

        dispatcher.handle_packet(&input_bytes(1, 0, InputFlags::NONE), addr(5001), &outbox);
        dispatcher.handle_packet(&input_bytes(1, 1, InputFlags::DOWN), addr(5001), &outbox);

        let player = rooms.room(room_id).unwrap().player(1).unwrap();
        assert_eq!(player.addr, Some(addr(5001)));
        assert_eq!(player.last_processed_tick, 1);
    }

    #[test]
    fn test_garbage_is_dropped() {
        let (_, dispatcher, outbox) = setup();
        dispatcher.handle_packet(&[], addr(5002), &outbox);
        dispatcher.handle_packet(&[200, 1, 2], addr(5002), &outbox);
        dispatcher.handle_packet(&[UdpOpcode::PlayerInput as u8, 1], addr(5002), &outbox);
        dispatcher.handle_packet(&[UdpOpcode::Pong as u8, 0, 0, 0, 0], addr(5002), &outbox);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_disconnect_requires_registered_address() {
        let (rooms, dispatcher, outbox) = setup();
        let room_id = rooms.create_room();
        rooms.join_room(1, "Alice", room_id);
        rooms.join_room(2, "Bob", room_id);
        dispatcher.handle_packet(&input_bytes(1, 0, InputFlags::NONE), addr(5003), &outbox);

        let leave = shared::protocol::encode(&PlayerDisconnect { player_id: 1 }).unwrap();
        dispatcher.handle_packet(&leave, addr(6666), &outbox);
        assert!(rooms.room_of_player(1).is_some());

        dispatcher.handle_packet(&leave, addr(5003), &outbox);
        assert!(rooms.room_of_player(1).is_none());
        assert_eq!(rooms.room(room_id).unwrap().host_id(), Some(2));
    }

    #[tokio::test]
    async fn test_tick_loop_stops_on_shutdown() {
        let (rooms, _, _) = setup();
        let room_id = rooms.create_room();
        rooms.join_room(1, "Alice", room_id);
        rooms.room(room_id).unwrap().start(1);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticker = tokio::spawn(run_tick_loop(
            Arc::clone(&rooms),
            Duration::from_millis(1),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        ticker.await.unwrap();

        assert!(rooms.room_info(room_id).unwrap().elapsed_secs > 0.0);
    }

    #[test]
    fn test_server_binds_and_stops() {
        let mut server = Server::bind(ServerConfig::local()).unwrap();
        server.start().unwrap();
        assert_ne!(server.tcp_addr().port(), 0);
        assert_ne!(server.udp_addr().port(), 0);
        server.stop();
    }
}
