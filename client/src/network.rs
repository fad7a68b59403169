//! UDP side of the client: a [`GameSession`] owns the endpoint and the
//! predicted game state, and the packet handler feeds server datagrams into
//! that state from the endpoint's process loop.

use crate::game::{ClientGameState, GameSnapshot, SessionStatus};
use crate::input::{InputSampler, KeySnapshot};
use log::{debug, info, trace};
use parking_lot::Mutex;
use shared::protocol::udp::{
    EntityDestroy, EntitySpawn, EntityUpdate, GlobalStateSync, Ping, PlayerDisconnect,
    PlayerInput, PlayerState, Pong, SyncedEntity, UdpOpcode,
};
use shared::protocol::{decode, decode_list, peek_opcode, ProtocolError};
use shared::transport::{Outbox, PacketHandler, UdpEndpoint, DEFAULT_RING_CAPACITY};
use shared::{Clock, InputFlags};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PING_INTERVAL_MS: u32 = 1_000;
const DISCONNECT_FLUSH: Duration = Duration::from_millis(100);

struct ServerPackets {
    server: SocketAddr,
    state: Arc<Mutex<ClientGameState>>,
    clock: Clock,
}

impl ServerPackets {
    fn dispatch(&self, opcode: UdpOpcode, data: &[u8]) -> Result<(), ProtocolError> {
        let now = self.clock.elapsed_ms();
        let mut state = self.state.lock();
        match opcode {
            UdpOpcode::PlayerState => {
                state.apply_player_state(&decode::<PlayerState>(data)?, now);
            }
            UdpOpcode::EntitySpawn => state.apply_spawn(&decode::<EntitySpawn>(data)?),
            UdpOpcode::EntityUpdate => state.apply_update(&decode::<EntityUpdate>(data)?),
            UdpOpcode::EntityDestroy => state.apply_destroy(&decode::<EntityDestroy>(data)?),
            UdpOpcode::GlobalStateSync => {
                let (header, records) = decode_list::<GlobalStateSync, SyncedEntity>(data)?;
                state.apply_sync_fragment(&header, records);
            }
            UdpOpcode::Pong => state.apply_pong(decode::<Pong>(data)?.timestamp, now),
            UdpOpcode::PlayerDisconnect => {
                state.apply_player_disconnect(decode::<PlayerDisconnect>(data)?.player_id)
            }
            UdpOpcode::YouHaveBeenKicked => state.apply_kicked(),
            UdpOpcode::PlayerInput | UdpOpcode::Ping => {
                trace!("Ignoring client-bound {:?}", opcode);
            }
        }
        Ok(())
    }
}

impl PacketHandler for ServerPackets {
    fn handle_packet(&self, data: &[u8], from: SocketAddr, _outbox: &Outbox) {
        if from != self.server {
            trace!("Dropping datagram from unknown peer {}", from);
            return;
        }
        let Some(opcode) = peek_opcode(data) else {
            return;
        };
        let Ok(opcode) = UdpOpcode::try_from(opcode) else {
            trace!("Dropping unknown opcode {}", opcode);
            return;
        };

        if let Err(e) = self.dispatch(opcode, data) {
            debug!("Malformed {:?} from server: {}", opcode, e);
        }
    }
}

pub struct GameSession {
    endpoint: UdpEndpoint,
    outbox: Outbox,
    server: SocketAddr,
    player_id: u32,
    state: Arc<Mutex<ClientGameState>>,
    sampler: InputSampler,
    clock: Clock,
    last_ping_ms: Option<u32>,
}

impl GameSession {
    /// Binds a local socket, starts the transport loops and registers this
    /// endpoint with the server through a `tick = 0` input.
    pub fn start(server: SocketAddr, player_id: u32) -> io::Result<Self> {
        let local: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = UdpEndpoint::bind(local, DEFAULT_RING_CAPACITY)?;

        let clock = Clock::new();
        let state = Arc::new(Mutex::new(ClientGameState::new(player_id)));
        endpoint.start(Arc::new(ServerPackets {
            server,
            state: Arc::clone(&state),
            clock,
        }))?;

        let outbox = endpoint.outbox();
        outbox.queue_message(
            &PlayerInput {
                player_id,
                tick: 0,
                inputs: InputFlags::NONE,
            },
            server,
        );
        info!(
            "Game session for player {} started on {} (server {})",
            player_id,
            endpoint.local_addr(),
            server
        );

        Ok(Self {
            endpoint,
            outbox,
            server,
            player_id,
            state,
            sampler: InputSampler::new(),
            clock,
            last_ping_ms: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Samples one frame of input: predicts it locally, sends it, and sends
    /// a ping when one is due.
    pub fn frame(&mut self, keys: KeySnapshot) {
        let now = self.clock.elapsed_ms();
        if self.status() == SessionStatus::Playing {
            let (tick, inputs) = self.sampler.sample(keys, now);
            self.state.lock().apply_local_input(tick, inputs);
            self.outbox.queue_message(
                &PlayerInput {
                    player_id: self.player_id,
                    tick,
                    inputs,
                },
                self.server,
            );
        }

        let ping_due = self
            .last_ping_ms
            .map_or(true, |last| now.wrapping_sub(last) >= PING_INTERVAL_MS);
        if ping_due {
            self.outbox
                .queue_message(&Ping { timestamp: now }, self.server);
            self.last_ping_ms = Some(now);
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        self.state.lock().snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().status()
    }

    pub fn rtt_ms(&self) -> Option<u32> {
        self.state.lock().rtt_ms()
    }

    pub fn packet_loss(&self) -> f32 {
        self.state.lock().packet_loss()
    }

    /// Tells the server we are leaving, gives the send loop a moment to
    /// flush, then stops the endpoint.
    pub fn disconnect(&mut self) {
        if !self.endpoint.is_running() {
            return;
        }
        if self.status() == SessionStatus::Playing {
            self.outbox.queue_message(
                &PlayerDisconnect {
                    player_id: self.player_id,
                },
                self.server,
            );
        }

        let deadline = Instant::now() + DISCONNECT_FLUSH;
        while !self.outbox.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        self.endpoint.stop();
        info!("Game session for player {} closed", self.player_id);
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::encode;
    use shared::protocol::udp::YouHaveBeenKicked;
    use std::net::UdpSocket;

    fn fake_server() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    /// Reads datagrams until one with `opcode` arrives.
    fn receive(socket: &UdpSocket, opcode: UdpOpcode) -> (Vec<u8>, SocketAddr) {
        let mut buffer = [0u8; 1024];
        loop {
            let (len, from) = socket.recv_from(&mut buffer).unwrap();
            if peek_opcode(&buffer[..len]) == Some(opcode as u8) {
                return (buffer[..len].to_vec(), from);
            }
        }
    }

    fn wait_until(session: &GameSession, done: impl Fn(&GameSession) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done(session) {
            assert!(Instant::now() < deadline, "condition never reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_start_registers_then_sends_inputs() {
        let (server, server_addr) = fake_server();
        let mut session = GameSession::start(server_addr, 3).unwrap();

        let (bytes, _) = receive(&server, UdpOpcode::PlayerInput);
        let registration: PlayerInput = decode(&bytes).unwrap();
        assert_eq!(registration.tick, 0);
        assert!(registration.inputs.is_empty());

        session.frame(KeySnapshot {
            right: true,
            ..KeySnapshot::default()
        });
        let (bytes, _) = receive(&server, UdpOpcode::PlayerInput);
        let input: PlayerInput = decode(&bytes).unwrap();
        assert_eq!(input.player_id, 3);
        assert_eq!(input.tick, 1);
        assert_eq!(input.inputs, InputFlags::RIGHT);

        let local = session.snapshot().players[0];
        assert!(local.local);
        assert_eq!((local.x, local.y), (shared::PLAYER_SPAWN.0 + 5.0, shared::PLAYER_SPAWN.1));
    }

    #[test]
    fn test_ping_pong_sets_rtt() {
        let (server, server_addr) = fake_server();
        let mut session = GameSession::start(server_addr, 1).unwrap();
        session.frame(KeySnapshot::default());

        let (bytes, from) = receive(&server, UdpOpcode::Ping);
        let ping: Ping = decode(&bytes).unwrap();
        server
            .send_to(
                &encode(&Pong {
                    timestamp: ping.timestamp,
                })
                .unwrap(),
                from,
            )
            .unwrap();

        wait_until(&session, |s| s.rtt_ms().is_some());
    }

    #[test]
    fn test_server_state_reaches_game() {
        let (server, server_addr) = fake_server();
        let session = GameSession::start(server_addr, 1).unwrap();
        let (_, from) = receive(&server, UdpOpcode::PlayerInput);

        let state = PlayerState {
            sequence: 1,
            player_id: 2,
            last_processed_tick: 0,
            timestamp: 0,
            x: 640.0,
            y: 360.0,
        };
        server.send_to(&encode(&state).unwrap(), from).unwrap();
        wait_until(&session, |s| s.snapshot().players.len() == 2);

        server
            .send_to(&encode(&YouHaveBeenKicked).unwrap(), from)
            .unwrap();
        wait_until(&session, |s| s.status() == SessionStatus::Kicked);
    }

    #[test]
    fn test_datagrams_from_other_peers_are_ignored() {
        let (server, server_addr) = fake_server();
        let session = GameSession::start(server_addr, 1).unwrap();
        let (_, client_addr) = receive(&server, UdpOpcode::PlayerInput);

        let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
        stranger
            .send_to(&encode(&YouHaveBeenKicked).unwrap(), client_addr)
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(session.status(), SessionStatus::Playing);
    }

    #[test]
    fn test_disconnect_notifies_server() {
        let (server, server_addr) = fake_server();
        let mut session = GameSession::start(server_addr, 9).unwrap();
        session.disconnect();

        let (bytes, _) = receive(&server, UdpOpcode::PlayerDisconnect);
        assert_eq!(decode::<PlayerDisconnect>(&bytes).unwrap().player_id, 9);
        session.disconnect();
    }
}
