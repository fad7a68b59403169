//! TCP lobby server.
//!
//! One accept thread plus one thread per connection. A connection first
//! performs the `CONNECT` handshake, then serves lobby requests until it
//! joins a room, after which the same thread serves in-room requests until
//! the socket fails. Room policy lives behind [`LobbyHandler`]; this module
//! only speaks the protocol.

use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::protocol::tcp::{
    frame_length, read_body, read_opcode, write_message, ChatMessage, ConnectRequest,
    ConnectResponse, CreateRoomResponse, ErrorResponse, GameStartingNotification,
    JoinRoomRequest, JoinRoomResponse, LobbyPlayerRecord, LobbyStateHeader, MessageText,
    RoomListHeader, RoomRecord, TcpOpcode, Username,
};
use shared::protocol::{encode_list, ProtocolError, WireMessage};
use shared::Clock;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Host and roster of a room still in its lobby phase.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbySnapshot {
    pub host_id: u32,
    pub players: Vec<(u32, String)>,
}

/// Room-side callbacks the lobby server delegates to.
pub trait LobbyHandler: Send + Sync + 'static {
    /// Returns the new room id, or `None` when no room could be created.
    fn on_create_room(&self, player_id: u32) -> Option<u32>;
    fn on_join_room(&self, player_id: u32, username: &str, room_id: u32) -> bool;
    fn on_get_rooms(&self) -> Vec<RoomRecord>;
    fn on_get_lobby_state(&self, room_id: u32) -> Option<LobbySnapshot>;
    fn on_start_game(&self, player_id: u32, room_id: u32) -> bool;
    fn is_game_starting(&self, room_id: u32) -> bool;
    fn on_player_disconnect(&self, player_id: u32);
    fn room_members(&self, room_id: u32) -> Vec<u32>;
}

type Writer = Arc<Mutex<TcpStream>>;

/// Write handles of every connection that completed its handshake.
#[derive(Clone, Default)]
pub struct Sessions {
    writers: Arc<Mutex<HashMap<u32, Writer>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, player_id: u32, writer: Writer) {
        self.writers.lock().insert(player_id, writer);
    }

    fn remove(&self, player_id: u32) {
        self.writers.lock().remove(&player_id);
    }

    fn writer(&self, player_id: u32) -> Option<Writer> {
        self.writers.lock().get(&player_id).cloned()
    }

    pub fn contains(&self, player_id: u32) -> bool {
        self.writers.lock().contains_key(&player_id)
    }

    pub fn len(&self) -> usize {
        self.writers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends a message on a player's connection.
    pub fn send<M: WireMessage>(&self, player_id: u32, message: &M) -> bool {
        match self.writer(player_id) {
            Some(writer) => write_message(&mut *writer.lock(), message).is_ok(),
            None => false,
        }
    }

    /// Shuts the player's socket down; its connection thread then exits and
    /// reports the disconnect.
    pub fn close(&self, player_id: u32) -> bool {
        match self.writers.lock().remove(&player_id) {
            Some(writer) => {
                let _ = writer.lock().shutdown(Shutdown::Both);
                info!("Closed lobby session of player {}", player_id);
                true
            }
            None => false,
        }
    }

    fn close_all(&self) {
        for (_, writer) in self.writers.lock().drain() {
            let _ = writer.lock().shutdown(Shutdown::Both);
        }
    }
}

struct Shared {
    handler: Arc<dyn LobbyHandler>,
    sessions: Sessions,
    udp_port: u16,
    clock: Clock,
    running: AtomicBool,
    next_player_id: AtomicU32,
    next_connection_id: AtomicU64,
    /// Every accepted socket, handshake done or not, so `stop` can unblock it.
    live: Mutex<HashMap<u64, TcpStream>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

pub struct LobbyServer {
    shared: Arc<Shared>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    accept_thread: Option<JoinHandle<()>>,
}

impl LobbyServer {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        handler: Arc<dyn LobbyHandler>,
        udp_port: u16,
        clock: Clock,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            shared: Arc::new(Shared {
                handler,
                sessions: Sessions::new(),
                udp_port,
                clock,
                running: AtomicBool::new(false),
                next_player_id: AtomicU32::new(1),
                next_connection_id: AtomicU64::new(0),
                live: Mutex::new(HashMap::new()),
                workers: Mutex::new(Vec::new()),
            }),
            listener: Some(listener),
            local_addr,
            accept_thread: None,
        })
    }

    pub fn start(&mut self) -> io::Result<()> {
        let Some(listener) = self.listener.take() else {
            return Ok(());
        };
        listener.set_nonblocking(true)?;
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        self.accept_thread = Some(
            thread::Builder::new()
                .name("lobby-accept".into())
                .spawn(move || accept_loop(&shared, &listener))?,
        );

        info!("Lobby server listening on {}", self.local_addr);
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> Sessions {
        self.shared.sessions.clone()
    }

    pub fn close_session(&self, player_id: u32) -> bool {
        self.shared.sessions.close(player_id)
    }

    /// Stops accepting, shuts every socket down and joins all threads.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                warn!("Lobby accept thread panicked");
            }
        }

        self.shared.sessions.close_all();
        for (_, stream) in self.shared.live.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        let workers: Vec<JoinHandle<()>> = self.shared.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("Lobby connection thread panicked");
            }
        }
    }
}

impl Drop for LobbyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(shared: &Arc<Shared>, listener: &TcpListener) {
    while shared.running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = spawn_connection(shared, stream, peer) {
                    warn!("Failed to set up connection from {}: {}", peer, e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("Accept failed: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn spawn_connection(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;

    let connection_id = shared.next_connection_id.fetch_add(1, Ordering::Relaxed);
    shared.live.lock().insert(connection_id, stream.try_clone()?);

    let worker_shared = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("lobby-conn-{}", connection_id))
        .spawn(move || {
            serve_connection(&worker_shared, stream, peer);
            worker_shared.live.lock().remove(&connection_id);
        })?;

    let mut workers = shared.workers.lock();
    workers.retain(|handle| !handle.is_finished());
    workers.push(handle);
    debug!("Accepted connection {} from {}", connection_id, peer);
    Ok(())
}

fn serve_connection(shared: &Shared, mut reader: TcpStream, peer: SocketAddr) {
    let writer: Writer = match reader.try_clone() {
        Ok(stream) => Arc::new(Mutex::new(stream)),
        Err(e) => {
            warn!("Failed to clone stream from {}: {}", peer, e);
            return;
        }
    };

    let username = match handshake(&mut reader, &writer) {
        Ok(request) => request.username.as_str().into_owned(),
        Err(e) => {
            debug!("Handshake with {} failed: {}", peer, e);
            let _ = writer.lock().shutdown(Shutdown::Both);
            return;
        }
    };

    let player_id = shared.next_player_id.fetch_add(1, Ordering::Relaxed);
    let response = ConnectResponse {
        player_id,
        udp_port: shared.udp_port,
        server_time_ms: shared.clock.elapsed_ms(),
    };
    if let Err(e) = write_message(&mut *writer.lock(), &response) {
        debug!("Failed to answer handshake from {}: {}", peer, e);
        return;
    }

    shared.sessions.insert(player_id, Arc::clone(&writer));
    info!("Player {} ({}) connected from {}", player_id, username, peer);

    let mut connection = Connection {
        shared,
        reader,
        writer,
        player_id,
        username,
    };
    if let Err(e) = connection.serve_lobby() {
        debug!("Connection of player {} ended: {}", player_id, e);
    }

    shared.sessions.remove(player_id);
    shared.handler.on_player_disconnect(player_id);
    info!("Player {} disconnected", player_id);
}

fn handshake(reader: &mut TcpStream, writer: &Writer) -> Result<ConnectRequest, ProtocolError> {
    let opcode = read_opcode(reader)?;
    if opcode != TcpOpcode::Connect as u8 {
        let error = ErrorResponse {
            message: MessageText::new("expected CONNECT"),
        };
        let _ = write_message(&mut *writer.lock(), &error);
        return Err(ProtocolError::UnexpectedOpcode {
            expected: TcpOpcode::Connect as u8,
            found: opcode,
        });
    }
    read_body(reader)
}

struct Connection<'a> {
    shared: &'a Shared,
    reader: TcpStream,
    writer: Writer,
    player_id: u32,
    username: String,
}

impl Connection<'_> {
    fn serve_lobby(&mut self) -> Result<(), ProtocolError> {
        loop {
            let opcode = read_opcode(&mut self.reader)?;
            match TcpOpcode::try_from(opcode) {
                Ok(TcpOpcode::ListRooms) => {
                    let rooms = self.shared.handler.on_get_rooms();
                    let header = RoomListHeader {
                        count: rooms.len() as u32,
                    };
                    self.send_raw(&encode_list(&header, &rooms)?)?;
                }
                Ok(TcpOpcode::CreateRoom) => {
                    let room_id = self
                        .shared
                        .handler
                        .on_create_room(self.player_id)
                        .and_then(|id| i32::try_from(id).ok())
                        .unwrap_or(-1);
                    self.send(&CreateRoomResponse { room_id })?;
                }
                Ok(TcpOpcode::JoinRoom) => {
                    let request: JoinRoomRequest = read_body(&mut self.reader)?;
                    let joined = self.shared.handler.on_join_room(
                        self.player_id,
                        &self.username,
                        request.room_id,
                    );
                    self.send(&JoinRoomResponse {
                        status: joined as u8,
                    })?;
                    if joined {
                        return self.serve_room(request.room_id);
                    }
                }
                Ok(other) => {
                    debug!(
                        "Player {} sent {:?} outside a room, ignoring",
                        self.player_id, other
                    );
                    self.skip_body(opcode)?;
                }
                Err(_) => debug!("Player {} sent unknown opcode {}", self.player_id, opcode),
            }
        }
    }

    fn serve_room(&mut self, room_id: u32) -> Result<(), ProtocolError> {
        loop {
            let opcode = read_opcode(&mut self.reader)?;
            match TcpOpcode::try_from(opcode) {
                Ok(TcpOpcode::StartGameRequest) => {
                    self.shared.handler.on_start_game(self.player_id, room_id);
                }
                Ok(TcpOpcode::GetLobbyState) => self.send_lobby_state(room_id)?,
                Ok(TcpOpcode::ChatMessage) => {
                    let message: ChatMessage = read_body(&mut self.reader)?;
                    self.relay_chat(room_id, message.text);
                }
                Ok(other) => {
                    debug!(
                        "Player {} sent {:?} inside room {}, ignoring",
                        self.player_id, other, room_id
                    );
                    self.skip_body(opcode)?;
                }
                Err(_) => debug!("Player {} sent unknown opcode {}", self.player_id, opcode),
            }
        }
    }

    fn send_lobby_state(&self, room_id: u32) -> Result<(), ProtocolError> {
        if self.shared.handler.is_game_starting(room_id) {
            return self.send(&GameStartingNotification);
        }

        let snapshot = self
            .shared
            .handler
            .on_get_lobby_state(room_id)
            .unwrap_or(LobbySnapshot {
                host_id: 0,
                players: Vec::new(),
            });
        let records: Vec<LobbyPlayerRecord> = snapshot
            .players
            .iter()
            .map(|(player_id, username)| LobbyPlayerRecord {
                player_id: *player_id,
                username: Username::new(username),
            })
            .collect();
        let header = LobbyStateHeader {
            host_id: snapshot.host_id,
            count: records.len() as u32,
        };
        self.send_raw(&encode_list(&header, &records)?)
    }

    fn relay_chat(&self, room_id: u32, text: MessageText) {
        let message = ChatMessage {
            sender_id: self.player_id,
            text,
        };
        for member in self.shared.handler.room_members(room_id) {
            if member != self.player_id && !self.shared.sessions.send(member, &message) {
                debug!("Could not relay chat to player {}", member);
            }
        }
    }

    /// Discards the rest of a message we do not serve here. List messages
    /// are read up to their header to learn their length.
    fn skip_body(&mut self, opcode: u8) -> Result<(), ProtocolError> {
        let mut frame = vec![opcode];
        let length = loop {
            if let Some(length) = frame_length(&frame)? {
                break length;
            }
            let mut byte = [0u8; 1];
            self.reader.read_exact(&mut byte)?;
            frame.push(byte[0]);
        };

        let remaining = length.saturating_sub(frame.len()) as u64;
        let skipped = io::copy(&mut (&mut self.reader).take(remaining), &mut io::sink())?;
        if skipped < remaining {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }

    fn send<M: WireMessage>(&self, message: &M) -> Result<(), ProtocolError> {
        write_message(&mut *self.writer.lock(), message)
    }

    fn send_raw(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.lock().write_all(bytes)?;
        Ok(())
    }
}
