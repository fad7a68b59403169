//! Client side of the TCP lobby protocol.
//!
//! The handshake is blocking. Afterwards the socket is switched to
//! non-blocking mode so the render loop can drive room creation and joining
//! one step per frame through [`LobbyClient::create_room`] and
//! [`LobbyClient::join_room`]. Chat frames are pulled out of the byte stream
//! as soon as they are framed and never reach the request state machine.

use log::{debug, info, warn};
use shared::protocol::tcp::{
    frame_length, read_body, read_opcode, write_message, ChatMessage, ConnectRequest,
    ConnectResponse, CreateRoom, CreateRoomResponse, ErrorResponse, GameStartingNotification,
    GetLobbyState, JoinRoomRequest, JoinRoomResponse, ListRooms, LobbyPlayerRecord,
    LobbyStateHeader, MessageText, RoomListHeader, RoomRecord, RoomStatus, StartGameRequest,
    TcpOpcode, Username,
};
use shared::protocol::{decode, decode_list, ProtocolError, WireMessage};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::task::Poll;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const BLOCKING_DEADLINE: Duration = Duration::from_secs(2);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("server closed the connection")]
    Disconnected,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("server refused the connection: {0}")]
    Refused(String),
    #[error("room request refused")]
    RoomRejected,
    #[error("another request is still in flight")]
    Busy,
    #[error("timed out waiting for the server")]
    Timeout,
}

/// A room as listed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: u32,
    pub player_count: u32,
    pub status: Option<RoomStatus>,
}

impl From<RoomRecord> for RoomSummary {
    fn from(record: RoomRecord) -> Self {
        Self {
            room_id: record.room_id,
            player_count: record.player_count,
            status: RoomStatus::from_wire(record.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyState {
    /// The host started the game; switch to UDP.
    GameStarting,
    Waiting {
        host_id: u32,
        players: Vec<(u32, String)>,
    },
}

impl LobbyState {
    pub fn contains(&self, player_id: u32) -> bool {
        match self {
            Self::GameStarting => false,
            Self::Waiting { players, .. } => players.iter().any(|(id, _)| *id == player_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub sender_id: u32,
    pub text: String,
}

/// Progress of the one request/response exchange allowed in flight.
///
/// Every stage remembers the response opcode it is waiting for, so a caller
/// polling a different request gets [`LobbyError::Busy`] instead of stealing
/// the answer.
#[derive(Debug, Default)]
enum PendingRequest {
    #[default]
    Idle,
    SentRequest {
        expected: u8,
    },
    ReceivedType {
        expected: u8,
    },
    ReceivedData {
        expected: u8,
        frame: Vec<u8>,
    },
}

impl PendingRequest {
    fn expected(&self) -> Option<u8> {
        match self {
            Self::Idle => None,
            Self::SentRequest { expected }
            | Self::ReceivedType { expected }
            | Self::ReceivedData { expected, .. } => Some(*expected),
        }
    }
}

/// Reassembles whole frames out of a non-blocking byte stream.
#[derive(Debug, Default)]
struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    /// Reads whatever the socket has right now.
    fn fill<R: Read>(&mut self, stream: &mut R) -> Result<(), LobbyError> {
        let mut chunk = [0u8; 512];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Err(LobbyError::Disconnected),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// First opcode in the buffer. Bytes that start no known frame are
    /// dropped first.
    fn peek_opcode(&mut self) -> Option<u8> {
        while let Some(&opcode) = self.buffer.first() {
            if TcpOpcode::try_from(opcode).is_ok() {
                return Some(opcode);
            }
            warn!("Dropping byte {} with unknown opcode from lobby stream", opcode);
            self.buffer.remove(0);
        }
        None
    }

    /// Splits off the first frame once all of its bytes are buffered.
    fn take_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.peek_opcode().is_none() {
            return Ok(None);
        }
        match frame_length(&self.buffer)? {
            Some(len) if self.buffer.len() >= len => {
                let rest = self.buffer.split_off(len);
                Ok(Some(std::mem::replace(&mut self.buffer, rest)))
            }
            _ => Ok(None),
        }
    }
}

pub struct LobbyClient {
    stream: TcpStream,
    server_addr: SocketAddr,
    reader: FrameReader,
    pending: PendingRequest,
    chat: VecDeque<ChatLine>,
    session: Option<ConnectResponse>,
    room_id: Option<u32>,
    joining: Option<u32>,
}

impl LobbyClient {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, LobbyError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let server_addr = stream.peer_addr()?;
        debug!("Connected to lobby at {}", server_addr);

        Ok(Self {
            stream,
            server_addr,
            reader: FrameReader::default(),
            pending: PendingRequest::Idle,
            chat: VecDeque::new(),
            session: None,
            room_id: None,
            joining: None,
        })
    }

    /// Sends `CONNECT` and waits for the answer, then turns the socket
    /// non-blocking for everything that follows.
    pub fn handshake(&mut self, username: &str) -> Result<ConnectResponse, LobbyError> {
        self.stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        write_message(
            &mut self.stream,
            &ConnectRequest {
                username: Username::new(username),
            },
        )?;

        let opcode = read_opcode(&mut self.stream).map_err(timeout_or_protocol)?;
        let response = match TcpOpcode::try_from(opcode)? {
            TcpOpcode::ConnectOk => {
                read_body::<ConnectResponse, _>(&mut self.stream).map_err(timeout_or_protocol)?
            }
            TcpOpcode::ConnectError => {
                let error: ErrorResponse =
                    read_body(&mut self.stream).map_err(timeout_or_protocol)?;
                return Err(LobbyError::Refused(error.message.as_str().into_owned()));
            }
            _ => {
                return Err(ProtocolError::UnexpectedOpcode {
                    expected: ConnectResponse::OPCODE,
                    found: opcode,
                }
                .into())
            }
        };

        self.stream.set_read_timeout(None)?;
        self.stream.set_nonblocking(true)?;
        info!(
            "Logged in as player {} (gameplay port {})",
            response.player_id, response.udp_port
        );
        self.session = Some(response);
        Ok(response)
    }

    pub fn player_id(&self) -> Option<u32> {
        self.session.map(|session| session.player_id)
    }

    /// Where the server expects gameplay datagrams.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.session
            .map(|session| SocketAddr::new(self.server_addr.ip(), session.udp_port))
    }

    pub fn server_time_ms(&self) -> Option<u32> {
        self.session.map(|session| session.server_time_ms)
    }

    pub fn room_id(&self) -> Option<u32> {
        self.room_id
    }

    /// Advances a `CREATE_ROOM` exchange by one step.
    pub fn create_room(&mut self) -> Poll<Result<u32, LobbyError>> {
        self.poll_request::<_, CreateRoomResponse>(&CreateRoom)
            .map(|result| {
                result.and_then(|response| {
                    u32::try_from(response.room_id).map_err(|_| LobbyError::RoomRejected)
                })
            })
    }

    /// Advances a `JOIN_ROOM` exchange by one step. `Ready(Ok(false))` means
    /// the server refused the join.
    /// Polling a different room while a join is in flight is [`LobbyError::Busy`].
    pub fn join_room(&mut self, room_id: u32) -> Poll<Result<bool, LobbyError>> {
        if self.joining.is_some_and(|joining| joining != room_id) {
            return Poll::Ready(Err(LobbyError::Busy));
        }

        let poll = self
            .poll_request::<_, JoinRoomResponse>(&JoinRoomRequest { room_id })
            .map(|result| result.map(|response| response.status != 0));

        match &poll {
            Poll::Pending => self.joining = Some(room_id),
            Poll::Ready(result) => {
                self.joining = None;
                if let Ok(true) = result {
                    info!("Joined room {}", room_id);
                    self.room_id = Some(room_id);
                }
            }
        }
        poll
    }

    pub fn list_rooms(&mut self) -> Result<Vec<RoomSummary>, LobbyError> {
        self.ensure_idle()?;
        write_message(&mut self.stream, &ListRooms)?;

        let frame = self.wait_for(|opcode| opcode == RoomListHeader::OPCODE)?;
        let (_, records) = decode_list::<RoomListHeader, RoomRecord>(&frame)?;
        Ok(records.into_iter().map(RoomSummary::from).collect())
    }

    pub fn get_lobby_state(&mut self) -> Result<LobbyState, LobbyError> {
        self.ensure_idle()?;
        write_message(&mut self.stream, &GetLobbyState)?;

        let frame = self.wait_for(|opcode| {
            opcode == LobbyStateHeader::OPCODE || opcode == GameStartingNotification::OPCODE
        })?;
        if frame.first() == Some(&GameStartingNotification::OPCODE) {
            return Ok(LobbyState::GameStarting);
        }

        let (header, records) = decode_list::<LobbyStateHeader, LobbyPlayerRecord>(&frame)?;
        Ok(LobbyState::Waiting {
            host_id: header.host_id,
            players: records
                .into_iter()
                .map(|record| (record.player_id, record.username.as_str().into_owned()))
                .collect(),
        })
    }

    pub fn send_start_game(&mut self) -> Result<(), LobbyError> {
        write_message(&mut self.stream, &StartGameRequest)?;
        Ok(())
    }

    pub fn send_chat(&mut self, text: &str) -> Result<(), LobbyError> {
        let message = ChatMessage {
            sender_id: self.player_id().unwrap_or(0),
            text: MessageText::new(text),
        };
        write_message(&mut self.stream, &message)?;
        Ok(())
    }

    /// Returns the oldest relayed chat line, reading the socket first.
    pub fn receive_chat(&mut self) -> Result<Option<ChatLine>, LobbyError> {
        self.pump()?;
        Ok(self.chat.pop_front())
    }

    /// False once the server has closed the connection or the socket failed.
    pub fn check_connection(&mut self) -> bool {
        match self.pump() {
            Ok(()) => true,
            Err(e) => {
                warn!("Lobby connection lost: {}", e);
                false
            }
        }
    }

    fn ensure_idle(&self) -> Result<(), LobbyError> {
        match self.pending {
            PendingRequest::Idle => Ok(()),
            _ => Err(LobbyError::Busy),
        }
    }

    /// Reads the socket and moves every complete chat frame to the inbox.
    fn pump(&mut self) -> Result<(), LobbyError> {
        self.reader.fill(&mut self.stream)?;
        while self.reader.peek_opcode() == Some(ChatMessage::OPCODE) {
            let Some(frame) = self.reader.take_frame()? else {
                break;
            };
            let message: ChatMessage = decode(&frame)?;
            self.chat.push_back(ChatLine {
                sender_id: message.sender_id,
                text: message.text.as_str().into_owned(),
            });
        }
        Ok(())
    }

    /// Next complete non-chat frame, or `None` if it has not fully arrived.
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, LobbyError> {
        self.pump()?;
        Ok(self.reader.take_frame()?)
    }

    fn poll_request<Req, Resp>(&mut self, request: &Req) -> Poll<Result<Resp, LobbyError>>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        if let Some(expected) = self.pending.expected() {
            if expected != Resp::OPCODE {
                return Poll::Ready(Err(LobbyError::Busy));
            }
        }

        match self.step::<Req, Resp>(request) {
            Ok(Some(response)) => Poll::Ready(Ok(response)),
            Ok(None) => Poll::Pending,
            Err(e) => {
                self.pending = PendingRequest::Idle;
                Poll::Ready(Err(e))
            }
        }
    }

    fn step<Req, Resp>(&mut self, request: &Req) -> Result<Option<Resp>, LobbyError>
    where
        Req: WireMessage,
        Resp: WireMessage,
    {
        match std::mem::take(&mut self.pending) {
            PendingRequest::Idle => {
                write_message(&mut self.stream, request)?;
                self.pending = PendingRequest::SentRequest {
                    expected: Resp::OPCODE,
                };
            }
            PendingRequest::SentRequest { expected } => {
                self.pump()?;
                self.pending = match self.reader.peek_opcode() {
                    Some(opcode) if opcode == expected => {
                        PendingRequest::ReceivedType { expected }
                    }
                    Some(opcode) => {
                        self.discard_frame(opcode)?;
                        PendingRequest::SentRequest { expected }
                    }
                    None => PendingRequest::SentRequest { expected },
                };
            }
            PendingRequest::ReceivedType { expected } => {
                self.pending = match self.next_frame()? {
                    Some(frame) => PendingRequest::ReceivedData { expected, frame },
                    None => PendingRequest::ReceivedType { expected },
                };
            }
            PendingRequest::ReceivedData { frame, .. } => return Ok(Some(decode(&frame)?)),
        }
        Ok(None)
    }

    fn discard_frame(&mut self, opcode: u8) -> Result<(), LobbyError> {
        if let Some(frame) = self.reader.take_frame()? {
            debug!("Ignoring unexpected frame {} ({} bytes)", opcode, frame.len());
        }
        Ok(())
    }

    /// Blocks until a frame accepted by `accept` arrives, discarding others.
    fn wait_for(&mut self, accept: impl Fn(u8) -> bool) -> Result<Vec<u8>, LobbyError> {
        let deadline = Instant::now() + BLOCKING_DEADLINE;
        loop {
            if let Some(frame) = self.next_frame()? {
                match frame.first() {
                    Some(&opcode) if accept(opcode) => return Ok(frame),
                    Some(&opcode) => debug!("Ignoring unexpected frame {}", opcode),
                    None => {}
                }
                continue;
            }
            if Instant::now() >= deadline {
                return Err(LobbyError::Timeout);
            }
            thread::sleep(POLL_BACKOFF);
        }
    }
}

fn timeout_or_protocol(error: ProtocolError) -> LobbyError {
    match error {
        ProtocolError::Io(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            LobbyError::Timeout
        }
        ProtocolError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            LobbyError::Disconnected
        }
        other => LobbyError::Protocol(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::encode;
    use shared::protocol::encode_list;
    use std::io::Write;
    use std::net::TcpListener;

    /// A listener plus a connected client that skipped the handshake.
    fn pair() -> (LobbyClient, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = LobbyClient::connect(listener.local_addr().unwrap()).unwrap();
        client.stream.set_nonblocking(true).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn poll_until<T>(mut poll: impl FnMut() -> Poll<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Poll::Ready(value) = poll() {
                return value;
            }
            assert!(Instant::now() < deadline, "request never completed");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_frame_reader_splits_frames() {
        let mut reader = FrameReader::default();
        let mut bytes = encode(&JoinRoomResponse { status: 1 }).unwrap();
        bytes.extend(encode(&CreateRoomResponse { room_id: 3 }).unwrap());
        reader.buffer.extend_from_slice(&bytes[..4]);

        assert_eq!(reader.take_frame().unwrap().unwrap().len(), 2);
        assert!(reader.take_frame().unwrap().is_none());

        reader.buffer.extend_from_slice(&bytes[4..]);
        let frame = reader.take_frame().unwrap().unwrap();
        assert_eq!(decode::<CreateRoomResponse>(&frame).unwrap().room_id, 3);
        assert!(reader.buffer.is_empty());
    }

    #[test]
    fn test_frame_reader_skips_unknown_opcodes() {
        let mut reader = FrameReader::default();
        reader.buffer.extend_from_slice(&[0xEE, 0x00]);
        assert!(reader.take_frame().unwrap().is_none());
        assert!(reader.buffer.is_empty());

        reader.buffer.push(0xEE);
        reader
            .buffer
            .extend(encode(&JoinRoomResponse { status: 1 }).unwrap());
        let frame = reader.take_frame().unwrap().unwrap();
        assert_eq!(decode::<JoinRoomResponse>(&frame).unwrap().status, 1);
        assert!(reader.take_frame().unwrap().is_none());
    }

    #[test]
    fn test_join_after_garbage_on_stream() {
        let (mut client, mut server) = pair();
        assert!(client.join_room(2).is_pending());
        server.write_all(&[0xEE, 0xEF]).unwrap();
        write_message(&mut server, &JoinRoomResponse { status: 1 }).unwrap();

        assert!(poll_until(|| client.join_room(2)).unwrap());
        assert!(client.check_connection());
    }

    #[test]
    fn test_handshake_reads_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: ConnectRequest = shared::protocol::tcp::read_message(&mut stream).unwrap();
            assert_eq!(request.username.as_str(), "Alice");
            write_message(
                &mut stream,
                &ConnectResponse {
                    player_id: 1,
                    udp_port: 5252,
                    server_time_ms: 42,
                },
            )
            .unwrap();
            stream
        });

        let mut client = LobbyClient::connect(addr).unwrap();
        let response = client.handshake("Alice").unwrap();
        let _stream = server.join().unwrap();

        assert_eq!(response.player_id, 1);
        assert_eq!(client.player_id(), Some(1));
        assert_eq!(client.udp_addr().unwrap().port(), 5252);
        assert_eq!(client.server_time_ms(), Some(42));
    }

    #[test]
    fn test_handshake_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_message(
                &mut stream,
                &ErrorResponse {
                    message: MessageText::new("server full"),
                },
            )
            .unwrap();
            stream
        });

        let mut client = LobbyClient::connect(addr).unwrap();
        let result = client.handshake("Alice");
        let _stream = server.join().unwrap();

        assert!(matches!(result, Err(LobbyError::Refused(message)) if message == "server full"));
    }

    #[test]
    fn test_create_room_walks_the_state_machine() {
        let (mut client, mut server) = pair();

        assert!(client.create_room().is_pending());
        assert!(matches!(client.pending, PendingRequest::SentRequest { .. }));
        assert!(matches!(client.join_room(1), Poll::Ready(Err(LobbyError::Busy))));

        let mut opcode = [0u8; 1];
        server.read_exact(&mut opcode).unwrap();
        assert_eq!(opcode[0], TcpOpcode::CreateRoom as u8);
        write_message(&mut server, &CreateRoomResponse { room_id: 7 }).unwrap();

        assert_eq!(poll_until(|| client.create_room()).unwrap(), 7);
        assert!(matches!(client.pending, PendingRequest::Idle));
    }

    #[test]
    fn test_negative_room_id_is_rejected() {
        let (mut client, mut server) = pair();
        assert!(client.create_room().is_pending());
        write_message(&mut server, &CreateRoomResponse { room_id: -1 }).unwrap();

        assert!(matches!(
            poll_until(|| client.create_room()),
            Err(LobbyError::RoomRejected)
        ));
        assert!(matches!(client.pending, PendingRequest::Idle));
    }

    #[test]
    fn test_join_room_records_room() {
        let (mut client, mut server) = pair();
        assert!(client.join_room(4).is_pending());
        let request: JoinRoomRequest = shared::protocol::tcp::read_message(&mut server).unwrap();
        assert_eq!(request.room_id, 4);

        write_message(&mut server, &JoinRoomResponse { status: 0 }).unwrap();
        assert!(!poll_until(|| client.join_room(4)).unwrap());
        assert_eq!(client.room_id(), None);

        assert!(client.join_room(4).is_pending());
        write_message(&mut server, &JoinRoomResponse { status: 1 }).unwrap();
        assert!(poll_until(|| client.join_room(4)).unwrap());
        assert_eq!(client.room_id(), Some(4));
    }

    #[test]
    fn test_join_keeps_requested_room() {
        let (mut client, mut server) = pair();
        assert!(client.join_room(4).is_pending());
        assert!(matches!(
            client.join_room(9),
            Poll::Ready(Err(LobbyError::Busy))
        ));

        write_message(&mut server, &JoinRoomResponse { status: 1 }).unwrap();
        assert!(matches!(
            client.join_room(9),
            Poll::Ready(Err(LobbyError::Busy))
        ));
        assert!(poll_until(|| client.join_room(4)).unwrap());
        assert_eq!(client.room_id(), Some(4));
    }

    #[test]
    fn test_chat_is_kept_out_of_requests() {
        let (mut client, mut server) = pair();
        assert!(client.join_room(1).is_pending());

        let mut bytes = encode(&ChatMessage {
            sender_id: 2,
            text: MessageText::new("hi"),
        })
        .unwrap();
        bytes.extend(encode(&JoinRoomResponse { status: 1 }).unwrap());
        server.write_all(&bytes).unwrap();

        assert!(poll_until(|| client.join_room(1)).unwrap());
        assert_eq!(
            client.receive_chat().unwrap(),
            Some(ChatLine {
                sender_id: 2,
                text: "hi".to_string()
            })
        );
        assert_eq!(client.receive_chat().unwrap(), None);
    }

    #[test]
    fn test_lobby_state_and_room_list() {
        let (mut client, mut server) = pair();
        let responder = thread::spawn(move || {
            let mut opcode = [0u8; 1];
            server.read_exact(&mut opcode).unwrap();
            let header = LobbyStateHeader {
                host_id: 1,
                count: 1,
            };
            let records = [LobbyPlayerRecord {
                player_id: 1,
                username: Username::new("Alice"),
            }];
            server.write_all(&encode_list(&header, &records).unwrap()).unwrap();

            server.read_exact(&mut opcode).unwrap();
            let header = RoomListHeader { count: 1 };
            let records = [RoomRecord {
                room_id: 1,
                player_count: 1,
                status: RoomStatus::Lobby as u8,
            }];
            server.write_all(&encode_list(&header, &records).unwrap()).unwrap();

            server.read_exact(&mut opcode).unwrap();
            write_message(&mut server, &GameStartingNotification).unwrap();
            server
        });

        let state = client.get_lobby_state().unwrap();
        assert!(state.contains(1));
        assert_eq!(
            state,
            LobbyState::Waiting {
                host_id: 1,
                players: vec![(1, "Alice".to_string())]
            }
        );

        let rooms = client.list_rooms().unwrap();
        assert_eq!(
            rooms,
            vec![RoomSummary {
                room_id: 1,
                player_count: 1,
                status: Some(RoomStatus::Lobby)
            }]
        );

        assert_eq!(client.get_lobby_state().unwrap(), LobbyState::GameStarting);
        let _server = responder.join().unwrap();
    }

    #[test]
    fn test_blocking_request_times_out() {
        let (mut client, _server) = pair();
        assert!(matches!(client.list_rooms(), Err(LobbyError::Timeout)));
    }

    #[test]
    fn test_closed_connection_is_detected() {
        let (mut client, server) = pair();
        assert!(client.check_connection());
        drop(server);

        let deadline = Instant::now() + Duration::from_secs(2);
        while client.check_connection() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
    }
}
