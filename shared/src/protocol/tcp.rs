//! Lobby protocol carried over the TCP control connection.

use super::{decode, decode_body, encode, wire_message, wire_record, FixedString, ListHeader};
use super::{ProtocolError, WireMessage, WireRecord};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub const USERNAME_LEN: usize = 32;
pub const MESSAGE_LEN: usize = 64;

pub type Username = FixedString<USERNAME_LEN>;
pub type MessageText = FixedString<MESSAGE_LEN>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpOpcode {
    Connect = 1,
    ConnectOk = 2,
    ConnectError = 3,
    ListRooms = 10,
    ListRoomsResponse = 11,
    CreateRoom = 12,
    CreateRoomResponse = 13,
    JoinRoom = 14,
    JoinRoomResponse = 15,
    GetLobbyState = 16,
    LobbyStateResponse = 17,
    StartGameRequest = 18,
    GameStartingNotification = 19,
    ChatMessage = 20,
}

impl TryFrom<u8> for TcpOpcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Connect,
            2 => Self::ConnectOk,
            3 => Self::ConnectError,
            10 => Self::ListRooms,
            11 => Self::ListRoomsResponse,
            12 => Self::CreateRoom,
            13 => Self::CreateRoomResponse,
            14 => Self::JoinRoom,
            15 => Self::JoinRoomResponse,
            16 => Self::GetLobbyState,
            17 => Self::LobbyStateResponse,
            18 => Self::StartGameRequest,
            19 => Self::GameStartingNotification,
            20 => Self::ChatMessage,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }
}

/// Lifecycle of a room as reported in room listings.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomStatus {
    Lobby = 0,
    Playing = 1,
}

impl RoomStatus {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Lobby),
            1 => Some(Self::Playing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub username: Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub player_id: u32,
    pub udp_port: u16,
    pub server_time_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: MessageText,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListRooms;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomListHeader {
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub room_id: u32,
    pub player_count: u32,
    pub status: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreateRoom;

/// A negative `room_id` means the server refused to create the room.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub room_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomRequest {
    pub room_id: u32,
}

/// `status` is 1 on success, 0 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub status: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GetLobbyState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LobbyStateHeader {
    pub host_id: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayerRecord {
    pub player_id: u32,
    pub username: Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StartGameRequest;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameStartingNotification;

/// Chat line; `sender_id` is ignored on the way in and stamped by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_id: u32,
    pub text: MessageText,
}

wire_message!(ConnectRequest, TcpOpcode::Connect, 1 + USERNAME_LEN);
wire_message!(ConnectResponse, TcpOpcode::ConnectOk, 11);
wire_message!(ErrorResponse, TcpOpcode::ConnectError, 1 + MESSAGE_LEN);
wire_message!(ListRooms, TcpOpcode::ListRooms, 1);
wire_message!(RoomListHeader, TcpOpcode::ListRoomsResponse, 5);
wire_message!(CreateRoom, TcpOpcode::CreateRoom, 1);
wire_message!(CreateRoomResponse, TcpOpcode::CreateRoomResponse, 5);
wire_message!(JoinRoomRequest, TcpOpcode::JoinRoom, 5);
wire_message!(JoinRoomResponse, TcpOpcode::JoinRoomResponse, 2);
wire_message!(GetLobbyState, TcpOpcode::GetLobbyState, 1);
wire_message!(LobbyStateHeader, TcpOpcode::LobbyStateResponse, 9);
wire_message!(StartGameRequest, TcpOpcode::StartGameRequest, 1);
wire_message!(GameStartingNotification, TcpOpcode::GameStartingNotification, 1);
wire_message!(ChatMessage, TcpOpcode::ChatMessage, 5 + MESSAGE_LEN);

wire_record!(RoomRecord, 9);
wire_record!(LobbyPlayerRecord, 4 + USERNAME_LEN);

impl ListHeader for RoomListHeader {
    fn record_count(&self) -> usize {
        self.count as usize
    }
}

impl ListHeader for LobbyStateHeader {
    fn record_count(&self) -> usize {
        self.count as usize
    }
}

/// Total length of the frame starting at `buf[0]`, once it can be known.
///
/// Fixed-size messages are known from the opcode alone; list responses need
/// their header to be buffered first, otherwise `Ok(None)` is returned.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(&opcode) = buf.first() else {
        return Ok(None);
    };

    let size = match TcpOpcode::try_from(opcode)? {
        TcpOpcode::Connect => ConnectRequest::SIZE,
        TcpOpcode::ConnectOk => ConnectResponse::SIZE,
        TcpOpcode::ConnectError => ErrorResponse::SIZE,
        TcpOpcode::ListRooms => ListRooms::SIZE,
        TcpOpcode::ListRoomsResponse => {
            return list_frame_length::<RoomListHeader, RoomRecord>(buf)
        }
        TcpOpcode::CreateRoom => CreateRoom::SIZE,
        TcpOpcode::CreateRoomResponse => CreateRoomResponse::SIZE,
        TcpOpcode::JoinRoom => JoinRoomRequest::SIZE,
        TcpOpcode::JoinRoomResponse => JoinRoomResponse::SIZE,
        TcpOpcode::GetLobbyState => GetLobbyState::SIZE,
        TcpOpcode::LobbyStateResponse => {
            return list_frame_length::<LobbyStateHeader, LobbyPlayerRecord>(buf)
        }
        TcpOpcode::StartGameRequest => StartGameRequest::SIZE,
        TcpOpcode::GameStartingNotification => GameStartingNotification::SIZE,
        TcpOpcode::ChatMessage => ChatMessage::SIZE,
    };
    Ok(Some(size))
}

fn list_frame_length<H: ListHeader, R: WireRecord>(
    buf: &[u8],
) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < H::SIZE {
        return Ok(None);
    }
    let header: H = decode(&buf[..H::SIZE])?;
    Ok(Some(H::SIZE + header.record_count() * R::SIZE))
}

/// Reads a single opcode byte from a blocking stream.
pub fn read_opcode<S: Read>(stream: &mut S) -> Result<u8, ProtocolError> {
    let mut opcode = [0u8; 1];
    stream.read_exact(&mut opcode)?;
    Ok(opcode[0])
}

/// Reads the remaining fields of `M` after its opcode has been consumed.
pub fn read_body<M: WireMessage, S: Read>(stream: &mut S) -> Result<M, ProtocolError> {
    let mut body = vec![0u8; M::SIZE - 1];
    stream.read_exact(&mut body)?;
    decode_body(&body)
}

/// Reads a whole message, opcode included, and checks the opcode.
pub fn read_message<M: WireMessage, S: Read>(stream: &mut S) -> Result<M, ProtocolError> {
    let mut bytes = vec![0u8; M::SIZE];
    stream.read_exact(&mut bytes)?;
    decode(&bytes)
}

pub fn write_message<M: WireMessage, S: Write>(
    stream: &mut S,
    message: &M,
) -> Result<(), ProtocolError> {
    stream.write_all(&encode(message)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_list, encode_list};
    use std::io::Cursor;

    #[test]
    fn test_declared_sizes_match_encoding() {
        let username = Username::new("Alice");
        assert_eq!(encode(&ConnectRequest { username }).unwrap().len(), 33);
        assert_eq!(
            encode(&ConnectResponse {
                player_id: 1,
                udp_port: 5252,
                server_time_ms: 0
            })
            .unwrap()
            .len(),
            11
        );
        assert_eq!(encode(&ErrorResponse { message: MessageText::new("no") }).unwrap().len(), 65);
        assert_eq!(encode(&ListRooms).unwrap(), vec![10]);
        assert_eq!(encode(&CreateRoomResponse { room_id: -1 }).unwrap().len(), 5);
        assert_eq!(encode(&JoinRoomResponse { status: 1 }).unwrap(), vec![15, 1]);
        assert_eq!(
            encode(&ChatMessage {
                sender_id: 3,
                text: MessageText::new("gg")
            })
            .unwrap()
            .len(),
            69
        );
    }

    #[test]
    fn test_connect_response_layout_is_little_endian_unpadded() {
        let bytes = encode(&ConnectResponse {
            player_id: 1,
            udp_port: 5252,
            server_time_ms: 0x0102_0304,
        })
        .unwrap();

        assert_eq!(
            bytes,
            vec![2, 1, 0, 0, 0, 0x84, 0x14, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_decode_rejects_wrong_opcode_and_size() {
        let bytes = encode(&JoinRoomRequest { room_id: 4 }).unwrap();

        assert!(matches!(
            decode::<CreateRoomResponse>(&bytes),
            Err(ProtocolError::UnexpectedOpcode { expected: 13, found: 14 })
        ));
        assert!(matches!(
            decode::<JoinRoomRequest>(&bytes[..3]),
            Err(ProtocolError::SizeMismatch { expected: 5, actual: 3 })
        ));
    }

    #[test]
    fn test_room_list_round_trip() {
        let records = vec![
            RoomRecord {
                room_id: 1,
                player_count: 2,
                status: RoomStatus::Lobby as u8,
            },
            RoomRecord {
                room_id: 7,
                player_count: 4,
                status: RoomStatus::Playing as u8,
            },
        ];
        let bytes = encode_list(&RoomListHeader { count: 2 }, &records).unwrap();
        assert_eq!(bytes.len(), 5 + 2 * 9);

        let (header, decoded) = decode_list::<RoomListHeader, RoomRecord>(&bytes).unwrap();
        assert_eq!(header.count, 2);
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_list_decoder_rejects_short_body() {
        let records = vec![LobbyPlayerRecord {
            player_id: 1,
            username: Username::new("Alice"),
        }];
        let bytes = encode_list(
            &LobbyStateHeader {
                host_id: 1,
                count: 1,
            },
            &records,
        )
        .unwrap();

        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            decode_list::<LobbyStateHeader, LobbyPlayerRecord>(truncated),
            Err(ProtocolError::CountMismatch { announced: 1, .. })
        ));
    }

    #[test]
    fn test_encode_list_checks_count() {
        let result = encode_list::<RoomListHeader, RoomRecord>(&RoomListHeader { count: 3 }, &[]);
        assert!(matches!(
            result,
            Err(ProtocolError::CountMismatch { announced: 3, actual: 0 })
        ));
    }

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(&[]).unwrap(), None);
        assert_eq!(frame_length(&[15]).unwrap(), Some(2));
        assert_eq!(frame_length(&[20]).unwrap(), Some(69));

        // List responses need their header before the length is known.
        assert_eq!(frame_length(&[17, 1, 0]).unwrap(), None);
        let header = encode(&LobbyStateHeader {
            host_id: 1,
            count: 3,
        })
        .unwrap();
        assert_eq!(frame_length(&header).unwrap(), Some(9 + 3 * 36));

        assert!(matches!(
            frame_length(&[99]),
            Err(ProtocolError::UnknownOpcode(99))
        ));
    }

    #[test]
    fn test_stream_helpers() {
        let mut wire = Vec::new();
        write_message(&mut wire, &JoinRoomRequest { room_id: 9 }).unwrap();
        write_message(
            &mut wire,
            &ConnectRequest {
                username: Username::new("Bob"),
            },
        )
        .unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_opcode(&mut cursor).unwrap(), TcpOpcode::JoinRoom as u8);
        let join: JoinRoomRequest = read_body(&mut cursor).unwrap();
        assert_eq!(join.room_id, 9);

        let connect: ConnectRequest = read_message(&mut cursor).unwrap();
        assert_eq!(connect.username.as_str(), "Bob");
    }
}
