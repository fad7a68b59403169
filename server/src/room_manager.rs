//! Registry of live rooms.
//!
//! The registry is a single mutex over the room map and the player-to-room
//! index. It is held only to look up, insert or erase entries and is never
//! held across a simulation tick. When a room lock is needed while holding
//! the registry, the registry is always taken first.

use crate::game::{Game, RoomInfo, RoomSettings};
use crate::lobby::{LobbyHandler, LobbySnapshot};
use log::{info, warn};
use parking_lot::Mutex;
use shared::protocol::tcp::{RoomRecord, RoomStatus};
use shared::transport::Outbox;
use shared::Clock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct Registry {
    rooms: BTreeMap<u32, Arc<Game>>,
    player_rooms: HashMap<u32, u32>,
    next_room_id: u32,
}

pub struct RoomManager {
    registry: Mutex<Registry>,
    settings: RoomSettings,
    clock: Clock,
    outbox: Outbox,
}

impl RoomManager {
    /// `outbox` is the server's UDP outbox, used for disconnect and kick
    /// notifications outside of the tick.
    pub fn new(settings: RoomSettings, clock: Clock, outbox: Outbox) -> Self {
        Self {
            registry: Mutex::new(Registry {
                rooms: BTreeMap::new(),
                player_rooms: HashMap::new(),
                next_room_id: 1,
            }),
            settings,
            clock,
            outbox,
        }
    }

    pub fn create_room(&self) -> u32 {
        let mut registry = self.registry.lock();
        let room_id = registry.next_room_id;
        registry.next_room_id += 1;
        registry
            .rooms
            .insert(room_id, Arc::new(Game::new(room_id, self.settings, self.clock)));
        info!("Created room {}", room_id);
        room_id
    }

    pub fn join_room(&self, player_id: u32, username: &str, room_id: u32) -> bool {
        let mut registry = self.registry.lock();
        if registry.player_rooms.contains_key(&player_id) {
            return false;
        }
        let Some(room) = registry.rooms.get(&room_id).cloned() else {
            return false;
        };

        if !room.add_player(player_id, username) {
            return false;
        }
        registry.player_rooms.insert(player_id, room_id);
        true
    }

    /// Kicks every member and drops the room. Returns the kicked player ids.
    pub fn delete_room(&self, room_id: u32) -> Option<Vec<u32>> {
        let room = {
            let mut registry = self.registry.lock();
            let room = registry.rooms.remove(&room_id)?;
            registry.player_rooms.retain(|_, room_of| *room_of != room_id);
            room
        };

        let members: Vec<u32> = room.players().into_iter().map(|(id, _)| id).collect();
        for &player_id in &members {
            room.kick_player(player_id, &self.outbox);
        }
        info!("Deleted room {} ({} players kicked)", room_id, members.len());
        Some(members)
    }

    pub fn kick_player(&self, room_id: u32, player_id: u32) -> bool {
        let Some(room) = self.room(room_id) else {
            return false;
        };
        if !room.kick_player(player_id, &self.outbox) {
            return false;
        }

        self.registry.lock().player_rooms.remove(&player_id);
        info!("Kicked player {} from room {}", player_id, room_id);
        self.teardown_if_abandoned(&room);
        true
    }

    /// Removes a player from whatever room it is in.
    pub fn remove_player(&self, player_id: u32) -> bool {
        let room = {
            let mut registry = self.registry.lock();
            let Some(room_id) = registry.player_rooms.remove(&player_id) else {
                return false;
            };
            registry.rooms.get(&room_id).cloned()
        };

        match room {
            Some(room) => {
                room.remove_player(player_id, &self.outbox);
                self.teardown_if_abandoned(&room);
                true
            }
            None => false,
        }
    }

    /// Drops a room that is playing and has nobody left in it.
    fn teardown_if_abandoned(&self, room: &Arc<Game>) {
        let mut registry = self.registry.lock();
        if room.is_playing()
            && room.player_count() == 0
            && registry.rooms.remove(&room.id()).is_some()
        {
            info!("Room {} is empty, tearing it down", room.id());
        }
    }

    pub fn room(&self, room_id: u32) -> Option<Arc<Game>> {
        self.registry.lock().rooms.get(&room_id).cloned()
    }

    pub fn room_of_player(&self, player_id: u32) -> Option<Arc<Game>> {
        let registry = self.registry.lock();
        let room_id = registry.player_rooms.get(&player_id)?;
        registry.rooms.get(room_id).cloned()
    }

    pub fn room_info(&self, room_id: u32) -> Option<RoomInfo> {
        self.room(room_id).map(|room| room.info())
    }

    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        self.rooms().iter().map(|room| room.info()).collect()
    }

    pub fn room_count(&self) -> usize {
        self.registry.lock().rooms.len()
    }

    fn rooms(&self) -> Vec<Arc<Game>> {
        self.registry.lock().rooms.values().cloned().collect()
    }

    /// Advances every playing room by one tick, outside the registry lock.
    pub fn tick_all(&self, dt: f32) {
        for room in self.rooms() {
            if room.is_playing() {
                room.update(dt, &self.outbox);
            }
        }
    }
}

impl LobbyHandler for RoomManager {
    fn on_create_room(&self, player_id: u32) -> Option<u32> {
        let room_id = self.create_room();
        info!("Player {} created room {}", player_id, room_id);
        Some(room_id)
    }

    fn on_join_room(&self, player_id: u32, username: &str, room_id: u32) -> bool {
        let joined = self.join_room(player_id, username, room_id);
        if !joined {
            warn!("Player {} could not join room {}", player_id, room_id);
        }
        joined
    }

    fn on_get_rooms(&self) -> Vec<RoomRecord> {
        self.rooms()
            .iter()
            .map(|room| RoomRecord {
                room_id: room.id(),
                player_count: room.player_count() as u32,
                status: room.status() as u8,
            })
            .collect()
    }

    fn on_get_lobby_state(&self, room_id: u32) -> Option<LobbySnapshot> {
        let room = self.room(room_id)?;
        let info = room.info();
        Some(LobbySnapshot {
            host_id: info.host_id.unwrap_or(0),
            players: info.players,
        })
    }

    fn on_start_game(&self, player_id: u32, room_id: u32) -> bool {
        match self.room(room_id) {
            Some(room) if room.has_player(player_id) => room.start(player_id),
            _ => false,
        }
    }

    fn is_game_starting(&self, room_id: u32) -> bool {
        self.room(room_id)
            .map(|room| room.status() == RoomStatus::Playing)
            .unwrap_or(false)
    }

    fn on_player_disconnect(&self, player_id: u32) {
        self.remove_player(player_id);
    }

    fn room_members(&self, room_id: u32) -> Vec<u32> {
        self.room(room_id)
            .map(|room| room.players().into_iter().map(|(id, _)| id).collect())
            .unwrap_or_default()
    }
}
