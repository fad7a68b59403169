//! Client-side view of a running game.
//!
//! The local player is predicted: every sampled input moves it immediately
//! and is kept in a pending ledger until the server acknowledges its tick.
//! Remote players and entities are shown exactly as last reported.

use log::{debug, info, warn};
use shared::protocol::udp::{
    EntityDestroy, EntityKind, EntitySpawn, EntityUpdate, GlobalStateSync, PlayerState,
    SyncedEntity, MAX_SYNC_FRAGMENTS,
};
use shared::{apply_movement, InputFlags, PLAYER_SPAWN, PLAYER_SPEED};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

const LOSS_WINDOW_MS: u32 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Playing,
    GameOver,
    Kicked,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerView {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityView {
    pub id: u32,
    pub kind: EntityKind,
    pub x: f32,
    pub y: f32,
}

/// Everything the front-end needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    pub players: Vec<PlayerView>,
    pub entities: Vec<EntityView>,
    pub status: SessionStatus,
    pub rtt_ms: Option<u32>,
    pub packet_loss: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingInput {
    tick: u32,
    inputs: InputFlags,
}

/// Sequence numbers of the local player's states seen over the last window.
#[derive(Debug, Default)]
struct LossTracker {
    samples: VecDeque<(u32, u32)>,
}

impl LossTracker {
    fn record(&mut self, sequence: u32, now_ms: u32) {
        self.samples.push_back((now_ms, sequence));
        self.expire(now_ms);
    }

    fn expire(&mut self, now_ms: u32) {
        while let Some(&(at, _)) = self.samples.front() {
            if now_ms.wrapping_sub(at) <= LOSS_WINDOW_MS {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Percentage of sequence numbers missing between the oldest and newest
    /// sample in the window.
    fn percentage(&self) -> f32 {
        let (Some(&(_, first)), Some(&(_, last))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };

        let expected = last.wrapping_sub(first).wrapping_add(1) as f32;
        let received = self.samples.len() as f32;
        ((expected - received) / expected * 100.0).max(0.0)
    }
}

/// Collects the fragments of one full-state sync.
#[derive(Debug, Default)]
struct SyncAssembly {
    sync_id: Option<u32>,
    fragments: BTreeMap<u8, Vec<SyncedEntity>>,
    fragment_count: u8,
}

impl SyncAssembly {
    /// Returns the whole roster once the last missing fragment arrives.
    fn accept(
        &mut self,
        header: &GlobalStateSync,
        records: Vec<SyncedEntity>,
    ) -> Option<Vec<SyncedEntity>> {
        if header.fragment_count == 0
            || header.fragment_index >= header.fragment_count
            || header.fragment_count as usize > MAX_SYNC_FRAGMENTS
        {
            debug!("Ignoring malformed sync fragment {:?}", header);
            return None;
        }

        match self.sync_id {
            Some(current) if header.sync_id < current => return None,
            Some(current) if header.sync_id == current => {}
            Some(current) => {
                if !self.fragments.is_empty() {
                    debug!("Abandoning incomplete sync {}", current);
                }
                self.restart(header);
            }
            None => self.restart(header),
        }

        self.fragments.insert(header.fragment_index, records);
        if self.fragments.len() < self.fragment_count as usize {
            return None;
        }

        let roster = std::mem::take(&mut self.fragments)
            .into_values()
            .flatten()
            .collect();
        Some(roster)
    }

    fn restart(&mut self, header: &GlobalStateSync) {
        self.sync_id = Some(header.sync_id);
        self.fragment_count = header.fragment_count;
        self.fragments.clear();
    }
}

pub struct ClientGameState {
    player_id: u32,
    local: (f32, f32),
    pending: VecDeque<PendingInput>,
    last_sequence: Option<u32>,
    last_processed_tick: u32,
    players: HashMap<u32, (f32, f32)>,
    departed: HashSet<u32>,
    entities: HashMap<u32, EntityView>,
    sync: SyncAssembly,
    loss: LossTracker,
    rtt_ms: Option<u32>,
    status: SessionStatus,
}

impl ClientGameState {
    pub fn new(player_id: u32) -> Self {
        Self {
            player_id,
            local: PLAYER_SPAWN,
            pending: VecDeque::new(),
            last_sequence: None,
            last_processed_tick: 0,
            players: HashMap::new(),
            departed: HashSet::new(),
            entities: HashMap::new(),
            sync: SyncAssembly::default(),
            loss: LossTracker::default(),
            rtt_ms: None,
            status: SessionStatus::Playing,
        }
    }

    pub fn player_id(&self) -> u32 {
        self.player_id
    }

    pub fn local_position(&self) -> (f32, f32) {
        self.local
    }

    pub fn pending_ticks(&self) -> Vec<u32> {
        self.pending.iter().map(|input| input.tick).collect()
    }

    pub fn last_processed_tick(&self) -> u32 {
        self.last_processed_tick
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn rtt_ms(&self) -> Option<u32> {
        self.rtt_ms
    }

    pub fn packet_loss(&self) -> f32 {
        self.loss.percentage()
    }

    pub fn entity(&self, entity_id: u32) -> Option<EntityView> {
        self.entities.get(&entity_id).copied()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn remote_player(&self, player_id: u32) -> Option<(f32, f32)> {
        self.players.get(&player_id).copied()
    }

    /// Predicts the local player's move and records the input until the
    /// server acknowledges it.
    pub fn apply_local_input(&mut self, tick: u32, inputs: InputFlags) -> (f32, f32) {
        if self.status != SessionStatus::Playing {
            return self.local;
        }

        self.local = apply_movement(self.local.0, self.local.1, inputs, PLAYER_SPEED);
        self.pending.push_back(PendingInput { tick, inputs });
        self.local
    }

    /// Applies an authoritative player state. Returns false when the state
    /// was stale and dropped.
    pub fn apply_player_state(&mut self, state: &PlayerState, now_ms: u32) -> bool {
        if state.player_id != self.player_id {
            // A state sent just before the departure can arrive after it.
            if self.departed.contains(&state.player_id) {
                return false;
            }
            self.players.insert(state.player_id, (state.x, state.y));
            return true;
        }

        if matches!(self.last_sequence, Some(last) if state.sequence <= last) {
            debug!(
                "Dropping stale state {} (last applied {:?})",
                state.sequence, self.last_sequence
            );
            return false;
        }
        self.last_sequence = Some(state.sequence);
        self.loss.record(state.sequence, now_ms);

        self.reconcile(state.x, state.y, state.last_processed_tick);
        true
    }

    /// Snaps to the authoritative position, forgets acknowledged inputs and
    /// replays the rest in order.
    fn reconcile(&mut self, x: f32, y: f32, last_processed_tick: u32) {
        self.last_processed_tick = last_processed_tick;
        self.pending.retain(|input| input.tick > last_processed_tick);

        self.local = self.pending.iter().fold((x, y), |(x, y), input| {
            apply_movement(x, y, input.inputs, PLAYER_SPEED)
        });
    }

    pub fn apply_spawn(&mut self, spawn: &EntitySpawn) {
        let Some(kind) = EntityKind::from_wire(spawn.entity_type) else {
            debug!("Spawn of unknown entity type {}", spawn.entity_type);
            return;
        };
        self.entities.insert(
            spawn.entity_id,
            EntityView {
                id: spawn.entity_id,
                kind,
                x: spawn.x,
                y: spawn.y,
            },
        );
    }

    /// Unknown ids are ignored until the next full sync introduces them.
    pub fn apply_update(&mut self, update: &EntityUpdate) {
        if let Some(entity) = self.entities.get_mut(&update.entity_id) {
            entity.x = update.x;
            entity.y = update.y;
        }
    }

    pub fn apply_destroy(&mut self, destroy: &EntityDestroy) {
        self.entities.remove(&destroy.entity_id);
    }

    /// Feeds one sync fragment; the entity roster is replaced once the sync
    /// is complete. Returns true when that happened.
    pub fn apply_sync_fragment(
        &mut self,
        header: &GlobalStateSync,
        records: Vec<SyncedEntity>,
    ) -> bool {
        let Some(roster) = self.sync.accept(header, records) else {
            return false;
        };

        self.entities = roster
            .into_iter()
            .filter_map(|synced| {
                let kind = EntityKind::from_wire(synced.entity_type)?;
                Some((
                    synced.entity_id,
                    EntityView {
                        id: synced.entity_id,
                        kind,
                        x: synced.x,
                        y: synced.y,
                    },
                ))
            })
            .collect();
        debug!(
            "Applied sync {}: {} entities",
            header.sync_id,
            self.entities.len()
        );
        true
    }

    pub fn apply_pong(&mut self, timestamp: u32, now_ms: u32) {
        self.rtt_ms = Some(now_ms.wrapping_sub(timestamp));
    }

    pub fn apply_player_disconnect(&mut self, player_id: u32) {
        if player_id == self.player_id {
            info!("Server ended our game");
            self.status = SessionStatus::GameOver;
        } else {
            self.departed.insert(player_id);
            if self.players.remove(&player_id).is_some() {
                info!("Player {} left", player_id);
            }
        }
    }

    pub fn apply_kicked(&mut self) {
        warn!("Kicked from the room");
        self.status = SessionStatus::Kicked;
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let mut players = vec![PlayerView {
            id: self.player_id,
            x: self.local.0,
            y: self.local.1,
            local: true,
        }];
        players.extend(self.players.iter().map(|(&id, &(x, y))| PlayerView {
            id,
            x,
            y,
            local: false,
        }));

        GameSnapshot {
            players,
            entities: self.entities.values().copied().collect(),
            status: self.status,
            rtt_ms: self.rtt_ms,
            packet_loss: self.packet_loss(),
        }
    }
}
