//! Authoritative simulation of a single room.
//!
//! A room owns its players and its entities, each behind its own mutex so
//! that input handling (players) and spawning (entities) contend as little
//! as possible. Whenever more than one lock is needed they are taken in the
//! order players, entities, timers.

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::tcp::RoomStatus;
use shared::protocol::udp::{
    EntityDestroy, EntityKind, EntitySpawn, EntityUpdate, GlobalStateSync, PlayerDisconnect,
    PlayerInput, PlayerState, SyncedEntity, YouHaveBeenKicked, MAX_SYNC_FRAGMENTS,
    SYNC_ENTITIES_PER_FRAGMENT,
};
use shared::protocol::{encode_list, WireMessage};
use shared::transport::Outbox;
use shared::{
    apply_movement, check_collision, Clock, InputFlags, Rect, PLAYER_HEIGHT, PLAYER_SPAWN,
    PLAYER_SPEED, PLAYER_WIDTH, WORLD_WIDTH,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

const SHOT_OFFSET_X: f32 = 25.0;
const SHOT_SPEED: f32 = 10.0;
const CHARGED_SHOT_OFFSET_Y: f32 = -10.0;
const CHARGED_SHOT_SPEED: f32 = 15.0;

const ENEMY_SPAWN_X: f32 = WORLD_WIDTH;
const ENEMY_SPAWN_Y_MIN: f32 = 40.0;
const ENEMY_SPAWN_Y_MAX: f32 = 1040.0;

const REMOVE_LEFT_OF: f32 = -20.0;
const REMOVE_RIGHT_OF: f32 = WORLD_WIDTH;
const REMOVE_ABOVE: f32 = -200.0;
const REMOVE_BELOW: f32 = 1280.0;

const OSCILLATION_AMPLITUDE: f32 = 3.0;
const OSCILLATION_FREQUENCY: f32 = 2.0;

/// Per-room limits taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub max_players: usize,
    pub sync_interval: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_players: 4,
            sync_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: u32,
    pub username: String,
    pub x: f32,
    pub y: f32,
    pub speed: f32,
    /// Unknown until the first input packet arrives, then fixed.
    pub addr: Option<SocketAddr>,
    pub last_processed_tick: u32,
}

impl Player {
    fn new(id: u32, username: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            x: PLAYER_SPAWN.0,
            y: PLAYER_SPAWN.1,
            speed: PLAYER_SPEED,
            addr: None,
            last_processed_tick: 0,
        }
    }

    pub fn hitbox(&self) -> Rect {
        Rect::new(self.x, self.y, PLAYER_WIDTH, PLAYER_HEIGHT)
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u32,
    pub kind: EntityKind,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub width: f32,
    pub height: f32,
    pub collided: bool,
    phase: f32,
}

impl Entity {
    pub fn hitbox(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    fn out_of_bounds(&self) -> bool {
        self.x > REMOVE_RIGHT_OF
            || self.x < REMOVE_LEFT_OF
            || self.y < REMOVE_ABOVE
            || self.y > REMOVE_BELOW
    }
}

/// Default hitbox of each entity kind.
pub fn entity_size(kind: EntityKind) -> (f32, f32) {
    match kind {
        EntityKind::Shot => (10.0, 5.0),
        EntityKind::ChargedShot => (40.0, 20.0),
        EntityKind::Enemy => (32.0, 32.0),
        EntityKind::EliteEnemy => (48.0, 48.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LevelTier {
    level: u8,
    spawn_interval: f32,
    enemy_speed: f32,
    enemy_size: f32,
    enemy_kind: EntityKind,
    oscillate: bool,
}

fn tier_for(elapsed: f32) -> LevelTier {
    if elapsed >= 60.0 {
        LevelTier {
            level: 3,
            spawn_interval: 1.0,
            enemy_speed: 9.0,
            enemy_size: 64.0,
            enemy_kind: EntityKind::EliteEnemy,
            oscillate: true,
        }
    } else if elapsed >= 30.0 {
        LevelTier {
            level: 2,
            spawn_interval: 1.5,
            enemy_speed: 7.0,
            enemy_size: 48.0,
            enemy_kind: EntityKind::EliteEnemy,
            oscillate: false,
        }
    } else {
        LevelTier {
            level: 1,
            spawn_interval: 2.0,
            enemy_speed: 5.0,
            enemy_size: 32.0,
            enemy_kind: EntityKind::Enemy,
            oscillate: false,
        }
    }
}

struct Roster {
    /// Join order; the host is the first entry.
    players: Vec<Player>,
}

impl Roster {
    fn get_mut(&mut self, id: u32) -> Option<&mut Player> {
        self.players.iter_mut().find(|player| player.id == id)
    }

    fn addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.players.iter().filter_map(|player| player.addr)
    }

    fn broadcast<M: WireMessage>(&self, message: &M, outbox: &Outbox) {
        for addr in self.addrs() {
            outbox.queue_message(message, addr);
        }
    }
}

struct Timers {
    elapsed: f32,
    spawn_timer: f32,
    sync_timer: f32,
    level: u8,
    sequence: u32,
    sync_id: u32,
    rng: StdRng,
}

/// Read-only summary used by the lobby listing and the operator shell.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomInfo {
    pub id: u32,
    pub status: RoomStatus,
    pub host_id: Option<u32>,
    pub players: Vec<(u32, String)>,
    pub entity_count: usize,
    pub level: u8,
    pub elapsed_secs: f32,
}

pub struct Game {
    id: u32,
    settings: RoomSettings,
    clock: Clock,
    playing: AtomicBool,
    roster: Mutex<Roster>,
    entities: Mutex<BTreeMap<u32, Entity>>,
    next_entity_id: AtomicU32,
    timers: Mutex<Timers>,
}

impl Game {
    pub fn new(id: u32, settings: RoomSettings, clock: Clock) -> Self {
        Self::with_rng(id, settings, clock, StdRng::from_entropy())
    }

    /// Same as [`Game::new`] with reproducible enemy spawn positions.
    pub fn with_seed(id: u32, settings: RoomSettings, clock: Clock, seed: u64) -> Self {
        Self::with_rng(id, settings, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(id: u32, settings: RoomSettings, clock: Clock, rng: StdRng) -> Self {
        Self {
            id,
            settings,
            clock,
            playing: AtomicBool::new(false),
            roster: Mutex::new(Roster {
                players: Vec::new(),
            }),
            entities: Mutex::new(BTreeMap::new()),
            next_entity_id: AtomicU32::new(1),
            timers: Mutex::new(Timers {
                elapsed: 0.0,
                spawn_timer: 0.0,
                sync_timer: 0.0,
                level: 1,
                sequence: 0,
                sync_id: 0,
                rng,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> RoomStatus {
        if self.playing.load(Ordering::Acquire) {
            RoomStatus::Playing
        } else {
            RoomStatus::Lobby
        }
    }

    pub fn is_playing(&self) -> bool {
        self.status() == RoomStatus::Playing
    }

    pub fn player_count(&self) -> usize {
        self.roster.lock().players.len()
    }

    pub fn host_id(&self) -> Option<u32> {
        self.roster.lock().players.first().map(|player| player.id)
    }

    pub fn has_player(&self, player_id: u32) -> bool {
        self.roster
            .lock()
            .players
            .iter()
            .any(|player| player.id == player_id)
    }

    pub fn player(&self, player_id: u32) -> Option<Player> {
        self.roster.lock().get_mut(player_id).map(|player| player.clone())
    }

    /// Current roster as `(id, username)` in join order.
    pub fn players(&self) -> Vec<(u32, String)> {
        self.roster
            .lock()
            .players
            .iter()
            .map(|player| (player.id, player.username.clone()))
            .collect()
    }

    pub fn entity(&self, entity_id: u32) -> Option<Entity> {
        self.entities.lock().get(&entity_id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn info(&self) -> RoomInfo {
        let (host_id, players) = {
            let roster = self.roster.lock();
            (
                roster.players.first().map(|player| player.id),
                roster
                    .players
                    .iter()
                    .map(|player| (player.id, player.username.clone()))
                    .collect(),
            )
        };
        let entity_count = self.entity_count();
        let timers = self.timers.lock();

        RoomInfo {
            id: self.id,
            status: self.status(),
            host_id,
            players,
            entity_count,
            level: timers.level,
            elapsed_secs: timers.elapsed,
        }
    }

    /// Adds a player to a room that is still in the lobby and not full.
    pub fn add_player(&self, player_id: u32, username: &str) -> bool {
        let mut roster = self.roster.lock();
        if self.is_playing()
            || roster.players.len() >= self.settings.max_players
            || roster.players.iter().any(|player| player.id == player_id)
        {
            return false;
        }

        roster.players.push(Player::new(player_id, username));
        info!("Player {} ({}) joined room {}", player_id, username, self.id);
        if roster.players.len() == 1 {
            info!("Player {} is host of room {}", player_id, self.id);
        }
        true
    }

    /// Removes a player and tells the remaining players. The next player in
    /// join order becomes host if the host left.
    pub fn remove_player(&self, player_id: u32, outbox: &Outbox) -> bool {
        let mut roster = self.roster.lock();
        let Some(index) = roster.players.iter().position(|player| player.id == player_id) else {
            return false;
        };

        roster.players.remove(index);
        info!("Player {} left room {}", player_id, self.id);
        if index == 0 {
            if let Some(host) = roster.players.first() {
                info!("Player {} is now host of room {}", host.id, self.id);
            }
        }

        roster.broadcast(&PlayerDisconnect { player_id }, outbox);
        true
    }

    /// Notifies the player over UDP (when its address is known) and removes it.
    pub fn kick_player(&self, player_id: u32, outbox: &Outbox) -> bool {
        let addr = match self.roster.lock().get_mut(player_id) {
            Some(player) => player.addr,
            None => return false,
        };

        if let Some(addr) = addr {
            outbox.queue_message(&YouHaveBeenKicked, addr);
        }
        self.remove_player(player_id, outbox)
    }

    /// Moves the room from the lobby into play. Only the host may do so.
    pub fn start(&self, requester: u32) -> bool {
        let roster = self.roster.lock();
        if roster.players.first().map(|player| player.id) != Some(requester) {
            debug!(
                "Player {} is not host of room {}, ignoring start request",
                requester, self.id
            );
            return false;
        }

        let started = self
            .playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            info!("Room {} started by player {}", self.id, requester);
        }
        started
    }

    /// Applies one input packet for a player of this room.
    ///
    /// The first packet fixes the player's UDP address; packets from any
    /// other address are ignored afterwards. Inputs whose tick is not newer
    /// than the last processed one only serve as address registration.
    pub fn handle_input(&self, input: &PlayerInput, from: SocketAddr, outbox: &Outbox) -> bool {
        let mut roster = self.roster.lock();
        let Some(player) = roster.get_mut(input.player_id) else {
            return false;
        };

        match player.addr {
            None => {
                player.addr = Some(from);
                info!("Player {} registered UDP address {}", player.id, from);
            }
            Some(addr) if addr != from => {
                debug!(
                    "Ignoring input for player {} from {} (registered {})",
                    player.id, from, addr
                );
                return false;
            }
            Some(_) => {}
        }

        if !self.is_playing() || input.tick <= player.last_processed_tick {
            return false;
        }

        let (x, y) = apply_movement(player.x, player.y, input.inputs, player.speed);
        player.x = x;
        player.y = y;
        player.last_processed_tick = input.tick;

        let mut shots = Vec::new();
        if input.inputs.contains(InputFlags::PRESSED) {
            shots.push((EntityKind::Shot, x + SHOT_OFFSET_X, y, SHOT_SPEED));
        }
        if input.inputs.contains(InputFlags::HOLD) {
            shots.push((
                EntityKind::ChargedShot,
                x + SHOT_OFFSET_X,
                y + CHARGED_SHOT_OFFSET_Y,
                CHARGED_SHOT_SPEED,
            ));
        }

        if !shots.is_empty() {
            let mut entities = self.entities.lock();
            for (kind, shot_x, shot_y, vx) in shots {
                let (width, height) = entity_size(kind);
                self.insert_entity(
                    &roster,
                    &mut entities,
                    kind,
                    (shot_x, shot_y),
                    (vx, 0.0),
                    (width, height),
                    outbox,
                );
            }
        }
        true
    }

    /// Spawns an entity with the default hitbox of its kind and returns its id.
    pub fn spawn_entity(
        &self,
        kind: EntityKind,
        position: (f32, f32),
        velocity: (f32, f32),
        outbox: &Outbox,
    ) -> u32 {
        let roster = self.roster.lock();
        let mut entities = self.entities.lock();
        self.insert_entity(
            &roster,
            &mut entities,
            kind,
            position,
            velocity,
            entity_size(kind),
            outbox,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_entity(
        &self,
        roster: &Roster,
        entities: &mut BTreeMap<u32, Entity>,
        kind: EntityKind,
        (x, y): (f32, f32),
        (vx, vy): (f32, f32),
        (width, height): (f32, f32),
        outbox: &Outbox,
    ) -> u32 {
        let id = self.next_entity_id.fetch_add(1, Ordering::Relaxed);
        entities.insert(
            id,
            Entity {
                id,
                kind,
                x,
                y,
                vx,
                vy,
                width,
                height,
                collided: false,
                phase: (id as f32 * 0.7) % std::f32::consts::TAU,
            },
        );

        roster.broadcast(
            &EntitySpawn {
                entity_id: id,
                entity_type: kind as u16,
                timestamp: self.clock.elapsed_ms(),
                x,
                y,
            },
            outbox,
        );
        id
    }

    /// Runs one simulation tick. Rooms still in the lobby are left alone.
    pub fn update(&self, dt: f32, outbox: &Outbox) {
        if !self.is_playing() {
            return;
        }

        let mut roster = self.roster.lock();
        let mut entities = self.entities.lock();
        let mut timers = self.timers.lock();
        let now = self.clock.elapsed_ms();

        self.advance_entities(&roster, &mut entities, &timers, now, outbox);
        Self::resolve_collisions(&mut roster, &mut entities);
        Self::broadcast_player_states(&roster, &mut timers, now, outbox);

        timers.elapsed += dt;
        let tier = tier_for(timers.elapsed);
        if tier.level != timers.level {
            info!("Room {} reached level {}", self.id, tier.level);
            timers.level = tier.level;
        }

        timers.spawn_timer += dt;
        if timers.spawn_timer >= tier.spawn_interval {
            timers.spawn_timer -= tier.spawn_interval;
            let y = timers.rng.gen_range(ENEMY_SPAWN_Y_MIN..ENEMY_SPAWN_Y_MAX);
            self.insert_entity(
                &roster,
                &mut entities,
                tier.enemy_kind,
                (ENEMY_SPAWN_X, y),
                (-tier.enemy_speed, 0.0),
                (tier.enemy_size, tier.enemy_size),
                outbox,
            );
        }

        timers.sync_timer += dt;
        if timers.sync_timer >= self.settings.sync_interval.as_secs_f32() {
            timers.sync_timer = 0.0;
            timers.sync_id = timers.sync_id.wrapping_add(1);
            self.broadcast_full_sync(&roster, &entities, timers.sync_id, outbox);
        }
    }

    fn advance_entities(
        &self,
        roster: &Roster,
        entities: &mut BTreeMap<u32, Entity>,
        timers: &Timers,
        now: u32,
        outbox: &Outbox,
    ) {
        let oscillate = tier_for(timers.elapsed).oscillate;
        let mut removed = Vec::new();

        for entity in entities.values_mut() {
            if entity.collided {
                removed.push(entity.id);
                continue;
            }

            if oscillate && entity.kind.is_enemy() {
                entity.vy = OSCILLATION_AMPLITUDE
                    * (OSCILLATION_FREQUENCY * timers.elapsed + entity.phase).sin();
            }
            entity.x += entity.vx;
            entity.y += entity.vy;

            if entity.out_of_bounds() {
                removed.push(entity.id);
            } else {
                roster.broadcast(
                    &EntityUpdate {
                        entity_id: entity.id,
                        timestamp: now,
                        x: entity.x,
                        y: entity.y,
                    },
                    outbox,
                );
            }
        }

        for entity_id in removed {
            entities.remove(&entity_id);
            roster.broadcast(&EntityDestroy { entity_id }, outbox);
        }
    }

    /// Flags projectile/enemy pairs that overlap, and respawns players that
    /// touch an enemy. Flagged entities are removed on the next tick.
    fn resolve_collisions(roster: &mut Roster, entities: &mut BTreeMap<u32, Entity>) {
        let ids: Vec<u32> = entities.keys().copied().collect();

        for (i, &first) in ids.iter().enumerate() {
            for &second in &ids[i + 1..] {
                let (a, b) = match (entities.get(&first), entities.get(&second)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => continue,
                };
                if a.collided || b.collided {
                    continue;
                }
                let opposed = (a.kind.is_projectile() && b.kind.is_enemy())
                    || (a.kind.is_enemy() && b.kind.is_projectile());
                if !opposed || !check_collision(&a.hitbox(), &b.hitbox()) {
                    continue;
                }

                for id in [first, second] {
                    if let Some(entity) = entities.get_mut(&id) {
                        entity.collided = true;
                    }
                }
            }
        }

        for player in roster.players.iter_mut() {
            let hitbox = player.hitbox();
            let hit = entities.values_mut().find(|entity| {
                entity.kind.is_enemy() && !entity.collided && check_collision(&hitbox, &entity.hitbox())
            });

            if let Some(enemy) = hit {
                enemy.collided = true;
                player.x = PLAYER_SPAWN.0;
                player.y = PLAYER_SPAWN.1;
                debug!("Player {} hit by enemy {}, respawning", player.id, enemy.id);
            }
        }
    }

    fn broadcast_player_states(roster: &Roster, timers: &mut Timers, now: u32, outbox: &Outbox) {
        timers.sequence = timers.sequence.wrapping_add(1);

        for player in &roster.players {
            roster.broadcast(
                &PlayerState {
                    sequence: timers.sequence,
                    player_id: player.id,
                    last_processed_tick: player.last_processed_tick,
                    timestamp: now,
                    x: player.x,
                    y: player.y,
                },
                outbox,
            );
        }
    }

    /// Sends the whole entity roster, split over as many datagrams as needed
    /// up to [`MAX_SYNC_FRAGMENTS`].
    fn broadcast_full_sync(
        &self,
        roster: &Roster,
        entities: &BTreeMap<u32, Entity>,
        sync_id: u32,
        outbox: &Outbox,
    ) {
        let mut records: Vec<SyncedEntity> = entities
            .values()
            .map(|entity| SyncedEntity {
                entity_id: entity.id,
                entity_type: entity.kind as u16,
                x: entity.x,
                y: entity.y,
            })
            .collect();

        let capacity = SYNC_ENTITIES_PER_FRAGMENT * MAX_SYNC_FRAGMENTS;
        if records.len() > capacity {
            warn!(
                "Room {} sync {} has {} entities, dropping {} past the fragment cap",
                self.id,
                sync_id,
                records.len(),
                records.len() - capacity
            );
            records.truncate(capacity);
        }

        let fragments: Vec<&[SyncedEntity]> = if records.is_empty() {
            vec![&[]]
        } else {
            records.chunks(SYNC_ENTITIES_PER_FRAGMENT).collect()
        };
        let fragment_count = fragments.len() as u8;

        for (index, fragment) in fragments.into_iter().enumerate() {
            let header = GlobalStateSync {
                sync_id,
                fragment_index: index as u8,
                fragment_count,
                entity_count: fragment.len() as u16,
            };
            match encode_list(&header, fragment) {
                Ok(bytes) => {
                    for addr in roster.addrs() {
                        outbox.queue_raw(&bytes, addr);
                    }
                }
                Err(e) => warn!("Failed to encode sync fragment for room {}: {}", self.id, e),
            }
        }
        debug!(
            "Room {} sent sync {} ({} fragments)",
            self.id, sync_id, fragment_count
        );
    }
}
