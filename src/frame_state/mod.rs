//! The per-tick simulation state.
//!
//! A [`FrameState`] holds everything systems read and write during a tick:
//! the tick number, the RNG stream, the enabled-systems bitset, per-player
//! runtime data, the tick's inputs, user globals, the entity store, and
//! runtime assets. It serializes to the wire layout described in [`wire`] and
//! checksums through the same [`visitor`] walk.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::bitset::BitSet256;
use crate::codec;
use crate::compression::{compress_frame, decompress_frame};
use crate::error::LockstepError;
use crate::rng::Pcg32;
use crate::systems::SystemId;
use crate::{Config, Frame, PlayerHandle};

pub mod assets;
pub mod store;
pub mod visitor;
pub mod wire;

pub use assets::{AssetGuid, DynamicAssets};
pub use store::{Component, ComponentLayout, ComponentSchema, ComponentSchemaBuilder, Entity, EntityArena};

use visitor::{ByteReader, ByteWriter, ChecksumAccumulator, StateSink};

/// Why a frame was serialized. Stored as the first header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializeMode {
    /// Local snapshot for rings and rollback.
    Snapshot,
    /// Sent to another peer, e.g. a late joiner.
    Transfer,
    /// Embedded in a replay file.
    Replay,
}

impl SerializeMode {
    const fn tag(self) -> u32 {
        match self {
            Self::Snapshot => 1,
            Self::Transfer => 2,
            Self::Replay => 3,
        }
    }

    fn from_tag(tag: u32) -> Result<Self, LockstepError> {
        match tag {
            1 => Ok(Self::Snapshot),
            2 => Ok(Self::Transfer),
            3 => Ok(Self::Replay),
            other => Err(LockstepError::serialization(format!(
                "unknown serialization mode tag {}",
                other
            ))),
        }
    }
}

/// Runtime data of one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePlayer<D> {
    actor_id: i32,
    config: Vec<u8>,
    data: D,
}

impl<D> RuntimePlayer<D> {
    /// Transport actor bound to this player.
    #[must_use]
    pub const fn actor_id(&self) -> i32 {
        self.actor_id
    }

    /// The opaque config blob as submitted.
    #[must_use]
    pub fn config(&self) -> &[u8] {
        &self.config
    }

    /// Payload decoded from the config blob.
    #[must_use]
    pub const fn data(&self) -> &D {
        &self.data
    }
}

/// Simulation state of one tick.
pub struct FrameState<T: Config> {
    tick: Frame,
    verified: bool,
    system_count: usize,
    enabled_systems: BitSet256,
    rng: Pcg32,
    players: BTreeMap<PlayerHandle, RuntimePlayer<T::PlayerData>>,
    inputs: Vec<T::Input>,
    predicted_inputs: Vec<bool>,
    globals: T::Globals,
    entities: EntityArena,
    assets: DynamicAssets,
    // Not part of the serialized state.
    raised_events: Vec<T::Event>,
    toggles: Vec<(SystemId, bool)>,
}

impl<T: Config> FrameState<T> {
    /// Creates tick 0 with every system enabled and default inputs and globals.
    pub fn new(
        schema: Arc<ComponentSchema>,
        system_count: usize,
        player_count: usize,
    ) -> Result<Self, LockstepError> {
        if player_count == 0 {
            return Err(LockstepError::invalid_request(
                "a frame needs at least one player",
            ));
        }
        Ok(Self {
            tick: Frame::new(0),
            verified: false,
            system_count,
            enabled_systems: BitSet256::with_first(system_count)?,
            rng: Pcg32::default(),
            players: BTreeMap::new(),
            inputs: vec![T::Input::default(); player_count],
            predicted_inputs: vec![false; player_count],
            globals: T::Globals::default(),
            entities: EntityArena::new(schema),
            assets: DynamicAssets::new(),
            raised_events: Vec::new(),
            toggles: Vec::new(),
        })
    }

    /// A default frame with the same schema, system count, and player count.
    pub(crate) fn blank_like(&self) -> Self {
        Self {
            tick: Frame::new(0),
            verified: false,
            system_count: self.system_count,
            enabled_systems: BitSet256::new(),
            rng: Pcg32::default(),
            players: BTreeMap::new(),
            inputs: vec![T::Input::default(); self.inputs.len()],
            predicted_inputs: vec![false; self.inputs.len()],
            globals: T::Globals::default(),
            entities: EntityArena::new(Arc::clone(self.entities.schema())),
            assets: DynamicAssets::new(),
            raised_events: Vec::new(),
            toggles: Vec::new(),
        }
    }

    // ==========================================
    // Accessors
    // ==========================================

    /// The tick this frame represents.
    #[must_use]
    pub const fn tick(&self) -> Frame {
        self.tick
    }

    pub(crate) fn set_tick(&mut self, tick: Frame) {
        self.tick = tick;
    }

    /// Whether the frame was computed from confirmed input only.
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        self.verified
    }

    pub(crate) fn set_verified(&mut self, verified: bool) {
        self.verified = verified;
    }

    /// Number of players.
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.inputs.len()
    }

    /// The frame's RNG stream.
    #[must_use]
    pub const fn rng(&self) -> &Pcg32 {
        &self.rng
    }

    /// Mutable access to the frame's RNG stream.
    pub fn rng_mut(&mut self) -> &mut Pcg32 {
        &mut self.rng
    }

    pub(crate) fn reseed(&mut self, rng: Pcg32) {
        self.rng = rng;
    }

    /// User globals.
    #[must_use]
    pub const fn globals(&self) -> &T::Globals {
        &self.globals
    }

    /// Mutable user globals.
    pub fn globals_mut(&mut self) -> &mut T::Globals {
        &mut self.globals
    }

    /// The entity store.
    #[must_use]
    pub const fn entities(&self) -> &EntityArena {
        &self.entities
    }

    /// Mutable entity store.
    pub fn entities_mut(&mut self) -> &mut EntityArena {
        &mut self.entities
    }

    /// Runtime assets.
    #[must_use]
    pub const fn assets(&self) -> &DynamicAssets {
        &self.assets
    }

    /// Mutable runtime assets.
    pub fn assets_mut(&mut self) -> &mut DynamicAssets {
        &mut self.assets
    }

    /// Input of `player` for this tick.
    #[must_use]
    pub fn input(&self, player: PlayerHandle) -> Option<&T::Input> {
        self.inputs.get(player.as_usize())
    }

    /// Inputs of all players, indexed by handle.
    #[must_use]
    pub fn inputs(&self) -> &[T::Input] {
        &self.inputs
    }

    /// Whether `player`'s input was predicted rather than confirmed.
    #[must_use]
    pub fn is_input_predicted(&self, player: PlayerHandle) -> bool {
        self.predicted_inputs
            .get(player.as_usize())
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn set_input(
        &mut self,
        player: PlayerHandle,
        input: T::Input,
        predicted: bool,
    ) -> Result<(), LockstepError> {
        let max_handle = PlayerHandle::new(self.inputs.len().saturating_sub(1));
        match (
            self.inputs.get_mut(player.as_usize()),
            self.predicted_inputs.get_mut(player.as_usize()),
        ) {
            (Some(slot), Some(flag)) => {
                *slot = input;
                *flag = predicted;
                Ok(())
            },
            _ => Err(LockstepError::InvalidPlayerHandle {
                handle: player,
                max_handle,
            }),
        }
    }

    /// Runtime data of `player`, if set.
    #[must_use]
    pub fn player(&self, player: PlayerHandle) -> Option<&RuntimePlayer<T::PlayerData>> {
        self.players.get(&player)
    }

    /// All players with runtime data, in handle order.
    pub fn players(&self) -> impl Iterator<Item = (PlayerHandle, &RuntimePlayer<T::PlayerData>)> {
        self.players.iter().map(|(handle, player)| (*handle, player))
    }

    /// Binds `player` to a transport actor and decodes its config blob.
    pub fn set_player(
        &mut self,
        player: PlayerHandle,
        actor_id: i32,
        config: Vec<u8>,
    ) -> Result<(), LockstepError> {
        if !player.is_valid_player_for(self.inputs.len()) {
            return Err(LockstepError::InvalidPlayerHandle {
                handle: player,
                max_handle: PlayerHandle::new(self.inputs.len().saturating_sub(1)),
            });
        }
        let data = codec::decode_exact(&config)?;
        self.players.insert(
            player,
            RuntimePlayer {
                actor_id,
                config,
                data,
            },
        );
        Ok(())
    }

    /// Removes `player`'s runtime data.
    pub fn remove_player(&mut self, player: PlayerHandle) -> bool {
        self.players.remove(&player).is_some()
    }

    // ==========================================
    // Systems
    // ==========================================

    /// Number of system bits in use.
    #[must_use]
    pub const fn system_count(&self) -> usize {
        self.system_count
    }

    /// The enabled-systems bitset.
    #[must_use]
    pub const fn enabled_systems(&self) -> &BitSet256 {
        &self.enabled_systems
    }

    /// Whether system `id` is enabled. Unknown ids are disabled.
    #[must_use]
    pub fn is_system_enabled(&self, id: SystemId) -> bool {
        id.index() < self.system_count && self.enabled_systems.bit(id.index())
    }

    /// Enables or disables system `id`, returning whether the bit changed.
    ///
    /// Takes effect at the next schedule pass. Changes are queued so the
    /// scheduler can run `on_enabled`/`on_disabled` after the tick.
    pub fn set_system_enabled(&mut self, id: SystemId, enabled: bool) -> Result<bool, LockstepError> {
        if id.index() >= self.system_count {
            return Err(crate::error::SystemIndexReason::OutOfRange {
                index: id.index(),
                capacity: self.system_count,
            }
            .into());
        }
        if self.enabled_systems.bit(id.index()) == enabled {
            return Ok(false);
        }
        self.enabled_systems.set_bit(id.index(), enabled)?;
        self.toggles.push((id, enabled));
        Ok(true)
    }

    /// Sets a bit without queuing a toggle callback. Used while initializing.
    pub(crate) fn init_system_enabled(&mut self, id: SystemId, enabled: bool) -> Result<(), LockstepError> {
        self.enabled_systems.set_bit(id.index(), enabled)
    }

    pub(crate) fn take_toggles(&mut self) -> Vec<(SystemId, bool)> {
        std::mem::take(&mut self.toggles)
    }

    // ==========================================
    // Events
    // ==========================================

    /// Raises a simulation event for the current tick.
    pub fn raise_event(&mut self, event: T::Event) {
        self.raised_events.push(event);
    }

    /// Events raised since the last drain.
    #[must_use]
    pub fn raised_events(&self) -> &[T::Event] {
        &self.raised_events
    }

    pub(crate) fn drain_events_into(&mut self, out: &mut Vec<T::Event>) {
        out.append(&mut self.raised_events);
    }

    // ==========================================
    // Serialization
    // ==========================================

    fn visit_players<S: StateSink>(&self, sink: &mut S) -> Result<(), LockstepError> {
        sink.write_len(self.players.len())?;
        for (handle, player) in &self.players {
            sink.write_len(handle.as_usize())?;
            sink.write_i32(player.actor_id);
            sink.write_len(player.config.len())?;
            sink.write_bytes(&player.config);
            sink.write_serde(&player.data)?;
        }
        Ok(())
    }

    fn visit_core<S: StateSink>(&self, sink: &mut S) -> Result<(), LockstepError> {
        let (state, inc) = self.rng.raw_parts();
        sink.write_u64(state);
        sink.write_u64(inc);
        sink.write_len(self.system_count)?;
        for word in self.enabled_systems.words() {
            sink.write_u64(*word);
        }
        sink.write_len(self.inputs.len())?;
        for (input, predicted) in self.inputs.iter().zip(&self.predicted_inputs) {
            sink.write_serde(input)?;
            sink.write_bool(*predicted);
        }
        sink.write_serde(&self.globals)?;
        self.entities.visit(sink)
    }

    /// Checksum over tick, player data, and core state.
    ///
    /// Assets and the verification flag are not covered.
    pub fn checksum(&self) -> Result<u64, LockstepError> {
        let mut acc = ChecksumAccumulator::new();
        acc.write_i32(self.tick.as_i32());
        self.visit_players(&mut acc)?;
        self.visit_core(&mut acc)?;
        Ok(acc.finish())
    }

    /// Serializes and compresses the frame.
    pub fn serialize(&self, mode: SerializeMode) -> Result<Vec<u8>, LockstepError> {
        let checksum = self.checksum()?;
        let mut writer = ByteWriter::with_capacity(256);
        writer.write_u32(mode.tag());
        writer.write_i32(self.tick.as_i32());
        writer.write_u64(checksum);
        writer.block(|w| self.visit_players(w))?;
        writer.block(|w| self.visit_core(w))?;
        writer.block(|w| self.assets.write_to(w))?;
        Ok(compress_frame(writer.as_slice()))
    }

    /// Replaces this frame with the one in `bytes`.
    ///
    /// The checksum in the header is recomputed and compared before anything
    /// is applied; on any error `self` is untouched. The restored frame is
    /// marked verified. Returns the mode the frame was written with.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<SerializeMode, LockstepError> {
        let raw = decompress_frame(bytes)?;
        let blocks = wire::split_frame(&raw)?;
        let mode = SerializeMode::from_tag(blocks.mode_tag)?;

        let mut decoded = self.blank_like();
        decoded.tick = blocks.tick;
        decoded.read_players(&mut ByteReader::new(blocks.players))?;
        decoded.read_core(&mut ByteReader::new(blocks.core))?;
        let mut assets = ByteReader::new(blocks.assets);
        decoded.assets = DynamicAssets::read_from(&mut assets)?;
        assets.finish("asset block")?;

        let computed = decoded.checksum()?;
        if computed != blocks.checksum {
            return Err(LockstepError::ChecksumMismatch {
                frame: blocks.tick,
                encoded: blocks.checksum,
                computed,
            });
        }
        decoded.verified = true;
        *self = decoded;
        Ok(mode)
    }

    fn read_players(&mut self, reader: &mut ByteReader<'_>) -> Result<(), LockstepError> {
        let count = reader.read_len()?;
        let mut last: Option<PlayerHandle> = None;
        for _ in 0..count {
            let handle = PlayerHandle::new(reader.read_len()?);
            if !handle.is_valid_player_for(self.inputs.len()) || last.is_some_and(|l| handle <= l) {
                return Err(LockstepError::serialization(format!(
                    "player block has invalid or unordered handle {}",
                    handle
                )));
            }
            last = Some(handle);
            let actor_id = reader.read_i32()?;
            let config = reader.read_prefixed()?.to_vec();
            let data = reader.read_serde()?;
            self.players.insert(
                handle,
                RuntimePlayer {
                    actor_id,
                    config,
                    data,
                },
            );
        }
        reader.finish("player block")
    }

    fn read_core(&mut self, reader: &mut ByteReader<'_>) -> Result<(), LockstepError> {
        let state = reader.read_u64()?;
        let inc = reader.read_u64()?;
        self.rng = Pcg32::from_raw_parts(state, inc)
            .ok_or_else(|| LockstepError::serialization("rng stream increment must be odd"))?;

        let system_count = reader.read_len()?;
        if system_count != self.system_count {
            return Err(LockstepError::serialization(format!(
                "frame has {} systems, expected {}",
                system_count, self.system_count
            )));
        }
        let mut words = [0u64; 4];
        for word in &mut words {
            *word = reader.read_u64()?;
        }
        let enabled = BitSet256::from_words(words);
        if enabled.iter_ones().any(|bit| bit >= system_count) {
            return Err(LockstepError::serialization(
                "enabled-systems bitset has bits past the system count",
            ));
        }
        self.enabled_systems = enabled;

        let player_count = reader.read_len()?;
        if player_count != self.inputs.len() {
            return Err(LockstepError::serialization(format!(
                "frame has {} player inputs, expected {}",
                player_count,
                self.inputs.len()
            )));
        }
        for (input, predicted) in self.inputs.iter_mut().zip(&mut self.predicted_inputs) {
            *input = reader.read_serde()?;
            *predicted = reader.read_bool()?;
        }
        self.globals = reader.read_serde()?;
        self.entities.read_from(reader)?;
        reader.finish("core block")
    }

    /// Overwrites this frame with `source`, reusing this frame's allocations.
    ///
    /// Both frames must share the same schema instance and dimensions.
    pub fn copy_from(&mut self, source: &Self) -> Result<(), LockstepError> {
        if !Arc::ptr_eq(self.entities.schema(), source.entities.schema()) {
            return Err(LockstepError::invalid_request(
                "cannot copy a frame built against a different component schema",
            ));
        }
        if self.system_count != source.system_count || self.inputs.len() != source.inputs.len() {
            return Err(LockstepError::invalid_request(format!(
                "cannot copy a frame with {} systems and {} players into one with {} systems and {} players",
                source.system_count,
                source.inputs.len(),
                self.system_count,
                self.inputs.len()
            )));
        }
        self.tick = source.tick;
        self.verified = source.verified;
        self.enabled_systems = source.enabled_systems;
        self.rng = source.rng;
        self.players.clone_from(&source.players);
        self.inputs.copy_from_slice(&source.inputs);
        self.predicted_inputs.copy_from_slice(&source.predicted_inputs);
        self.globals.clone_from(&source.globals);
        self.entities.copy_from(&source.entities);
        self.assets.clone_from(&source.assets);
        self.raised_events.clear();
        self.toggles.clear();
        Ok(())
    }
}

impl<T: Config> Clone for FrameState<T> {
    fn clone(&self) -> Self {
        Self {
            tick: self.tick,
            verified: self.verified,
            system_count: self.system_count,
            enabled_systems: self.enabled_systems,
            rng: self.rng,
            players: self.players.clone(),
            inputs: self.inputs.clone(),
            predicted_inputs: self.predicted_inputs.clone(),
            globals: self.globals.clone(),
            entities: self.entities.clone(),
            assets: self.assets.clone(),
            raised_events: self.raised_events.clone(),
            toggles: self.toggles.clone(),
        }
    }
}

impl<T: Config> fmt::Debug for FrameState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameState")
            .field("tick", &self.tick)
            .field("verified", &self.verified)
            .field("enabled_systems", &self.enabled_systems)
            .field("players", &self.players)
            .field("inputs", &self.inputs)
            .field("globals", &self.globals)
            .field("entities", &self.entities.len())
            .field("assets", &self.assets.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::rng::SeedableRng;
    use crate::SimulationEvent;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Pad(u8);

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct World {
        score: u32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Loadout {
        skin: u16,
    }

    #[derive(Debug, Clone, PartialEq, Hash)]
    struct Ping;

    impl SimulationEvent for Ping {
        fn event_type(&self) -> u32 {
            1
        }
    }

    struct TestConfig;

    impl Config for TestConfig {
        type Input = Pad;
        type Globals = World;
        type PlayerData = Loadout;
        type Event = Ping;
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Position(i32, i32);

    fn schema() -> Arc<ComponentSchema> {
        ComponentSchema::builder(1)
            .register::<Position>("position")
            .unwrap()
            .build()
    }

    fn populated(schema: &Arc<ComponentSchema>) -> FrameState<TestConfig> {
        let mut frame = FrameState::<TestConfig>::new(Arc::clone(schema), 3, 2).unwrap();
        frame.set_tick(Frame::new(17));
        frame.reseed(Pcg32::seed_from_u64(99));
        frame.rng_mut().next_u32();
        frame.globals_mut().score = 12;
        frame
            .set_player(PlayerHandle::new(1), 40, codec::encode(&Loadout { skin: 3 }).unwrap())
            .unwrap();
        frame.set_input(PlayerHandle::new(0), Pad(5), false).unwrap();
        frame.set_input(PlayerHandle::new(1), Pad(6), true).unwrap();
        frame.set_system_enabled(SystemId::new(2), false).unwrap();
        let e = frame.entities_mut().create().unwrap();
        frame.entities_mut().set(e, &Position(4, -4)).unwrap();
        frame.assets_mut().insert(AssetGuid(7), vec![1, 2, 3]);
        frame
    }

    #[test]
    fn new_frame_enables_all_systems() {
        let frame = FrameState::<TestConfig>::new(schema(), 3, 1).unwrap();
        assert!((0..3).all(|i| frame.is_system_enabled(SystemId::new(i))));
        assert!(!frame.is_system_enabled(SystemId::new(3)));
        assert_eq!(frame.tick(), Frame::new(0));
    }

    #[test]
    fn new_frame_rejects_bad_dimensions() {
        assert!(FrameState::<TestConfig>::new(schema(), 3, 0).is_err());
        assert!(FrameState::<TestConfig>::new(schema(), 257, 1).is_err());
    }

    #[test]
    fn out_of_range_player_names_the_highest_handle() {
        let mut frame = FrameState::<TestConfig>::new(schema(), 1, 2).unwrap();
        let err = frame.set_player(PlayerHandle::new(2), 7, Vec::new()).unwrap_err();
        assert_eq!(
            err,
            LockstepError::InvalidPlayerHandle {
                handle: PlayerHandle::new(2),
                max_handle: PlayerHandle::new(1),
            }
        );
        assert!(frame.player(PlayerHandle::new(2)).is_none());
    }

    #[test]
    fn set_system_enabled_reports_changes_and_range() {
        let mut frame = FrameState::<TestConfig>::new(schema(), 2, 1).unwrap();
        assert!(frame.set_system_enabled(SystemId::new(1), false).unwrap());
        assert!(!frame.set_system_enabled(SystemId::new(1), false).unwrap());
        assert!(frame.set_system_enabled(SystemId::new(2), true).is_err());
        assert_eq!(frame.take_toggles(), vec![(SystemId::new(1), false)]);
        assert!(frame.take_toggles().is_empty());
    }

    #[test]
    fn serialize_round_trip_preserves_checksum() {
        let schema = schema();
        let frame = populated(&schema);
        let bytes = frame.serialize(SerializeMode::Snapshot).unwrap();

        let mut restored = FrameState::<TestConfig>::new(schema, 3, 2).unwrap();
        let mode = restored.deserialize(&bytes).unwrap();
        assert_eq!(mode, SerializeMode::Snapshot);
        assert_eq!(restored.checksum().unwrap(), frame.checksum().unwrap());
        assert_eq!(restored.tick(), Frame::new(17));
        assert!(restored.is_verified());
        assert_eq!(restored.globals().score, 12);
        assert_eq!(restored.player(PlayerHandle::new(1)).unwrap().data().skin, 3);
        assert!(restored.is_input_predicted(PlayerHandle::new(1)));
        assert!(!restored.is_system_enabled(SystemId::new(2)));
        assert_eq!(restored.assets().get(AssetGuid(7)), Some(&[1u8, 2, 3][..]));
        assert_eq!(restored.serialize(SerializeMode::Snapshot).unwrap(), bytes);
    }

    #[test]
    fn identical_frames_serialize_identically() {
        let schema = schema();
        let a = populated(&schema).serialize(SerializeMode::Transfer).unwrap();
        let b = populated(&schema).serialize(SerializeMode::Transfer).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn assets_do_not_affect_checksum() {
        let schema = schema();
        let a = populated(&schema);
        let mut b = populated(&schema);
        b.assets_mut().insert(AssetGuid(8), vec![9]);
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
        b.globals_mut().score += 1;
        assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
    }

    #[test]
    fn tampered_checksum_is_rejected_and_frame_untouched() {
        let schema = schema();
        let frame = populated(&schema);
        let mut raw = decompress_frame(&frame.serialize(SerializeMode::Snapshot).unwrap()).unwrap();
        raw[8] ^= 0xFF;
        let tampered = compress_frame(&raw);

        let mut target = FrameState::<TestConfig>::new(schema, 3, 2).unwrap();
        let before = target.checksum().unwrap();
        let err = target.deserialize(&tampered).unwrap_err();
        match err {
            LockstepError::ChecksumMismatch {
                frame: tick,
                encoded,
                computed,
            } => {
                assert_eq!(tick, Frame::new(17));
                assert_ne!(encoded, computed);
                assert_eq!(computed, frame.checksum().unwrap());
            },
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(target.checksum().unwrap(), before);
        assert!(!target.is_verified());
    }

    #[test]
    fn unknown_mode_and_shape_mismatch_are_rejected() {
        let schema = schema();
        let frame = populated(&schema);
        let mut raw = decompress_frame(&frame.serialize(SerializeMode::Replay).unwrap()).unwrap();
        raw[0] = 9;
        let mut target = FrameState::<TestConfig>::new(Arc::clone(&schema), 3, 2).unwrap();
        assert!(target.deserialize(&compress_frame(&raw)).is_err());

        let bytes = frame.serialize(SerializeMode::Replay).unwrap();
        let mut wrong_players = FrameState::<TestConfig>::new(schema, 3, 3).unwrap();
        assert!(wrong_players.deserialize(&bytes).is_err());
        assert!(target.deserialize(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn copy_from_is_deep_and_schema_checked() {
        let schema = schema();
        let source = populated(&schema);
        let mut copy = FrameState::<TestConfig>::new(Arc::clone(&schema), 3, 2).unwrap();
        copy.copy_from(&source).unwrap();
        assert_eq!(copy.checksum().unwrap(), source.checksum().unwrap());

        copy.globals_mut().score = 0;
        let e = copy.entities().entities().next().unwrap();
        copy.entities_mut().set(e, &Position(0, 0)).unwrap();
        assert_eq!(source.globals().score, 12);
        assert_eq!(source.entities().get::<Position>(e).unwrap(), Some(Position(4, -4)));

        let mut foreign = FrameState::<TestConfig>::new(
            ComponentSchema::builder(1)
                .register::<Position>("position")
                .unwrap()
                .build(),
            3,
            2,
        )
        .unwrap();
        assert!(foreign.copy_from(&source).is_err());
    }

    #[test]
    fn set_player_rejects_bad_handle_and_blob() {
        let mut frame = FrameState::<TestConfig>::new(schema(), 1, 2).unwrap();
        let blob = codec::encode(&Loadout { skin: 1 }).unwrap();
        assert!(frame.set_player(PlayerHandle::new(2), 0, blob).is_err());
        assert!(frame.set_player(PlayerHandle::new(0), 0, vec![1]).is_err());
        assert!(frame.player(PlayerHandle::new(0)).is_none());
    }

    #[test]
    fn raised_events_drain() {
        let mut frame = FrameState::<TestConfig>::new(schema(), 1, 1).unwrap();
        frame.raise_event(Ping);
        assert_eq!(frame.raised_events().len(), 1);
        let mut out = Vec::new();
        frame.drain_events_into(&mut out);
        assert_eq!(out, vec![Ping]);
        assert!(frame.raised_events().is_empty());
    }
}
