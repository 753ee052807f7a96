//! Generational entity arena with fixed-size component slots.
//!
//! Components are registered once in a [`ComponentSchema`]. Each registered
//! type gets a column whose slot size is the encoded length of its default
//! value; the codec uses fixed-width integers, so every value of a
//! fixed-shape component encodes to the same length. Storage is plain bytes,
//! which makes the arena trivially copyable and serializable.

use std::any::{type_name, TypeId};
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::visitor::{ByteReader, StateSink};
use crate::codec;
use crate::error::LockstepError;

/// A value that can be attached to an entity.
///
/// Implemented for every type meeting the bounds. The encoded size of the
/// type must not depend on its value; types with `Vec` or `String` fields are
/// rejected by [`EntityArena::set`] once a value's size differs from the
/// default's.
pub trait Component: Clone + Default + Serialize + DeserializeOwned + 'static {}

impl<C> Component for C where C: Clone + Default + Serialize + DeserializeOwned + 'static {}

/// Handle to an entity slot. Stale handles are detected by generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Layout of one registered component column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentLayout {
    name: String,
    type_id: TypeId,
    slot_size: usize,
}

impl ComponentLayout {
    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded size of one value.
    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.slot_size
    }
}

/// The set of component types an arena can store.
///
/// Frames are only interchangeable when built against the same schema
/// instance; see [`FrameState::copy_from`](super::FrameState::copy_from).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSchema {
    version: u32,
    layouts: Vec<ComponentLayout>,
    by_type: BTreeMap<TypeId, usize>,
}

impl ComponentSchema {
    /// Starts a schema with the given version tag.
    #[must_use]
    pub fn builder(version: u32) -> ComponentSchemaBuilder {
        ComponentSchemaBuilder {
            schema: Self {
                version,
                layouts: Vec::new(),
                by_type: BTreeMap::new(),
            },
        }
    }

    /// A schema with no components.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Self::builder(0).build()
    }

    /// Version tag written into serialized frames.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Number of registered components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Whether no component is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Registered layouts in registration order.
    #[must_use]
    pub fn layouts(&self) -> &[ComponentLayout] {
        &self.layouts
    }

    /// Column index of `C`, if registered.
    #[must_use]
    pub fn index_of<C: Component>(&self) -> Option<usize> {
        self.by_type.get(&TypeId::of::<C>()).copied()
    }
}

/// Builder for [`ComponentSchema`].
#[derive(Debug)]
pub struct ComponentSchemaBuilder {
    schema: ComponentSchema,
}

impl ComponentSchemaBuilder {
    /// Registers component `C` under `name`.
    ///
    /// The default value is encoded and decoded once here, so a component that
    /// cannot round-trip is rejected at registration instead of mid-simulation.
    pub fn register<C: Component>(mut self, name: &str) -> Result<Self, LockstepError> {
        let type_id = TypeId::of::<C>();
        if self.schema.by_type.contains_key(&type_id) {
            return Err(LockstepError::invalid_request(format!(
                "component type {} is already registered",
                type_name::<C>()
            )));
        }
        if self.schema.layouts.iter().any(|l| l.name == name) {
            return Err(LockstepError::invalid_request(format!(
                "component name '{}' is already registered",
                name
            )));
        }
        let encoded = codec::encode(&C::default())?;
        let _: C = codec::decode_exact(&encoded)?;
        self.schema
            .by_type
            .insert(type_id, self.schema.layouts.len());
        self.schema.layouts.push(ComponentLayout {
            name: name.to_owned(),
            type_id,
            slot_size: encoded.len(),
        });
        Ok(self)
    }

    /// Finishes the schema.
    #[must_use]
    pub fn build(self) -> Arc<ComponentSchema> {
        Arc::new(self.schema)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    slot_size: usize,
    present: Vec<bool>,
    data: Vec<u8>,
}

impl Column {
    fn range(&self, slot: usize) -> std::ops::Range<usize> {
        slot * self.slot_size..(slot + 1) * self.slot_size
    }
}

/// Entity storage for one frame.
///
/// Slot reuse is LIFO and generations wrap, so the same sequence of calls
/// always yields the same handles.
#[derive(Debug, Clone)]
pub struct EntityArena {
    schema: Arc<ComponentSchema>,
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
    columns: Vec<Column>,
}

impl EntityArena {
    /// Creates an empty arena for `schema`.
    #[must_use]
    pub fn new(schema: Arc<ComponentSchema>) -> Self {
        let columns = schema
            .layouts
            .iter()
            .map(|layout| Column {
                slot_size: layout.slot_size,
                present: Vec::new(),
                data: Vec::new(),
            })
            .collect();
        Self {
            schema,
            generations: Vec::new(),
            alive: Vec::new(),
            free: Vec::new(),
            columns,
        }
    }

    /// The schema this arena was built with.
    #[must_use]
    pub fn schema(&self) -> &Arc<ComponentSchema> {
        &self.schema
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }

    /// Whether no entity is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.alive.iter().any(|a| *a)
    }

    /// Allocates an entity, reusing the most recently freed slot first.
    pub fn create(&mut self) -> Result<Entity, LockstepError> {
        if let Some(index) = self.free.pop() {
            let slot = index as usize;
            self.alive[slot] = true;
            return Ok(Entity {
                index,
                generation: self.generations[slot],
            });
        }
        let slot = self.alive.len();
        let index = u32::try_from(slot).map_err(|_| LockstepError::Capacity {
            what: "entity slots",
            requested: slot + 1,
            capacity: u32::MAX as usize,
        })?;
        self.generations.push(0);
        self.alive.push(true);
        for column in &mut self.columns {
            column.present.push(false);
            column.data.resize(column.data.len() + column.slot_size, 0);
        }
        Ok(Entity {
            index,
            generation: 0,
        })
    }

    /// Frees `entity` and all of its components. Returns `false` for stale handles.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let Some(slot) = self.live_slot(entity) else {
            return false;
        };
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        for column in &mut self.columns {
            column.present[slot] = false;
            let range = column.range(slot);
            column.data[range].fill(0);
        }
        self.free.push(entity.index);
        true
    }

    /// Whether `entity` refers to a live slot of the same generation.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.live_slot(entity).is_some()
    }

    fn live_slot(&self, entity: Entity) -> Option<usize> {
        let slot = entity.index as usize;
        (self.alive.get(slot).copied() == Some(true) && self.generations[slot] == entity.generation)
            .then_some(slot)
    }

    fn column_of<C: Component>(&self) -> Result<usize, LockstepError> {
        self.schema.index_of::<C>().ok_or_else(|| {
            LockstepError::invalid_request(format!(
                "component type {} is not registered in the schema",
                type_name::<C>()
            ))
        })
    }

    /// Stores `value` on `entity`, replacing any previous value.
    pub fn set<C: Component>(&mut self, entity: Entity, value: &C) -> Result<(), LockstepError> {
        let column = self.column_of::<C>()?;
        let slot = self.live_slot(entity).ok_or_else(|| {
            LockstepError::invalid_request(format!("entity {:?} is not alive", entity))
        })?;
        let encoded = codec::encode(value)?;
        let column = &mut self.columns[column];
        if encoded.len() != column.slot_size {
            return Err(LockstepError::Capacity {
                what: "component slot",
                requested: encoded.len(),
                capacity: column.slot_size,
            });
        }
        let range = column.range(slot);
        column.data[range].copy_from_slice(&encoded);
        column.present[slot] = true;
        Ok(())
    }

    /// Reads `C` from `entity`. `Ok(None)` when the entity is dead or lacks the component.
    pub fn get<C: Component>(&self, entity: Entity) -> Result<Option<C>, LockstepError> {
        let column = &self.columns[self.column_of::<C>()?];
        match self.live_slot(entity) {
            Some(slot) if column.present[slot] => {
                codec::decode_exact(&column.data[column.range(slot)])
                    .map(Some)
                    .map_err(Into::into)
            },
            _ => Ok(None),
        }
    }

    /// Whether `entity` carries `C`.
    #[must_use]
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        match (self.schema.index_of::<C>(), self.live_slot(entity)) {
            (Some(column), Some(slot)) => self.columns[column].present[slot],
            _ => false,
        }
    }

    /// Detaches `C` from `entity`. Returns whether it was present.
    pub fn remove<C: Component>(&mut self, entity: Entity) -> Result<bool, LockstepError> {
        let column = self.column_of::<C>()?;
        let Some(slot) = self.live_slot(entity) else {
            return Ok(false);
        };
        let column = &mut self.columns[column];
        let was_present = std::mem::replace(&mut column.present[slot], false);
        let range = column.range(slot);
        column.data[range].fill(0);
        Ok(was_present)
    }

    /// Live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(slot, _)| Entity {
                index: slot as u32,
                generation: self.generations[slot],
            })
    }

    /// Live entities carrying `C`, in slot order. Empty if `C` is unregistered.
    pub fn entities_with<C: Component>(&self) -> impl Iterator<Item = Entity> + '_ {
        let column = self.schema.index_of::<C>().map(|c| &self.columns[c]);
        self.entities()
            .filter(move |e| column.is_some_and(|c| c.present[e.index as usize]))
    }

    pub(crate) fn copy_from(&mut self, other: &Self) {
        self.generations.clone_from(&other.generations);
        self.alive.clone_from(&other.alive);
        self.free.clone_from(&other.free);
        self.columns.clone_from(&other.columns);
    }

    pub(crate) fn visit<S: StateSink>(&self, sink: &mut S) -> Result<(), LockstepError> {
        sink.write_u32(self.schema.version);
        sink.write_len(self.columns.len())?;
        sink.write_len(self.alive.len())?;
        for (generation, alive) in self.generations.iter().zip(&self.alive) {
            sink.write_u32(*generation);
            sink.write_bool(*alive);
        }
        sink.write_len(self.free.len())?;
        for index in &self.free {
            sink.write_u32(*index);
        }
        for column in &self.columns {
            sink.write_len(column.slot_size)?;
            for present in &column.present {
                sink.write_bool(*present);
            }
            sink.write_bytes(&column.data);
        }
        Ok(())
    }

    pub(crate) fn read_from(&mut self, reader: &mut ByteReader<'_>) -> Result<(), LockstepError> {
        let version = reader.read_u32()?;
        let column_count = reader.read_len()?;
        if version != self.schema.version || column_count != self.columns.len() {
            return Err(LockstepError::serialization(format!(
                "entity store was written with schema v{} ({} components), expected v{} ({} components)",
                version,
                column_count,
                self.schema.version,
                self.columns.len()
            )));
        }
        let slots = reader.read_len()?;
        // Each slot needs at least five bytes; reject lengths the input cannot hold.
        if slots > reader.remaining() / 5 {
            return Err(LockstepError::serialization(format!(
                "entity store declares {} slots but only {} bytes remain",
                slots,
                reader.remaining()
            )));
        }
        let mut generations = Vec::with_capacity(slots);
        let mut alive = Vec::with_capacity(slots);
        for _ in 0..slots {
            generations.push(reader.read_u32()?);
            alive.push(reader.read_bool()?);
        }
        let free_len = reader.read_len()?;
        let mut free = Vec::with_capacity(free_len.min(slots));
        for _ in 0..free_len {
            let index = reader.read_u32()?;
            if alive.get(index as usize).copied() != Some(false) {
                return Err(LockstepError::serialization(format!(
                    "free list references slot {} which is live or out of range",
                    index
                )));
            }
            free.push(index);
        }
        let mut columns = Vec::with_capacity(self.columns.len());
        for layout in &self.schema.layouts {
            let slot_size = reader.read_len()?;
            if slot_size != layout.slot_size {
                return Err(LockstepError::serialization(format!(
                    "component '{}' slot size {} does not match schema size {}",
                    layout.name, slot_size, layout.slot_size
                )));
            }
            let mut present = Vec::with_capacity(slots);
            for _ in 0..slots {
                present.push(reader.read_bool()?);
            }
            let data = reader.read_bytes(slots * slot_size)?.to_vec();
            columns.push(Column {
                slot_size,
                present,
                data,
            });
        }
        self.generations = generations;
        self.alive = alive;
        self.free = free;
        self.columns = columns;
        Ok(())
    }
}

impl PartialEq for EntityArena {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
            && self.generations == other.generations
            && self.alive == other.alive
            && self.free == other.free
            && self.columns == other.columns
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
    use super::super::visitor::ByteWriter;
    use super::*;

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
    struct Health(u16);

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Label(String);

    fn schema() -> Arc<ComponentSchema> {
        ComponentSchema::builder(1)
            .register::<Position>("position")
            .unwrap()
            .register::<Health>("health")
            .unwrap()
            .build()
    }

    #[test]
    fn schema_rejects_duplicates() {
        let builder = ComponentSchema::builder(1)
            .register::<Position>("position")
            .unwrap();
        assert!(ComponentSchema::builder(1)
            .register::<Position>("a")
            .unwrap()
            .register::<Position>("b")
            .is_err());
        assert!(builder.register::<Health>("position").is_err());
    }

    #[test]
    fn slot_sizes_come_from_encoded_defaults() {
        let schema = schema();
        assert_eq!(schema.layouts()[0].slot_size(), 8);
        assert_eq!(schema.layouts()[1].slot_size(), 2);
        assert_eq!(schema.index_of::<Health>(), Some(1));
        assert_eq!(schema.index_of::<Label>(), None);
    }

    #[test]
    fn create_set_get_remove() {
        let mut arena = EntityArena::new(schema());
        let e = arena.create().unwrap();
        arena.set(e, &Position { x: 3, y: -4 }).unwrap();
        assert_eq!(arena.get::<Position>(e).unwrap(), Some(Position { x: 3, y: -4 }));
        assert_eq!(arena.get::<Health>(e).unwrap(), None);
        assert!(arena.has::<Position>(e));
        assert!(arena.remove::<Position>(e).unwrap());
        assert!(!arena.remove::<Position>(e).unwrap());
        assert!(!arena.has::<Position>(e));
    }

    #[test]
    fn unregistered_component_is_an_error() {
        let mut arena = EntityArena::new(schema());
        let e = arena.create().unwrap();
        assert!(arena.set(e, &Label("x".into())).is_err());
        assert!(arena.get::<Label>(e).is_err());
        assert_eq!(arena.entities_with::<Label>().count(), 0);
    }

    #[test]
    fn variable_size_value_is_rejected() {
        let schema = ComponentSchema::builder(1)
            .register::<Label>("label")
            .unwrap()
            .build();
        let mut arena = EntityArena::new(schema);
        let e = arena.create().unwrap();
        let err = arena.set(e, &Label("grown".into())).unwrap_err();
        assert!(matches!(err, LockstepError::Capacity { .. }));
        arena.set(e, &Label(String::new())).unwrap();
    }

    #[test]
    fn destroyed_handles_go_stale_and_slots_are_reused_lifo() {
        let mut arena = EntityArena::new(schema());
        let a = arena.create().unwrap();
        let b = arena.create().unwrap();
        arena.set(a, &Health(9)).unwrap();
        assert!(arena.destroy(a));
        assert!(!arena.destroy(a));
        assert!(!arena.is_alive(a));

        let c = arena.create().unwrap();
        assert_eq!(c.index(), a.index());
        assert_eq!(c.generation(), a.generation() + 1);
        assert_eq!(arena.get::<Health>(c).unwrap(), None);
        assert_eq!(arena.get::<Health>(a).unwrap(), None);
        assert_eq!(arena.entities().collect::<Vec<_>>(), vec![c, b]);
    }

    #[test]
    fn entities_with_filters_by_component() {
        let mut arena = EntityArena::new(schema());
        let a = arena.create().unwrap();
        let b = arena.create().unwrap();
        arena.set(b, &Health(1)).unwrap();
        assert_eq!(arena.entities_with::<Health>().collect::<Vec<_>>(), vec![b]);
        assert_eq!(arena.len(), 2);
        arena.destroy(a);
        arena.destroy(b);
        assert!(arena.is_empty());
    }

    #[test]
    fn visit_and_read_restore_identical_arena() {
        let schema = schema();
        let mut arena = EntityArena::new(Arc::clone(&schema));
        let a = arena.create().unwrap();
        let b = arena.create().unwrap();
        arena.set(a, &Position { x: 1, y: 2 }).unwrap();
        arena.set(b, &Health(77)).unwrap();
        arena.destroy(a);

        let mut writer = ByteWriter::new();
        arena.visit(&mut writer).unwrap();
        let bytes = writer.into_inner();

        let mut restored = EntityArena::new(schema);
        let mut reader = ByteReader::new(&bytes);
        restored.read_from(&mut reader).unwrap();
        reader.finish("arena").unwrap();
        assert_eq!(restored, arena);
    }

    #[test]
    fn read_rejects_other_schema() {
        let arena = EntityArena::new(schema());
        let mut writer = ByteWriter::new();
        arena.visit(&mut writer).unwrap();
        let bytes = writer.into_inner();

        let mut other = EntityArena::new(ComponentSchema::empty());
        assert!(other.read_from(&mut ByteReader::new(&bytes)).is_err());
    }
}
