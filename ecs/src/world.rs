use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::entity::{Entity, EntityAllocator};
use crate::sparse_set::SparseSet;

/// Errors produced by [`World`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    #[error("{0} is not alive")]
    DeadEntity(Entity),
}

/// Type-erased access to a component storage, used when despawning.
trait ComponentStorage: Any + Send + Sync {
    fn remove_index(&mut self, entity_index: u32);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + Sync + 'static> ComponentStorage for SparseSet<T> {
    fn remove_index(&mut self, entity_index: u32) {
        self.remove(entity_index);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Entities plus one sparse set per component type.
///
/// Queries are read-only iterations; the renderer walks the world once per
/// frame and never mutates it while building passes.
#[derive(Default)]
pub struct World {
    entities: EntityAllocator,
    storages: HashMap<TypeId, Box<dyn ComponentStorage>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an entity with no components.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.entities.allocate();
        log::trace!("World: spawned {}", entity);
        entity
    }

    /// Despawn an entity and drop all of its components.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), EcsError> {
        if !self.entities.deallocate(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        for storage in self.storages.values_mut() {
            storage.remove_index(entity.index());
        }
        log::trace!("World: despawned {}", entity);
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of alive entities.
    pub fn entity_count(&self) -> u32 {
        self.entities.count()
    }

    /// Attach a component, returning the replaced value if any.
    pub fn insert<T: Send + Sync + 'static>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<Option<T>, EcsError> {
        if !self.is_alive(entity) {
            return Err(EcsError::DeadEntity(entity));
        }
        Ok(self.storage_mut::<T>().insert(entity.index(), component))
    }

    /// Detach a component.
    pub fn remove<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()?
            .remove(entity.index())
    }

    pub fn get<T: Send + Sync + 'static>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage::<T>()?.get(entity.index())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storages
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<SparseSet<T>>()?
            .get_mut(entity.index())
    }

    /// Read-only access to the storage for `T`, if any entity ever had one.
    pub fn storage<T: Send + Sync + 'static>(&self) -> Option<&SparseSet<T>> {
        self.storages
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<SparseSet<T>>()
    }

    fn storage_mut<T: Send + Sync + 'static>(&mut self) -> &mut SparseSet<T> {
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SparseSet::<T>::new()));
        match storage.as_any_mut().downcast_mut::<SparseSet<T>>() {
            Some(set) => set,
            None => unreachable!("storage registered under a foreign TypeId"),
        }
    }

    /// Iterate entities holding a `T`.
    pub fn query<T: Send + Sync + 'static>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.storage::<T>()
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(move |(index, a)| Some((self.entities.entity_at(index)?, a)))
    }

    /// Iterate entities holding both an `A` and a `B`, in `A`'s dense order.
    pub fn query2<A, B>(&self) -> impl Iterator<Item = (Entity, &A, &B)> + '_
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
    {
        let b_set = self.storage::<B>();
        self.query::<A>().filter_map(move |(entity, a)| {
            let b = b_set?.get(entity.index())?;
            Some((entity, a, b))
        })
    }

    /// Iterate entities holding an `A`, a `B` and a `C`, in `A`'s dense order.
    pub fn query3<A, B, C>(&self) -> impl Iterator<Item = (Entity, &A, &B, &C)> + '_
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        C: Send + Sync + 'static,
    {
        let c_set = self.storage::<C>();
        self.query2::<A, B>().filter_map(move |(entity, a, b)| {
            let c = c_set?.get(entity.index())?;
            Some((entity, a, b, c))
        })
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entities.count())
            .field("component_types", &self.storages.len())
            .finish()
    }
}
