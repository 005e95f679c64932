use crate::{ApiError, ApiResult, Entity, EntityId, Kind, Kwargs, Value};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// The persistence collaborator the pipeline materializes into.
///
/// Lookups are exact-match on every criterion field. Entities added during a
/// session are visible to `find` before `commit`.
pub trait Store {
    fn find(&self, kind: &Kind, criteria: &Kwargs) -> ApiResult<Option<EntityId>>;

    fn add(&mut self, entity: Entity) -> ApiResult<EntityId>;

    fn get(&self, id: EntityId) -> Option<&Entity>;

    fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity>;

    fn commit(&mut self) -> ApiResult<()>;

    fn count(&self, kind: &Kind) -> usize;
}

/// An insertion-ordered entity table, optionally backed by a JSON snapshot.
///
/// The `id` field, when present, is unique per kind.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    entities: Vec<Entity>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Open the snapshot at `path`, or start empty if it does not exist yet.
    /// `commit` writes back to the same path.
    pub fn open(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let mut store = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| ApiError::Storage(format!("could not read {}: {e}", path.display())))?;
            serde_json::from_str::<MemoryStore>(&content).map_err(|e| {
                ApiError::Storage(format!("invalid store snapshot at {}: {e}", path.display()))
            })?
        } else {
            MemoryStore::default()
        };
        info!("opened store at {} ({} entities)", path.display(), store.entities.len());
        store.path = Some(path.to_owned());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All entities of `kind` with their ids, in insertion order.
    pub fn all<'a>(&'a self, kind: &Kind) -> impl Iterator<Item = (EntityId, &'a Entity)> + use<'a> {
        let kind = kind.clone();
        self.entities
            .iter()
            .enumerate()
            .filter(move |(_, e)| *e.kind() == kind)
            .map(|(i, e)| (Self::id_at(i), e))
    }

    fn id_at(index: usize) -> EntityId {
        EntityId(index as u64 + 1)
    }

    fn index_of(id: EntityId) -> Option<usize> {
        usize::try_from(id.0).ok()?.checked_sub(1)
    }
}

impl Store for MemoryStore {
    fn find(&self, kind: &Kind, criteria: &Kwargs) -> ApiResult<Option<EntityId>> {
        Ok(self
            .entities
            .iter()
            .position(|e| e.kind() == kind && e.matches(criteria))
            .map(Self::id_at))
    }

    fn add(&mut self, entity: Entity) -> ApiResult<EntityId> {
        if let Some(key) = entity.get("id").filter(|v| !v.is_null()) {
            let duplicate = self
                .entities
                .iter()
                .any(|e| e.kind() == entity.kind() && e.get("id") == Some(key));
            if duplicate {
                return Err(ApiError::Conflict(format!(
                    "{} with id {} already exists",
                    entity.kind(),
                    describe(key)
                )));
            }
        }
        self.entities.push(entity);
        Ok(Self::id_at(self.entities.len() - 1))
    }

    fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(Self::index_of(id)?)
    }

    fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(Self::index_of(id)?)
    }

    fn commit(&mut self) -> ApiResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string(&*self)
            .map_err(|e| ApiError::Storage(format!("could not encode store: {e}")))?;
        fs::write(path, content)
            .map_err(|e| ApiError::Storage(format!("could not write {}: {e}", path.display())))?;
        debug!("committed {} entities to {}", self.entities.len(), path.display());
        Ok(())
    }

    fn count(&self, kind: &Kind) -> usize {
        self.entities.iter().filter(|e| e.kind() == kind).count()
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Text(s) => s.clone(),
        other => format!("{other:?}"),
    }
}
