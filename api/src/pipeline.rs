use crate::store::Store;
use crate::transform::{Chain, Combinator};
use crate::{ApiError, ApiResult, Entity, EntityId, Kind, Kwargs, Value};
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Field name → chain producing that field, for one entity kind.
pub type TransformationMap = BTreeMap<String, Chain>;

// ---------------------------------------------------------------------------
// Session — the store handle threaded through every chain
// ---------------------------------------------------------------------------

/// One acquisition run's view of the store.
///
/// Get-or-create lookups are remembered per `(kind, match key)` so repeated
/// references to the same team within a run skip the store query. The store
/// stays the source of truth: a miss here always falls back to it.
pub struct Session<'s> {
    store: &'s mut dyn Store,
    identities: HashMap<String, EntityId>,
}

impl<'s> Session<'s> {
    pub fn new(store: &'s mut dyn Store) -> Self {
        Self { store, identities: HashMap::new() }
    }

    pub fn store(&self) -> &dyn Store {
        &*self.store
    }

    pub fn find(&self, kind: &Kind, criteria: &Kwargs) -> ApiResult<Option<EntityId>> {
        self.store.find(kind, criteria)
    }

    pub fn add(&mut self, entity: Entity) -> ApiResult<EntityId> {
        self.store.add(entity)
    }

    pub fn entity(&self, id: EntityId) -> ApiResult<&Entity> {
        self.store
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("entity {id}")))
    }

    pub fn entity_mut(&mut self, id: EntityId) -> ApiResult<&mut Entity> {
        self.store
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("entity {id}")))
    }

    pub fn commit(&mut self) -> ApiResult<()> {
        self.store.commit()
    }

    fn identity_key(kind: &Kind, criteria: &Kwargs) -> ApiResult<String> {
        serde_json::to_string(&(kind, criteria))
            .map_err(|e| ApiError::Coercion(format!("unkeyable match fields for {kind}: {e}")))
    }

    /// Resolve an entity by exact field equality, consulting the run's
    /// identity map before the store.
    fn resolve(&mut self, kind: &Kind, criteria: &Kwargs) -> ApiResult<Option<EntityId>> {
        let key = Self::identity_key(kind, criteria)?;
        if let Some(id) = self.identities.get(&key) {
            return Ok(Some(*id));
        }
        let found = self.store.find(kind, criteria)?;
        if let Some(id) = found {
            self.identities.insert(key, id);
        }
        Ok(found)
    }

    fn remember(&mut self, kind: &Kind, criteria: &Kwargs, id: EntityId) -> ApiResult<()> {
        let key = Self::identity_key(kind, criteria)?;
        self.identities.insert(key, id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Registry of transformation maps, one per entity kind.
#[derive(Debug, Default, Clone)]
pub struct Pipeline {
    maps: HashMap<Kind, TransformationMap>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the transformation map for `kind`.
    pub fn register<I, S>(&mut self, kind: Kind, fields: I)
    where
        I: IntoIterator<Item = (S, Chain)>,
        S: Into<String>,
    {
        let map = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.maps.insert(kind, map);
    }

    pub fn is_registered(&self, kind: &Kind) -> bool {
        self.maps.contains_key(kind)
    }

    fn map_for(&self, kind: &Kind) -> ApiResult<&TransformationMap> {
        self.maps
            .get(kind)
            .ok_or_else(|| ApiError::NotFound(format!("no transformation map registered for {kind}")))
    }

    /// Run every field's chain against `record`.
    pub fn generate_kwargs(
        &self,
        kind: &Kind,
        record: &Value,
        session: &mut Session<'_>,
    ) -> ApiResult<Kwargs> {
        self.map_for(kind)?
            .iter()
            .map(|(field, chain)| {
                let value = chain.run(self, session, record.clone())?;
                Ok((field.clone(), value))
            })
            .collect()
    }

    /// Run a single field's chain against `record`.
    pub fn generate_kwarg(
        &self,
        kind: &Kind,
        field: &str,
        record: &Value,
        session: &mut Session<'_>,
    ) -> ApiResult<Value> {
        let chain = self.map_for(kind)?.get(field).ok_or_else(|| {
            ApiError::NotFound(format!("{kind} has no transformation for field '{field}'"))
        })?;
        chain.run(self, session, record.clone())
    }

    /// Build an entity of `kind` from `record`. Nothing is added to the store
    /// for the entity itself, though its chains may resolve nested entities.
    pub fn create(
        &self,
        kind: &Kind,
        record: &Value,
        session: &mut Session<'_>,
    ) -> ApiResult<Entity> {
        let kwargs = self.generate_kwargs(kind, record, session)?;
        Ok(Entity::new(kind.clone(), kwargs))
    }

    /// Lazily [`create`](Pipeline::create) one entity per record, in order.
    pub fn create_multiple<'a, 's>(
        &'a self,
        kind: &Kind,
        records: Vec<Value>,
        session: &'a mut Session<'s>,
    ) -> impl Iterator<Item = ApiResult<Entity>> + use<'a, 's> {
        let kind = kind.clone();
        records
            .into_iter()
            .map(move |record| self.create(&kind, &record, session))
    }
}

// ---------------------------------------------------------------------------
// Materialization combinators
// ---------------------------------------------------------------------------

struct GetOrCreate {
    kind: Kind,
    match_fields: Option<Vec<String>>,
}

impl Combinator for GetOrCreate {
    fn name(&self) -> &'static str {
        "get_or_create"
    }

    fn apply(
        &self,
        pipeline: &Pipeline,
        session: &mut Session<'_>,
        value: Value,
    ) -> ApiResult<Value> {
        let (criteria, kwargs) = match &self.match_fields {
            Some(fields) => {
                let mut criteria = Kwargs::new();
                for field in fields {
                    let v = pipeline.generate_kwarg(&self.kind, field, &value, session)?;
                    criteria.insert(field.clone(), v);
                }
                if let Some(id) = session.resolve(&self.kind, &criteria)? {
                    debug!("{} {criteria:?} resolved to {id}", self.kind);
                    return Ok(Value::Entity(id));
                }
                let kwargs = pipeline.generate_kwargs(&self.kind, &value, session)?;
                (criteria, kwargs)
            }
            None => {
                let kwargs = pipeline.generate_kwargs(&self.kind, &value, session)?;
                if let Some(id) = session.resolve(&self.kind, &kwargs)? {
                    debug!("{} resolved to {id}", self.kind);
                    return Ok(Value::Entity(id));
                }
                (kwargs.clone(), kwargs)
            }
        };

        let id = session.add(Entity::new(self.kind.clone(), kwargs))?;
        debug!("{} {criteria:?} created as {id}", self.kind);
        session.remember(&self.kind, &criteria, id)?;
        Ok(Value::Entity(id))
    }
}

/// Resolve to an existing entity with exactly these kwargs, or add a new one.
pub fn get_or_create(kind: Kind) -> Chain {
    Chain::of(GetOrCreate { kind, match_fields: None })
}

/// Resolve to an existing entity matching only `fields`, or add a new one
/// built from the full transformation map.
pub fn get_or_create_by<I, S>(kind: Kind, fields: I) -> Chain
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields = fields.into_iter().map(Into::into).collect();
    Chain::of(GetOrCreate { kind, match_fields: Some(fields) })
}

struct Create {
    kind: Kind,
}

impl Combinator for Create {
    fn name(&self) -> &'static str {
        "create"
    }

    fn apply(
        &self,
        pipeline: &Pipeline,
        session: &mut Session<'_>,
        value: Value,
    ) -> ApiResult<Value> {
        let entity = pipeline.create(&self.kind, &value, session)?;
        session.add(entity).map(Value::Entity)
    }
}

/// Build an entity from the input and add it to the store unconditionally.
pub fn create(kind: Kind) -> Chain {
    Chain::of(Create { kind })
}

struct CreateMultiple {
    kind: Kind,
}

impl Combinator for CreateMultiple {
    fn name(&self) -> &'static str {
        "create_multiple"
    }

    fn apply(
        &self,
        pipeline: &Pipeline,
        session: &mut Session<'_>,
        value: Value,
    ) -> ApiResult<Value> {
        let Value::List(records) = value else {
            return Err(ApiError::Coercion(format!(
                "create_multiple expects a list, found {}",
                value.type_name()
            )));
        };
        let entities = pipeline
            .create_multiple(&self.kind, records, session)
            .collect::<ApiResult<Vec<_>>>()?;
        entities
            .into_iter()
            .map(|entity| session.add(entity).map(Value::Entity))
            .collect::<ApiResult<Vec<_>>>()
            .map(Value::List)
    }
}

/// Build one entity per element of the input list, add them all, and
/// return the list of references.
pub fn create_multiple(kind: Kind) -> Chain {
    Chain::of(CreateMultiple { kind })
}
