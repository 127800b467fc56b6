//! Generic persistence for records stored as JSON blobs.
//!
//! A [`Record`] knows how to project itself to JSON and how to rebuild itself
//! from a payload; a [`RecordService`] carries the configured [`Session`] and
//! the type's hook registry and performs get/save/delete against the backend.

use super::hooks::{HookKind, HookRegistry, RecordOptions};
use crate::{
    errors::{Error, Result},
    storage::{APPLICATION_JSON, GetFileOptions, PutFileOptions, StorageBackend},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Length of generated record ids.
pub const ID_LENGTH: usize = 6;

/// Random alphanumeric identifier of `len` characters.
pub fn generate_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A persistable entity.
///
/// Implementors provide identity accessors and the JSON projection; the
/// remaining methods are override points with pass-through defaults.
pub trait Record: Clone + Send + Sync + Sized + 'static {
    fn id(&self) -> Option<&str>;

    fn created_at(&self) -> Option<DateTime<Utc>>;

    /// Set identity after the first save. Never called once an id exists.
    fn assign_identity(&mut self, id: String, created_at: DateTime<Utc>);

    /// Build an instance from a parsed payload.
    fn from_value(value: Value) -> Result<Self>;

    /// Type-specific transform applied to a fetched payload before
    /// construction.
    fn parse(raw: Value, _options: &GetFileOptions) -> Result<Value> {
        Ok(raw)
    }

    /// Last chance to adjust fields before the persisted projection is taken.
    fn prepare_save(&mut self) -> Result<()> {
        Ok(())
    }

    /// The persisted attribute set.
    fn attributes(&self) -> Map<String, Value> {
        base_attributes(self)
    }

    /// Everything written at the record's id. Types that carry more than
    /// their projection on the wire override this.
    fn payload(&self) -> Map<String, Value> {
        self.attributes()
    }

    /// Transform the payload right before it is written.
    fn serialize_payload(payload: Map<String, Value>) -> Result<Map<String, Value>> {
        Ok(payload)
    }

    fn is_persisted(&self) -> bool {
        self.id().is_some_and(|id| !id.is_empty())
    }

    fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }
}

/// `id` and `created_at`, `null` when unset.
pub fn base_attributes<R: Record>(record: &R) -> Map<String, Value> {
    let mut attrs = Map::new();
    attrs.insert("created_at".into(), json!(record.created_at()));
    attrs.insert("id".into(), json!(record.id()));
    attrs
}

#[derive(Default)]
pub struct SessionOptions {
    pub backend: Option<Arc<dyn StorageBackend>>,
}

/// The storage handle shared by every record operation.
///
/// Cheap to clone; configure once at startup and hand clones to services.
#[derive(Clone, Debug, Default)]
pub struct Session {
    backend: Option<Arc<dyn StorageBackend>>,
}

impl Session {
    pub fn configure(options: SessionOptions) -> Self {
        Self {
            backend: options.backend,
        }
    }

    pub fn with_backend(backend: impl StorageBackend) -> Self {
        Self::configure(SessionOptions {
            backend: Some(Arc::new(backend)),
        })
    }

    pub fn backend(&self) -> Result<&Arc<dyn StorageBackend>> {
        self.backend.as_ref().ok_or_else(|| {
            Error::Configuration(
                "missing `backend`; provide one with Session::configure(SessionOptions { backend })"
                    .into(),
            )
        })
    }
}

/// Get, save, and delete for one record type.
#[derive(Debug)]
pub struct RecordService<R: Record> {
    session: Session,
    hooks: HookRegistry<R>,
}

impl<R: Record> RecordService<R> {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            hooks: HookRegistry::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn hooks(&self) -> &HookRegistry<R> {
        &self.hooks
    }

    /// Run `afterInitialize` hooks on a freshly built record.
    pub fn initialize(&self, mut record: R, options: &RecordOptions) -> Result<R> {
        self.hooks.run_initialize(&mut record, options)?;
        Ok(record)
    }

    /// Build a record from an attribute bag.
    pub fn build(&self, value: Value, options: &RecordOptions) -> Result<R> {
        self.initialize(R::from_value(value)?, options)
    }

    #[instrument(level = "debug", skip(self, options))]
    pub async fn get(&self, id: &str, options: &GetFileOptions) -> Result<R> {
        let backend = self.session.backend()?;
        let raw = backend.get_file(id, options).await?;
        let payload: Value = serde_json::from_slice(&raw)
            .map_err(|err| Error::Parse(format!("record `{id}` is not valid JSON: {err}")))?;
        let parsed = R::parse(payload, options)?;
        self.build(parsed, &RecordOptions::default())
    }

    pub async fn save(&self, record: &mut R, options: &RecordOptions) -> Result<()> {
        let backend = self.session.backend()?;

        if !options.skip_hooks {
            self.hooks.run(HookKind::BeforeSave, record, options).await?;
        }

        // Prepared on a copy; `record` only changes once the write succeeds.
        let mut prepared = record.clone();
        prepared.prepare_save()?;
        let mut payload = prepared.payload();
        let id = match prepared.id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_id(ID_LENGTH),
        };
        let created_at = prepared.created_at().unwrap_or_else(Utc::now);
        payload.insert("id".into(), json!(id));
        payload.insert("created_at".into(), json!(created_at));

        let serialized = R::serialize_payload(payload)?;
        let content = serde_json::to_vec(&Value::Object(serialized))?;
        let file_options = PutFileOptions::public().with_content_type(APPLICATION_JSON);
        backend
            .put_file(&id, Bytes::from(content), &file_options)
            .await?;
        debug!(id = %id, "record saved");

        if !prepared.is_persisted() || prepared.created_at().is_none() {
            prepared.assign_identity(id, created_at);
        }
        *record = prepared;

        if !options.skip_hooks {
            self.hooks.run(HookKind::AfterSave, record, options).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, record: &mut R, options: &RecordOptions) -> Result<()> {
        let backend = self.session.backend()?;
        let id = match record.id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(Error::InvalidState(
                    "cannot delete a record that has no id".into(),
                ));
            }
        };

        self.hooks
            .run(HookKind::BeforeDelete, record, options)
            .await?;
        backend.delete_file(&id).await?;
        debug!(id = %id, "record deleted");
        self.hooks.run(HookKind::AfterDelete, record, options).await
    }
}
