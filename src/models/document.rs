//! The document record: metadata for one stored file.
//!
//! Two stored layouts exist. Version 1 payloads carry no `version` field and
//! keep the file name only as the last segment of `url`. Version 2 payloads
//! store `version` and `name` explicitly. Both load into the same
//! [`Document`]; writes always use the version 2 field set.

use super::file_source::FileSource;
use crate::{
    errors::{Error, Result},
    records::{ID_LENGTH, Record, generate_id},
    storage::GetFileOptions,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentVersion {
    V1,
    #[default]
    V2,
}

pub const CURRENT_VERSION: DocumentVersion = DocumentVersion::V2;

impl DocumentVersion {
    pub fn number(self) -> u8 {
        match self {
            DocumentVersion::V1 => 1,
            DocumentVersion::V2 => 2,
        }
    }
}

impl Serialize for DocumentVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Partitioned,
}

/// Every field either layout may carry. Anything else in a payload is dropped.
#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "localId")]
    local_id: Option<String>,
    url: Option<String>,
    name: Option<String>,
    size: Option<u64>,
    content_type: Option<String>,
    num_parts: Option<u64>,
    uploaded: Option<bool>,
    version: Option<u64>,
    #[serde(rename = "storageType")]
    storage_type: Option<StorageType>,
    #[serde(rename = "numParts")]
    part_count: Option<u64>,
    #[serde(rename = "partSize")]
    part_size: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Document {
    id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    /// Client-side correlation id; falls back to `id` when serialized.
    pub local_id: Option<String>,
    /// Backend key of the content (or the prefix of its parts).
    pub url: Option<String>,
    pub name: Option<String>,
    pub size: u64,
    pub content_type: Option<String>,
    pub num_parts: u64,
    pub uploaded: bool,
    pub version: DocumentVersion,
    /// Set by the uploader; present in the manifest only.
    pub storage_type: Option<StorageType>,
    pub part_count: Option<u64>,
    pub part_size: Option<u64>,
    /// Local bytes, present only while uploading.
    pub file: Option<FileSource>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            id: None,
            created_at: None,
            local_id: None,
            url: None,
            name: None,
            size: 0,
            content_type: None,
            num_parts: 1,
            uploaded: false,
            version: CURRENT_VERSION,
            storage_type: None,
            part_count: None,
            part_size: None,
            file: None,
        }
    }
}

/// Text after the last `/` of a v1 url.
pub fn legacy_name(url: &str) -> &str {
    url.rsplit_once('/').map_or(url, |(_, tail)| tail)
}

impl Document {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: Some(name.into()),
            size,
            ..Self::default()
        }
    }

    pub fn with_file(mut self, file: FileSource) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// A fresh document describing a local file, ready to upload.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = FileSource::open(path.as_ref()).await?;
        let name = file.file_name().ok_or_else(|| {
            Error::InvalidState(format!("{} has no file name", path.as_ref().display()))
        })?;
        Ok(Self::new(name, file.len()).with_file(file))
    }

    /// Normalize an attribute bag of either layout.
    ///
    /// A bag without `version` is a stored v1 document when it carries an
    /// `id`, and a fresh v2 document otherwise.
    pub fn from_attributes(value: Value) -> Result<Self> {
        let raw: RawDocument = serde_json::from_value(value)
            .map_err(|err| Error::Parse(format!("invalid document payload: {err}")))?;

        let version = match raw.version {
            None if raw.id.is_some() => DocumentVersion::V1,
            None => CURRENT_VERSION,
            Some(1) => DocumentVersion::V1,
            Some(2) => DocumentVersion::V2,
            Some(other) => {
                return Err(Error::Parse(format!("unsupported document version {other}")));
            }
        };

        let name = match version {
            DocumentVersion::V2 => raw.name,
            DocumentVersion::V1 => raw
                .name
                .or_else(|| raw.url.as_deref().map(|url| legacy_name(url).to_string())),
        };

        let num_parts = raw.num_parts.or(raw.part_count).unwrap_or(1);
        if num_parts == 0 {
            return Err(Error::Parse("num_parts must be positive".into()));
        }

        Ok(Self {
            id: raw.id,
            created_at: raw.created_at,
            local_id: raw.local_id,
            url: raw.url,
            name,
            size: raw.size.unwrap_or(0),
            content_type: raw.content_type,
            num_parts,
            uploaded: raw.uploaded.unwrap_or(false),
            version,
            storage_type: raw.storage_type,
            part_count: raw.part_count,
            part_size: raw.part_size,
            file: None,
        })
    }

    pub fn is_partitioned(&self) -> bool {
        self.storage_type == Some(StorageType::Partitioned)
    }

    /// Assign `id`, `created_at`, and `url` where missing; returns the url.
    pub(crate) fn ensure_identity(&mut self) -> &str {
        if !self.is_persisted() {
            self.id = Some(generate_id(ID_LENGTH));
        }
        self.created_at.get_or_insert_with(Utc::now);
        self.url.get_or_insert_with(|| Uuid::new_v4().to_string())
    }

    /// The record projection plus the partitioning fields, as published at
    /// the document's id once every part is stored.
    pub fn manifest(&self) -> Map<String, Value> {
        let mut payload = self.attributes();
        if let Some(storage_type) = self.storage_type {
            payload.insert("storageType".into(), json!(storage_type));
        }
        if let Some(part_count) = self.part_count {
            payload.insert("numParts".into(), json!(part_count));
        }
        if let Some(part_size) = self.part_size {
            payload.insert("partSize".into(), json!(part_size));
        }
        payload
    }
}

impl Record for Document {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn assign_identity(&mut self, id: String, created_at: DateTime<Utc>) {
        if !self.is_persisted() {
            self.id = Some(id);
        }
        self.created_at.get_or_insert(created_at);
    }

    fn from_value(value: Value) -> Result<Self> {
        Document::from_attributes(value)
    }

    fn parse(raw: Value, _options: &GetFileOptions) -> Result<Value> {
        if !raw.is_object() {
            return Err(Error::Parse("document payload must be a JSON object".into()));
        }
        Ok(raw)
    }

    fn prepare_save(&mut self) -> Result<()> {
        self.url.get_or_insert_with(|| Uuid::new_v4().to_string());
        if self.version == DocumentVersion::V1 {
            if self.name.is_none() {
                self.name = self.url.as_deref().map(|url| legacy_name(url).to_string());
            }
            self.version = CURRENT_VERSION;
        }
        Ok(())
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("id".into(), json!(self.id));
        attrs.insert("content_type".into(), json!(self.content_type));
        attrs.insert(
            "localId".into(),
            json!(self.local_id.as_deref().or(self.id.as_deref())),
        );
        attrs.insert("version".into(), json!(self.version));
        attrs.insert("created_at".into(), json!(self.created_at));
        attrs.insert("num_parts".into(), json!(self.num_parts));
        attrs.insert("size".into(), json!(self.size));
        attrs.insert("url".into(), json!(self.url));
        attrs.insert("name".into(), json!(self.name));
        attrs.insert("uploaded".into(), json!(self.uploaded));
        attrs
    }

    /// Partitioned documents keep their manifest fields across saves.
    fn payload(&self) -> Map<String, Value> {
        self.manifest()
    }

    fn serialize_payload(mut payload: Map<String, Value>) -> Result<Map<String, Value>> {
        if payload.get("localId").is_none_or(Value::is_null) {
            let id = payload.get("id").cloned().unwrap_or(Value::Null);
            payload.insert("localId".into(), id);
        }
        Ok(payload)
    }
}
