//! Data schemas referenced by consent requests. The lifecycle only ever
//! stores a schema's id; the contents are opaque JSON text.
use super::error::{ConsentError, Result};
use super::store::ConsentDb;
use super::utils::{SCHEMA_HRP, new_uuid_to_bech32};
use tracing::info;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    #[n(0)]
    pub schema: String, // JSON schema
    #[n(1)]
    pub ui_schema: Option<String>,
    #[n(2)]
    pub data: Option<String>, // autofilled starter values
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DataSchema {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub entries: Vec<DataEntry>,
}

pub trait SchemaStore: Send + Sync {
    fn create_schema(&self, entries: &[DataEntry]) -> Result<String>;
    fn read_schema(&self, schema_id: &str) -> Result<Option<DataSchema>>;
}

pub struct SledSchemaStore {
    schemas: sled::Tree,
}

impl SledSchemaStore {
    pub fn new(db: &ConsentDb) -> Result<Self> {
        Ok(Self {
            schemas: db.sled().open_tree("schemas")?,
        })
    }
}

impl SchemaStore for SledSchemaStore {
    fn create_schema(&self, entries: &[DataEntry]) -> Result<String> {
        if entries.is_empty() {
            return Err(ConsentError::Validation("a schema needs at least one entry".into()));
        }
        if entries.iter().any(|entry| entry.schema.trim().is_empty()) {
            return Err(ConsentError::Validation("schema entry is empty".into()));
        }

        let schema = DataSchema {
            id: new_uuid_to_bech32(SCHEMA_HRP)?,
            entries: entries.to_vec(),
        };
        self.schemas
            .insert(schema.id.as_bytes(), minicbor::to_vec(&schema)?)?;

        info!(schema_id = %schema.id, entries = entries.len(), "created data schema");
        Ok(schema.id)
    }

    fn read_schema(&self, schema_id: &str) -> Result<Option<DataSchema>> {
        match self.schemas.get(schema_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
