//! Consent requests: immutable definitions of what data a requester asks for.
//! Each request is bound to its own ledger chain at creation; the only state
//! change a request ever sees is the move to `VOIDED`.
use super::error::{ConsentError, Result};
use super::ledger::{ChainTx, TransactionLedger, TxResult};
use super::schema::{DataEntry, SchemaStore};
use super::store::ConsentDb;
use super::types::{TimeStamp, TxnStatus};
use super::utils::{CHAIN_HRP, REQUEST_HRP, new_uuid_to_bech32};
use chrono::Utc;
use sled::Transactional;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ConsentRequestModel {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub schema_id: String,
    #[n(4)]
    pub callback_url: String,
    #[n(5)]
    pub owner_id: String, // requester id
    #[n(6)]
    pub chain_id: String,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsentRequestOptions {
    pub title: String,
    pub description: String,
    pub callback_url: String,
    pub owner_id: String,
}

/// Ids handed back when a request is created together with its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedConsentRequest {
    pub request_id: String,
    pub chain_id: String,
    pub schema_id: String,
}

#[derive(Clone)]
pub struct ConsentRequestRegistry {
    requests: sled::Tree,
    records: sled::Tree,
    heads: sled::Tree,
    ledger: TransactionLedger,
    schemas: Arc<dyn SchemaStore>,
}

impl ConsentRequestOptions {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(ConsentError::Validation("consent request title is empty".into()));
        }
        if self.owner_id.trim().is_empty() {
            return Err(ConsentError::Validation("consent request has no owner".into()));
        }
        if self.callback_url.trim().is_empty() {
            return Err(ConsentError::Validation("consent request has no callback url".into()));
        }
        Ok(())
    }
}

impl ConsentRequestRegistry {
    pub fn new(db: &ConsentDb, schemas: Arc<dyn SchemaStore>) -> Self {
        Self {
            requests: db.requests.clone(),
            records: db.records.clone(),
            heads: db.heads.clone(),
            ledger: TransactionLedger::new(db),
            schemas,
        }
    }

    /// Create a request against an existing schema. The request row and the
    /// first record of its chain are written in one transaction.
    pub fn create(&self, options: &ConsentRequestOptions, schema_id: &str) -> Result<ConsentRequestModel> {
        options.validate()?;
        if self.schemas.read_schema(schema_id)?.is_none() {
            return Err(ConsentError::Validation(format!("unknown schema {schema_id}")));
        }

        let request = ConsentRequestModel {
            id: new_uuid_to_bech32(REQUEST_HRP)?,
            title: options.title.clone(),
            description: options.description.clone(),
            schema_id: schema_id.to_string(),
            callback_url: options.callback_url.clone(),
            owner_id: options.owner_id.clone(),
            chain_id: new_uuid_to_bech32(CHAIN_HRP)?,
            created_at: TimeStamp::new(),
        };
        let encoded = minicbor::to_vec(&request)?;

        (&self.requests, &self.records, &self.heads).transaction(
            |(requests, records, heads)| -> TxResult<()> {
                ChainTx::new(records, heads).create(&request.chain_id, TxnStatus::Created)?;
                requests.insert(request.id.as_bytes(), encoded.clone())?;
                Ok(())
            },
        )?;

        info!(
            request_id = %request.id,
            chain_id = %request.chain_id,
            owner_id = %request.owner_id,
            "created consent request"
        );
        Ok(request)
    }

    /// Create the schema from `entries`, then a request bound to it.
    pub fn create_with_entries(
        &self,
        options: &ConsentRequestOptions,
        entries: &[DataEntry],
    ) -> Result<CreatedConsentRequest> {
        options.validate()?;
        let schema_id = self.schemas.create_schema(entries)?;
        let request = self.create(options, &schema_id)?;

        Ok(CreatedConsentRequest {
            request_id: request.id,
            chain_id: request.chain_id,
            schema_id,
        })
    }

    pub fn read(&self, request_id: &str) -> Result<Option<ConsentRequestModel>> {
        match self.requests.get(request_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => {
                debug!(request_id, "consent request not found");
                Ok(None)
            }
        }
    }

    pub(crate) fn require(&self, request_id: &str) -> Result<ConsentRequestModel> {
        self.read(request_id)?
            .ok_or_else(|| ConsentError::not_found("consent request", request_id))
    }

    /// Latest status of the request's chain.
    pub fn read_state(&self, request_id: &str) -> Result<TxnStatus> {
        let request = self.require(request_id)?;
        Ok(self.ledger.read_latest(&request.chain_id)?.status)
    }

    /// Void the request. Voiding an already voided request is a no-op.
    pub fn void(&self, request_id: &str) -> Result<()> {
        let request = self.require(request_id)?;
        if self.ledger.void_chain(&request.chain_id)?.is_some() {
            info!(request_id, "voided consent request");
        }
        Ok(())
    }
}
