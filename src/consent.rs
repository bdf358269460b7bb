//! Consent records.
//!
//! One row per issued consent, chained to its own ledger history. Rows only
//! change through the transitions below, and each transition writes the row
//! and its ledger record in a single sled transaction. Guards (owner, chain
//! heads of the consent and of its parent request) are evaluated inside that
//! same transaction, so a concurrent claim or void can never slip between the
//! check and the write.
use super::claim::Ownership;
use super::error::{ConsentError, Result};
use super::ledger::{ChainTx, TransactionLedger, TransactionRecord, TxResult};
use super::registry::ConsentRequestModel;
use super::store::{ConsentDb, composite_key, prefix_of};
use super::types::{TimeStamp, TxnStatus};
use super::utils::{CHAIN_HRP, CONSENT_HRP, DATA_HRP, new_uuid_to_bech32};
use chrono::Utc;
use sled::Transactional;
use sled::transaction::TransactionalTree;
use tracing::{debug, info};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ConsentModel {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub consent_request_id: String,
    #[n(2)]
    pub requester_id: String,
    #[n(3)]
    pub user_id: Option<String>, // set once, by the claiming user
    #[n(4)]
    pub expiry: TimeStamp<Utc>,
    #[n(5)]
    pub chain_id: String,
    #[n(6)]
    pub consent_data_id: Option<String>, // set only on fulfilment
}

/// Data submitted by the user when fulfilling a consent.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ConsentData {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub schema_id: String,
    #[n(2)]
    pub data: String,
    #[n(3)]
    pub hash: String, // sha256 of `data`
    #[n(4)]
    pub date_created: TimeStamp<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSubmission {
    pub submit_data: String,
    /// Replaces the consent's expiry when present.
    pub expiry: Option<TimeStamp<Utc>>,
}

pub(crate) enum Completion {
    Fulfil {
        data: ConsentData,
        expiry: Option<TimeStamp<Utc>>,
    },
    Accept,
    Reject,
}

impl ConsentModel {
    pub fn ownership(&self, user_id: &str) -> Ownership {
        match self.user_id.as_deref() {
            None => Ownership::Unowned,
            Some(owner) if owner == user_id => Ownership::UserOwned,
            Some(_) => Ownership::Owned,
        }
    }
}

impl ConsentData {
    pub fn new(schema_id: &str, data: &str) -> Result<Self> {
        Ok(Self {
            id: new_uuid_to_bech32(DATA_HRP)?,
            schema_id: schema_id.to_string(),
            data: data.to_string(),
            hash: sha256::digest(data.as_bytes()),
            date_created: TimeStamp::new(),
        })
    }

    pub fn verify(&self) -> bool {
        sha256::digest(self.data.as_bytes()) == self.hash
    }
}

impl Completion {
    fn status(&self) -> TxnStatus {
        match self {
            Completion::Fulfil { .. } => TxnStatus::Fulfilled,
            Completion::Accept => TxnStatus::Accepted,
            Completion::Reject => TxnStatus::Rejected,
        }
    }
}

#[derive(Clone)]
pub struct ConsentRecordStore {
    consents: sled::Tree,
    consent_data: sled::Tree,
    user_consents: sled::Tree,
    requests: sled::Tree,
    records: sled::Tree,
    heads: sled::Tree,
    ledger: TransactionLedger,
}

impl ConsentRecordStore {
    pub fn new(db: &ConsentDb) -> Self {
        Self {
            consents: db.consents.clone(),
            consent_data: db.consent_data.clone(),
            user_consents: db.user_consents.clone(),
            requests: db.requests.clone(),
            records: db.records.clone(),
            heads: db.heads.clone(),
            ledger: TransactionLedger::new(db),
        }
    }

    /// Insert a consent in `CREATED` against `request`. Fails if the request
    /// has been voided by the time the row is written.
    pub fn create_pending(
        &self,
        request: &ConsentRequestModel,
        requester_id: &str,
        user_id: Option<&str>,
        expiry: TimeStamp<Utc>,
    ) -> Result<ConsentModel> {
        let consent = ConsentModel {
            id: new_uuid_to_bech32(CONSENT_HRP)?,
            consent_request_id: request.id.clone(),
            requester_id: requester_id.to_string(),
            user_id: user_id.map(str::to_string),
            expiry,
            chain_id: new_uuid_to_bech32(CHAIN_HRP)?,
            consent_data_id: None,
        };
        let encoded = minicbor::to_vec(&consent)?;

        (&self.consents, &self.user_consents, &self.records, &self.heads).transaction(
            |(consents, user_consents, records, heads)| -> TxResult<()> {
                let chain = ChainTx::new(records, heads);
                if chain.latest(&request.chain_id)?.status == TxnStatus::Voided {
                    return Err(ConsentError::InvalidTransition(format!(
                        "consent request {} has been voided",
                        request.id
                    ))
                    .into());
                }

                chain.create(&consent.chain_id, TxnStatus::Created)?;
                consents.insert(consent.id.as_bytes(), encoded.clone())?;
                if let Some(user_id) = &consent.user_id {
                    user_consents.insert(composite_key(user_id, consent.id.as_bytes()), b"".as_ref())?;
                }
                Ok(())
            },
        )?;

        info!(
            consent_id = %consent.id,
            request_id = %request.id,
            pre_claimed = consent.user_id.is_some(),
            "created pending consent"
        );
        Ok(consent)
    }

    pub fn read(&self, consent_id: &str) -> Result<Option<ConsentModel>> {
        match self.consents.get(consent_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => {
                debug!(consent_id, "consent not found");
                Ok(None)
            }
        }
    }

    pub(crate) fn require(&self, consent_id: &str) -> Result<ConsentModel> {
        self.read(consent_id)?
            .ok_or_else(|| ConsentError::not_found("consent", consent_id))
    }

    pub fn read_data(&self, data_id: &str) -> Result<Option<ConsentData>> {
        match self.consent_data.get(data_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Bind an unowned consent to `user_id` and move it to `IN_PROGRESS`, as
    /// one conditional write. Returns the ownership observed before the call:
    /// `Unowned` means this call made the claim, `UserOwned` that the caller
    /// already held it. A consent owned by someone else fails with `Conflict`.
    pub fn claim(&self, consent_id: &str, user_id: &str) -> Result<Ownership> {
        let trees = (
            &self.consents,
            &self.user_consents,
            &self.requests,
            &self.records,
            &self.heads,
        );
        let observed = trees.transaction(
            |(consents, user_consents, requests, records, heads)| -> TxResult<Ownership> {
                let mut consent = read_consent(consents, consent_id)?;
                match consent.ownership(user_id) {
                    Ownership::Unowned => {}
                    Ownership::UserOwned => return Ok(Ownership::UserOwned),
                    Ownership::Owned => {
                        return Err(ConsentError::Conflict(format!(
                            "consent {consent_id} has been claimed by another user"
                        ))
                        .into());
                    }
                }

                let chain = ChainTx::new(records, heads);
                let request = read_parent_request(requests, &consent)?;
                if chain.latest(&request.chain_id)?.status == TxnStatus::Voided {
                    return Err(ConsentError::InvalidTransition(format!(
                        "consent request {} has been voided",
                        request.id
                    ))
                    .into());
                }
                // refuses voided consents
                chain.append(&consent.chain_id, TxnStatus::InProgress)?;

                consent.user_id = Some(user_id.to_string());
                write_consent(consents, &consent)?;
                user_consents.insert(composite_key(user_id, consent_id.as_bytes()), b"".as_ref())?;

                Ok(Ownership::Unowned)
            },
        )?;

        if observed == Ownership::Unowned {
            info!(consent_id, user_id, "claimed consent");
        }
        Ok(observed)
    }

    /// Move a claimed consent to its terminal outcome. The caller must own the
    /// consent, and neither the consent's chain nor its request's chain may
    /// currently sit in `blocked`.
    pub(crate) fn complete(
        &self,
        consent_id: &str,
        user_id: &str,
        blocked: &[TxnStatus],
        completion: &Completion,
    ) -> Result<(ConsentModel, TransactionRecord)> {
        let trees = (
            &self.consents,
            &self.consent_data,
            &self.requests,
            &self.records,
            &self.heads,
        );
        let (consent, record) = trees.transaction(
            |(consents, consent_data, requests, records, heads)| -> TxResult<(ConsentModel, TransactionRecord)> {
                let mut consent = read_consent(consents, consent_id)?;
                match consent.ownership(user_id) {
                    Ownership::UserOwned => {}
                    Ownership::Owned => {
                        return Err(ConsentError::Conflict(format!(
                            "consent {consent_id} has been claimed by another user"
                        ))
                        .into());
                    }
                    Ownership::Unowned => {
                        return Err(ConsentError::InvalidTransition(format!(
                            "consent {consent_id} has not been claimed"
                        ))
                        .into());
                    }
                }

                let chain = ChainTx::new(records, heads);
                let request = read_parent_request(requests, &consent)?;
                let own_status = chain.latest(&consent.chain_id)?.status;
                let request_status = chain.latest(&request.chain_id)?.status;
                if blocked.contains(&own_status) || blocked.contains(&request_status) {
                    return Err(ConsentError::InvalidTransition(format!(
                        "consent {consent_id} is {own_status} and its request is {request_status}"
                    ))
                    .into());
                }

                if let Completion::Fulfil { data, expiry } = completion {
                    let encoded = minicbor::to_vec(data).map_err(ConsentError::from)?;
                    consent_data.insert(data.id.as_bytes(), encoded)?;
                    consent.consent_data_id = Some(data.id.clone());
                    if let Some(expiry) = expiry {
                        consent.expiry = expiry.clone();
                    }
                    write_consent(consents, &consent)?;
                }
                let record = chain.append(&consent.chain_id, completion.status())?;

                Ok((consent, record))
            },
        )?;

        info!(consent_id, status = %record.status, "completed consent");
        Ok((consent, record))
    }

    /// Void the consent's own chain. Returns `None` if it was already voided.
    pub fn void(&self, consent_id: &str) -> Result<Option<TransactionRecord>> {
        let consent = self.require(consent_id)?;
        self.ledger.void_chain(&consent.chain_id)
    }

    /// Every consent claimed by, or issued directly to, `user_id`.
    pub fn consents_for_user(&self, user_id: &str) -> Result<Vec<ConsentModel>> {
        let prefix = prefix_of(user_id);
        let mut consents = Vec::new();

        for item in self.user_consents.scan_prefix(&prefix) {
            let (key, _) = item?;
            let consent_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            let consent = self.read(&consent_id)?.ok_or_else(|| {
                ConsentError::Storage(format!("user index references missing consent {consent_id}"))
            })?;
            consents.push(consent);
        }

        debug!(user_id, consents = consents.len(), "listed consents for user");
        Ok(consents)
    }
}

fn read_consent(consents: &TransactionalTree, consent_id: &str) -> TxResult<ConsentModel> {
    match consents.get(consent_id.as_bytes())? {
        Some(bytes) => Ok(minicbor::decode(&bytes).map_err(ConsentError::from)?),
        None => Err(ConsentError::not_found("consent", consent_id).into()),
    }
}

// The parent request is guaranteed by referential integrity, so its absence
// is a storage fault rather than a NotFound.
fn read_parent_request(
    requests: &TransactionalTree,
    consent: &ConsentModel,
) -> TxResult<ConsentRequestModel> {
    match requests.get(consent.consent_request_id.as_bytes())? {
        Some(bytes) => Ok(minicbor::decode(&bytes).map_err(ConsentError::from)?),
        None => Err(ConsentError::Storage(format!(
            "consent {} references missing request {}",
            consent.id, consent.consent_request_id
        ))
        .into()),
    }
}

fn write_consent(consents: &TransactionalTree, consent: &ConsentModel) -> TxResult<()> {
    let encoded = minicbor::to_vec(consent).map_err(ConsentError::from)?;
    consents.insert(consent.id.as_bytes(), encoded)?;
    Ok(())
}
