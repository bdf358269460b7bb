//! Service layer API for the consent lifecycle.
//!
//! ```text
//! CREATED ──claim──▶ IN_PROGRESS ──▶ FULFILLED | REJECTED | ACCEPTED
//!    └───────────────────┴──────────▶ VOIDED
//! ```
//!
//! Every state change goes through [`ConsentRecordStore`], which re-checks its
//! guard inside the writing transaction. The checks made here first exist to
//! report the most precise error to the caller.
use super::claim::{ConsentClaimResolver, Ownership, RequesterOwnership};
use super::config::LifecycleConfig;
use super::consent::{Completion, ConsentData, ConsentModel, ConsentRecordStore, DataSubmission};
use super::error::{ConsentError, Result};
use super::identity::{IdentityDirectory, OrgModel, RequesterModel};
use super::ledger::{TransactionLedger, TransactionRecord};
use super::registry::{ConsentRequestModel, ConsentRequestRegistry};
use super::schema::SchemaStore;
use super::store::ConsentDb;
use super::types::{TimeStamp, TxnStatus};
use super::void::VoidPropagation;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Statuses that rule out any further completion of a consent.
pub const COMPLETION_BLOCKED: [TxnStatus; 4] = [
    TxnStatus::Rejected,
    TxnStatus::Voided,
    TxnStatus::Accepted,
    TxnStatus::Fulfilled,
];

#[derive(Debug, Clone, Default)]
pub struct PendingConsentOptions {
    /// Issue the consent directly to this user instead of leaving it unowned.
    pub user_id: Option<String>,
    pub expiry: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentView {
    pub consent: ConsentModel,
    pub org: OrgModel,
    pub request: ConsentRequestModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilledConsentView {
    pub consent: ConsentModel,
    pub org: OrgModel,
    pub request: ConsentRequestModel,
    pub data: ConsentData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentStates {
    pub consent: TxnStatus,
    pub request: TxnStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentWithStatus {
    pub consent: ConsentModel,
    pub status: TxnStatus,
}

#[derive(Clone)]
pub struct ConsentLifecycle {
    ledger: TransactionLedger,
    registry: ConsentRequestRegistry,
    consents: ConsentRecordStore,
    claims: ConsentClaimResolver,
    voids: VoidPropagation,
    directory: Arc<dyn IdentityDirectory>,
    config: LifecycleConfig,
}

impl ConsentLifecycle {
    pub fn new(
        db: &ConsentDb,
        schemas: Arc<dyn SchemaStore>,
        directory: Arc<dyn IdentityDirectory>,
        config: LifecycleConfig,
    ) -> Self {
        let ledger = TransactionLedger::new(db);
        let registry = ConsentRequestRegistry::new(db, schemas);
        let consents = ConsentRecordStore::new(db);
        let claims = ConsentClaimResolver::new(consents.clone(), registry.clone(), directory.clone());
        let voids = VoidPropagation::new(ledger.clone(), consents.clone(), registry.clone());

        Self {
            ledger,
            registry,
            consents,
            claims,
            voids,
            directory,
            config,
        }
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ConsentRequestRegistry {
        &self.registry
    }

    pub fn consents(&self) -> &ConsentRecordStore {
        &self.consents
    }

    pub fn claims(&self) -> &ConsentClaimResolver {
        &self.claims
    }

    pub fn voids(&self) -> &VoidPropagation {
        &self.voids
    }

    /// Issue a consent against a live request.
    pub fn create_pending_consent(
        &self,
        request_id: &str,
        requester: &RequesterModel,
        options: PendingConsentOptions,
    ) -> Result<ConsentModel> {
        let request = self.registry.require(request_id)?;
        if self.ledger.read_latest(&request.chain_id)?.status == TxnStatus::Voided {
            warn!(request_id, "refusing to issue consent against voided request");
            return Err(ConsentError::InvalidTransition(format!(
                "consent request {request_id} has been voided"
            )));
        }

        if self.directory.requester(&requester.id)?.is_none() {
            return Err(ConsentError::not_found("requester", &requester.id));
        }
        if let Some(user_id) = &options.user_id {
            if !self.directory.user_exists(user_id)? {
                return Err(ConsentError::not_found("user", user_id));
            }
        }

        let expiry = match options.expiry {
            Some(expiry) if expiry.is_past() => {
                return Err(ConsentError::Validation("consent expiry is in the past".into()));
            }
            Some(expiry) => expiry,
            None => TimeStamp::new()
                .checked_add(self.config.default_expiry)
                .ok_or_else(|| ConsentError::Validation("default expiry is out of range".into()))?,
        };

        self.consents
            .create_pending(&request, &requester.id, options.user_id.as_deref(), expiry)
    }

    /// Open a consent for the user who is going to complete it, claiming it on
    /// first read.
    pub fn read_consent_for_request(&self, consent_id: &str, caller_user_id: &str) -> Result<ConsentView> {
        match self.claims.claim(consent_id, caller_user_id) {
            Ok(Ownership::Unowned) => {
                info!(consent_id, user_id = caller_user_id, "consent claimed on first read")
            }
            Ok(_) => {}
            Err(err) => {
                warn!(consent_id, user_id = caller_user_id, %err, "consent read refused");
                return Err(err);
            }
        }

        let consent = self.consents.require(consent_id)?;
        self.assemble_view(consent)
    }

    /// `false` when the consent's chain, or its request's chain, currently sits
    /// in one of `blocked`.
    pub fn validate_transition_allowed(&self, consent_id: &str, blocked: &[TxnStatus]) -> Result<bool> {
        let consent = self.consents.require(consent_id)?;
        if blocked.contains(&self.ledger.read_latest(&consent.chain_id)?.status) {
            return Ok(false);
        }
        self.validate_request_transition_allowed(&consent.consent_request_id, blocked)
    }

    pub fn validate_request_transition_allowed(&self, request_id: &str, blocked: &[TxnStatus]) -> Result<bool> {
        let request = self.registry.require(request_id)?;
        let status = self.ledger.read_latest(&request.chain_id)?.status;
        Ok(!blocked.contains(&status))
    }

    /// Store the submitted data and mark the consent fulfilled.
    pub fn submit_data_and_fulfil(
        &self,
        consent_id: &str,
        user_id: &str,
        submission: DataSubmission,
    ) -> Result<ConsentModel> {
        self.ensure_completable(consent_id, user_id)?;
        if submission.expiry.as_ref().is_some_and(|expiry| expiry.is_past()) {
            return Err(ConsentError::Validation("submitted expiry is in the past".into()));
        }

        let consent = self.consents.require(consent_id)?;
        let request = self.parent_request(&consent)?;
        let completion = Completion::Fulfil {
            data: ConsentData::new(&request.schema_id, &submission.submit_data)?,
            expiry: submission.expiry,
        };

        let (consent, _) = self
            .consents
            .complete(consent_id, user_id, &COMPLETION_BLOCKED, &completion)?;
        Ok(consent)
    }

    pub fn reject(&self, consent_id: &str, user_id: &str) -> Result<TransactionRecord> {
        self.ensure_completable(consent_id, user_id)?;
        let (_, record) = self
            .consents
            .complete(consent_id, user_id, &COMPLETION_BLOCKED, &Completion::Reject)?;
        Ok(record)
    }

    /// Accept the consent without attaching any data.
    pub fn accept_without_data(&self, consent_id: &str, user_id: &str) -> Result<TransactionRecord> {
        self.ensure_completable(consent_id, user_id)?;
        let (_, record) = self
            .consents
            .complete(consent_id, user_id, &COMPLETION_BLOCKED, &Completion::Accept)?;
        Ok(record)
    }

    /// The consent with its submitted data. The void check runs first, so a
    /// consent whose own chain or parent request is voided fails with
    /// `InvalidTransition` even though its status is not `FULFILLED`. Any other
    /// unfulfilled status fails with `Conflict`.
    pub fn read_fulfilled_consent(&self, consent_id: &str) -> Result<FulfilledConsentView> {
        let consent = self.consents.require(consent_id)?;
        if self.voids.is_voided(consent_id)? {
            return Err(ConsentError::InvalidTransition(format!(
                "consent {consent_id} or its request has been voided"
            )));
        }

        let status = self.ledger.read_latest(&consent.chain_id)?.status;
        if status != TxnStatus::Fulfilled {
            return Err(ConsentError::Conflict(format!(
                "consent {consent_id} has not been fulfilled yet (currently {status})"
            )));
        }

        let data_id = consent.consent_data_id.as_deref().ok_or_else(|| {
            ConsentError::Storage(format!("fulfilled consent {consent_id} has no data"))
        })?;
        let data = self.consents.read_data(data_id)?.ok_or_else(|| {
            ConsentError::Storage(format!("consent {consent_id} references missing data {data_id}"))
        })?;

        let view = self.assemble_view(consent)?;
        Ok(FulfilledConsentView {
            consent: view.consent,
            org: view.org,
            request: view.request,
            data,
        })
    }

    pub fn read_consent_and_request_state(&self, consent_id: &str) -> Result<ConsentStates> {
        let consent = self.consents.require(consent_id)?;
        let request = self.parent_request(&consent)?;

        Ok(ConsentStates {
            consent: self.ledger.read_latest(&consent.chain_id)?.status,
            request: self.ledger.read_latest(&request.chain_id)?.status,
        })
    }

    /// Requester-side read: the caller must belong to the org that owns the
    /// consent's request, and neither may be voided.
    pub fn read_consent_for_requester(&self, consent_id: &str, requester_id: &str) -> Result<ConsentModel> {
        let consent = self.consents.require(consent_id)?;

        match self
            .claims
            .check_owner_matches(&consent.consent_request_id, requester_id)?
        {
            RequesterOwnership::Owner | RequesterOwnership::OrgOwned => {}
            RequesterOwnership::OtherOwner => {
                warn!(consent_id, requester_id, "consent read by requester outside owning org");
                return Err(ConsentError::Conflict(format!(
                    "consent {consent_id} is not linked with the requester's org"
                )));
            }
        }

        if self.voids.is_voided(consent_id)? {
            return Err(ConsentError::InvalidTransition(format!(
                "consent {consent_id} or its request has been voided"
            )));
        }
        Ok(consent)
    }

    pub fn consents_for_user(&self, user_id: &str) -> Result<Vec<ConsentWithStatus>> {
        self.consents
            .consents_for_user(user_id)?
            .into_iter()
            .map(|consent| -> Result<ConsentWithStatus> {
                let status = self.ledger.read_latest(&consent.chain_id)?.status;
                Ok(ConsentWithStatus { consent, status })
            })
            .collect()
    }

    pub fn fulfilled_consents_for_user(&self, user_id: &str) -> Result<Vec<ConsentWithStatus>> {
        let mut consents = self.consents_for_user(user_id)?;
        consents.retain(|entry| entry.status == TxnStatus::Fulfilled);
        Ok(consents)
    }

    fn ensure_completable(&self, consent_id: &str, user_id: &str) -> Result<()> {
        match self.claims.validate_owner(consent_id, user_id)? {
            Ownership::UserOwned => {}
            Ownership::Owned => {
                warn!(consent_id, user_id, "completion attempted on another user's consent");
                return Err(ConsentError::Conflict(format!(
                    "consent {consent_id} has been claimed by another user"
                )));
            }
            Ownership::Unowned => {
                warn!(consent_id, user_id, "completion attempted before claim");
                return Err(ConsentError::InvalidTransition(format!(
                    "consent {consent_id} has not been claimed"
                )));
            }
        }

        if self.voids.is_voided(consent_id)? {
            warn!(consent_id, "completion attempted on voided consent");
            return Err(ConsentError::InvalidTransition(format!(
                "consent {consent_id} or its request has been voided"
            )));
        }
        if !self.validate_transition_allowed(consent_id, &COMPLETION_BLOCKED)? {
            warn!(consent_id, "completion attempted on completed consent");
            return Err(ConsentError::InvalidTransition(format!(
                "consent {consent_id} is not in a state that allows this action"
            )));
        }
        Ok(())
    }

    fn parent_request(&self, consent: &ConsentModel) -> Result<ConsentRequestModel> {
        self.registry.read(&consent.consent_request_id)?.ok_or_else(|| {
            ConsentError::Storage(format!(
                "consent {} references missing request {}",
                consent.id, consent.consent_request_id
            ))
        })
    }

    fn assemble_view(&self, consent: ConsentModel) -> Result<ConsentView> {
        let request = self.parent_request(&consent)?;
        let org = self
            .directory
            .org_for_requester(&consent.requester_id)?
            .ok_or_else(|| {
                ConsentError::Storage(format!(
                    "requester {} of consent {} has no org",
                    consent.requester_id, consent.id
                ))
            })?;

        Ok(ConsentView {
            consent,
            org,
            request,
        })
    }
}
