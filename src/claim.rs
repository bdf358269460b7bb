//! Ownership of consents (end users) and of consent requests (requesters).
use super::consent::ConsentRecordStore;
use super::error::{ConsentError, Result};
use super::identity::IdentityDirectory;
use super::registry::ConsentRequestRegistry;
use std::sync::Arc;
use tracing::debug;

/// How a consent relates to the user asking about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    UserOwned,
    Unowned,
    Owned, // by another user
}

/// How a consent request relates to the requester asking about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterOwnership {
    Owner,
    OrgOwned,
    OtherOwner,
}

#[derive(Clone)]
pub struct ConsentClaimResolver {
    consents: ConsentRecordStore,
    registry: ConsentRequestRegistry,
    directory: Arc<dyn IdentityDirectory>,
}

impl ConsentClaimResolver {
    pub fn new(
        consents: ConsentRecordStore,
        registry: ConsentRequestRegistry,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        Self {
            consents,
            registry,
            directory,
        }
    }

    pub fn validate_owner(&self, consent_id: &str, user_id: &str) -> Result<Ownership> {
        let ownership = self.consents.require(consent_id)?.ownership(user_id);
        debug!(consent_id, user_id, ?ownership, "validated consent owner");
        Ok(ownership)
    }

    /// Claim the consent for `user_id`. The ownership check and the write are a
    /// single conditional update, so of several racing callers exactly one
    /// gets `Unowned` back and the others fail with `Conflict`.
    pub fn claim(&self, consent_id: &str, user_id: &str) -> Result<Ownership> {
        self.consents.claim(consent_id, user_id)
    }

    /// Requester-side authorization against a consent request.
    pub fn check_owner_matches(
        &self,
        request_id: &str,
        caller_requester_id: &str,
    ) -> Result<RequesterOwnership> {
        let request = self.registry.require(request_id)?;
        if request.owner_id == caller_requester_id {
            return Ok(RequesterOwnership::Owner);
        }

        let Some(caller_org) = self.directory.org_for_requester(caller_requester_id)? else {
            return Ok(RequesterOwnership::OtherOwner);
        };
        self.validate_org_owner(&caller_org.org_id, request_id)
    }

    /// Whether `org_id` is the org of the request's owner.
    pub fn validate_org_owner(&self, org_id: &str, request_id: &str) -> Result<RequesterOwnership> {
        let request = self.registry.require(request_id)?;
        let owner_org = self
            .directory
            .org_for_requester(&request.owner_id)?
            .ok_or_else(|| {
                ConsentError::Storage(format!(
                    "owner {} of request {request_id} has no org",
                    request.owner_id
                ))
            })?;

        if owner_org.org_id == org_id {
            Ok(RequesterOwnership::OrgOwned)
        } else {
            Ok(RequesterOwnership::OtherOwner)
        }
    }
}
