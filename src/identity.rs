//! Identity and ownership lookups. Users, requesters and orgs are owned by an
//! external identity provider; the lifecycle only compares their ids.
use super::error::{ConsentError, Result};
use super::store::ConsentDb;
use tracing::debug;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OrgModel {
    #[n(0)]
    pub org_id: String,
    #[n(1)]
    pub name: String,
}

/// An org-affiliated actor that defines consent requests.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RequesterModel {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub org_id: String,
}

pub trait IdentityDirectory: Send + Sync {
    fn requester(&self, requester_id: &str) -> Result<Option<RequesterModel>>;
    fn org_for_requester(&self, requester_id: &str) -> Result<Option<OrgModel>>;
    fn user_exists(&self, user_id: &str) -> Result<bool>;
}

/// Directory backed by local trees, populated through the `register_*` calls.
pub struct SledDirectory {
    orgs: sled::Tree,
    requesters: sled::Tree,
    users: sled::Tree,
}

impl SledDirectory {
    pub fn new(db: &ConsentDb) -> Result<Self> {
        let db = db.sled();
        Ok(Self {
            orgs: db.open_tree("orgs")?,
            requesters: db.open_tree("requesters")?,
            users: db.open_tree("users")?,
        })
    }

    pub fn register_org(&self, org: &OrgModel) -> Result<()> {
        self.orgs.insert(org.org_id.as_bytes(), minicbor::to_vec(org)?)?;
        Ok(())
    }

    pub fn register_requester(&self, requester: &RequesterModel) -> Result<()> {
        if !self.orgs.contains_key(requester.org_id.as_bytes())? {
            return Err(ConsentError::Validation(format!(
                "requester {} references unknown org {}",
                requester.id, requester.org_id
            )));
        }
        self.requesters
            .insert(requester.id.as_bytes(), minicbor::to_vec(requester)?)?;
        Ok(())
    }

    pub fn register_user(&self, user_id: &str) -> Result<()> {
        self.users.insert(user_id.as_bytes(), b"".as_ref())?;
        Ok(())
    }
}

impl IdentityDirectory for SledDirectory {
    fn requester(&self, requester_id: &str) -> Result<Option<RequesterModel>> {
        match self.requesters.get(requester_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn org_for_requester(&self, requester_id: &str) -> Result<Option<OrgModel>> {
        let Some(requester) = self.requester(requester_id)? else {
            debug!(requester_id, "no such requester");
            return Ok(None);
        };
        match self.orgs.get(requester.org_id.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn user_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.users.contains_key(user_id.as_bytes())?)
    }
}
