//! Embedded storage for the ledger and the records chained to it
use super::error::Result;
use std::path::Path;

/// Named trees (one per logical table):
///   txn_records      len ++ chainId ++ sequenceId(BE) → cbor(TransactionRecord)
///   txn_heads        chainId                          → cbor(latest TransactionRecord)
///   consent_requests requestId                        → cbor(ConsentRequestModel)
///   consents         consentId                        → cbor(ConsentModel)
///   consent_data     dataId                           → cbor(ConsentData)
///   user_consents    len ++ userId ++ consentId       → [] (membership set)
#[derive(Clone)]
pub struct ConsentDb {
    db: sled::Db,
    pub(crate) records: sled::Tree,
    pub(crate) heads: sled::Tree,
    pub(crate) requests: sled::Tree,
    pub(crate) consents: sled::Tree,
    pub(crate) consent_data: sled::Tree,
    pub(crate) user_consents: sled::Tree,
}

impl ConsentDb {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway database that is removed when the last handle drops.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            records: db.open_tree("txn_records")?,
            heads: db.open_tree("txn_heads")?,
            requests: db.open_tree("consent_requests")?,
            consents: db.open_tree("consents")?,
            consent_data: db.open_tree("consent_data")?,
            user_consents: db.open_tree("user_consents")?,
            db,
        })
    }

    /// The underlying handle, for collaborators that keep their own trees.
    pub fn sled(&self) -> &sled::Db {
        &self.db
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// `len(prefix) as u32 BE ++ prefix ++ suffix`. The length makes a prefix scan
/// exact even when one prefix is a leading substring of another (`alice` and
/// `alice/bob`).
pub(crate) fn composite_key(prefix: &str, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + prefix.len() + suffix.len());
    key.extend_from_slice(&(prefix.len() as u32).to_be_bytes());
    key.extend_from_slice(prefix.as_bytes());
    key.extend_from_slice(suffix);
    key
}

pub(crate) fn prefix_of(prefix: &str) -> Vec<u8> {
    composite_key(prefix, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_keys_sort_by_suffix() {
        let a = composite_key("chain_x", &1u64.to_be_bytes());
        let b = composite_key("chain_x", &256u64.to_be_bytes());

        assert!(a < b);
        assert!(a.starts_with(&prefix_of("chain_x")));
        assert!(!a.starts_with(&prefix_of("chain_")));
    }

    #[test]
    fn prefix_scan_ignores_longer_prefixes() {
        let nested = composite_key("alice/bob", b"consent_1");
        let plain = composite_key("alice", b"consent_2");

        assert!(!nested.starts_with(&prefix_of("alice")));
        assert!(plain.starts_with(&prefix_of("alice")));
        assert_eq!(&plain[prefix_of("alice").len()..], b"consent_2");
    }
}
