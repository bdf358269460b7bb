//! Append-only transaction ledger.
//!
//! Every tracked entity owns one chain of [`TransactionRecord`]s. Records are
//! never updated in place; a status change is a new record whose parent is the
//! previous head of the chain. The `txn_heads` tree holds a copy of each
//! chain's latest record and is read inside every appending transaction, so
//! sled's conflict detection serializes appends per chain: a writer that read a
//! head someone else replaced is re-run against the new head.
use super::error::{ConsentError, Result};
use super::store::{ConsentDb, composite_key, prefix_of};
use super::types::{TimeStamp, TxnStatus};
use super::utils::{CHAIN_HRP, new_uuid_to_bech32};
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use tracing::{debug, info};

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, ConsentError>;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    #[n(0)]
    pub chain_id: String,
    #[n(1)]
    pub sequence_id: u64,
    #[n(2)]
    pub status: TxnStatus,
    #[n(3)]
    pub timestamp: TimeStamp<Utc>,
    #[n(4)]
    pub parent_sequence_id: Option<u64>, // None only for the first record of a chain
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOrder {
    Ascending,
    Descending,
}

#[derive(Clone)]
pub struct TransactionLedger {
    records: sled::Tree,
    heads: sled::Tree,
}

impl TransactionLedger {
    pub fn new(db: &ConsentDb) -> Self {
        Self {
            records: db.records.clone(),
            heads: db.heads.clone(),
        }
    }

    /// Start a new chain holding a single parentless record.
    pub fn create_chain(&self, initial_status: TxnStatus) -> Result<String> {
        let chain_id = new_uuid_to_bech32(CHAIN_HRP)?;

        let record = (&self.records, &self.heads).transaction(|(records, heads)| {
            ChainTx::new(records, heads).create(&chain_id, initial_status)
        })?;

        info!(chain_id = %record.chain_id, status = %record.status, "created ledger chain");
        Ok(chain_id)
    }

    /// The record with the greatest sequence id in the chain.
    pub fn read_latest(&self, chain_id: &str) -> Result<TransactionRecord> {
        match self.heads.get(chain_id.as_bytes())? {
            Some(bytes) => Ok(minicbor::decode(&bytes)?),
            None => Err(ConsentError::not_found("ledger chain", chain_id)),
        }
    }

    pub fn read_history(&self, chain_id: &str, order: HistoryOrder) -> Result<Vec<TransactionRecord>> {
        let mut history = Vec::new();
        for item in self.records.scan_prefix(prefix_of(chain_id)) {
            let (_, bytes) = item?;
            history.push(minicbor::decode::<TransactionRecord>(&bytes)?);
        }

        if history.is_empty() {
            return Err(ConsentError::not_found("ledger chain", chain_id));
        }
        // keys sort by big-endian sequence id, so the scan is already ascending
        if order == HistoryOrder::Descending {
            history.reverse();
        }

        debug!(chain_id, records = history.len(), "read ledger history");
        Ok(history)
    }

    /// Append `status` to the chain. Fails once the chain has been voided.
    pub fn append(&self, chain_id: &str, status: TxnStatus) -> Result<TransactionRecord> {
        let record = (&self.records, &self.heads).transaction(|(records, heads)| {
            ChainTx::new(records, heads).append(chain_id, status)
        })?;

        info!(
            chain_id,
            status = %record.status,
            sequence_id = record.sequence_id,
            "appended ledger record"
        );
        Ok(record)
    }

    /// Append `VOIDED` unless the chain already ends in it. Returns the new
    /// record, or `None` when the call was a no-op.
    pub fn void_chain(&self, chain_id: &str) -> Result<Option<TransactionRecord>> {
        let record = (&self.records, &self.heads)
            .transaction(|(records, heads)| ChainTx::new(records, heads).void(chain_id))?;

        match &record {
            Some(rec) => info!(chain_id, sequence_id = rec.sequence_id, "voided ledger chain"),
            None => debug!(chain_id, "ledger chain already voided"),
        }
        Ok(record)
    }
}

/// Ledger operations inside a caller-owned sled transaction, so that a chain
/// append commits or aborts together with the record rows it describes.
pub(crate) struct ChainTx<'a> {
    records: &'a TransactionalTree,
    heads: &'a TransactionalTree,
}

impl<'a> ChainTx<'a> {
    pub(crate) fn new(records: &'a TransactionalTree, heads: &'a TransactionalTree) -> Self {
        Self { records, heads }
    }

    pub(crate) fn create(&self, chain_id: &str, status: TxnStatus) -> TxResult<TransactionRecord> {
        if self.heads.get(chain_id.as_bytes())?.is_some() {
            return Err(ConsentError::Storage(format!("ledger chain {chain_id} already exists")).into());
        }

        let record = TransactionRecord {
            chain_id: chain_id.to_string(),
            sequence_id: self.records.generate_id()?,
            status,
            timestamp: TimeStamp::new(),
            parent_sequence_id: None,
        };
        self.write(&record)?;

        Ok(record)
    }

    pub(crate) fn latest(&self, chain_id: &str) -> TxResult<TransactionRecord> {
        match self.heads.get(chain_id.as_bytes())? {
            Some(bytes) => Ok(minicbor::decode(&bytes).map_err(ConsentError::from)?),
            None => Err(ConsentError::not_found("ledger chain", chain_id).into()),
        }
    }

    pub(crate) fn append(&self, chain_id: &str, status: TxnStatus) -> TxResult<TransactionRecord> {
        let latest = self.latest(chain_id)?;
        if latest.status == TxnStatus::Voided {
            return Err(ConsentError::InvalidTransition(format!(
                "ledger chain {chain_id} is voided; cannot append {status}"
            ))
            .into());
        }

        let sequence_id = self.records.generate_id()?;
        if sequence_id <= latest.sequence_id {
            return Err(ConsentError::Storage(format!(
                "sequence id {sequence_id} does not advance ledger chain {chain_id} past {}",
                latest.sequence_id
            ))
            .into());
        }

        let record = TransactionRecord {
            chain_id: chain_id.to_string(),
            sequence_id,
            status,
            timestamp: TimeStamp::new(),
            parent_sequence_id: Some(latest.sequence_id),
        };
        self.write(&record)?;

        Ok(record)
    }

    pub(crate) fn void(&self, chain_id: &str) -> TxResult<Option<TransactionRecord>> {
        if self.latest(chain_id)?.status == TxnStatus::Voided {
            return Ok(None);
        }
        self.append(chain_id, TxnStatus::Voided).map(Some)
    }

    fn write(&self, record: &TransactionRecord) -> TxResult<()> {
        let encoded = minicbor::to_vec(record).map_err(ConsentError::from)?;
        let key = composite_key(&record.chain_id, &record.sequence_id.to_be_bytes());

        self.records.insert(key, encoded.clone())?;
        self.heads.insert(record.chain_id.as_bytes(), encoded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> TransactionLedger {
        TransactionLedger::new(&ConsentDb::temporary().unwrap())
    }

    #[test]
    fn new_chain_has_single_parentless_record() {
        let ledger = ledger();
        let chain_id = ledger.create_chain(TxnStatus::Created).unwrap();

        let latest = ledger.read_latest(&chain_id).unwrap();
        assert_eq!(latest.chain_id, chain_id);
        assert_eq!(latest.status, TxnStatus::Created);
        assert_eq!(latest.parent_sequence_id, None);

        let history = ledger.read_history(&chain_id, HistoryOrder::Ascending).unwrap();
        assert_eq!(history, vec![latest]);
    }

    #[test]
    fn append_links_to_previous_head() {
        let ledger = ledger();
        let chain_id = ledger.create_chain(TxnStatus::Created).unwrap();
        let first = ledger.read_latest(&chain_id).unwrap();

        let second = ledger.append(&chain_id, TxnStatus::InProgress).unwrap();
        assert_eq!(second.parent_sequence_id, Some(first.sequence_id));
        assert!(second.sequence_id > first.sequence_id);
        assert_eq!(ledger.read_latest(&chain_id).unwrap(), second);

        let desc = ledger.read_history(&chain_id, HistoryOrder::Descending).unwrap();
        assert_eq!(desc, vec![second, first]);
    }

    #[test]
    fn chains_do_not_share_history() {
        let ledger = ledger();
        let a = ledger.create_chain(TxnStatus::Created).unwrap();
        let b = ledger.create_chain(TxnStatus::Created).unwrap();
        ledger.append(&a, TxnStatus::InProgress).unwrap();

        assert_eq!(ledger.read_history(&a, HistoryOrder::Ascending).unwrap().len(), 2);
        assert_eq!(ledger.read_history(&b, HistoryOrder::Ascending).unwrap().len(), 1);
        assert_eq!(ledger.read_latest(&b).unwrap().status, TxnStatus::Created);
    }

    #[test]
    fn append_after_void_is_rejected() {
        let ledger = ledger();
        let chain_id = ledger.create_chain(TxnStatus::Created).unwrap();
        ledger.append(&chain_id, TxnStatus::Voided).unwrap();

        for status in TxnStatus::ALL {
            assert!(matches!(
                ledger.append(&chain_id, status),
                Err(ConsentError::InvalidTransition(_))
            ));
        }
        assert_eq!(
            ledger.read_history(&chain_id, HistoryOrder::Ascending).unwrap().len(),
            2
        );
    }

    #[test]
    fn void_chain_is_idempotent() {
        let ledger = ledger();
        let chain_id = ledger.create_chain(TxnStatus::Created).unwrap();

        assert!(ledger.void_chain(&chain_id).unwrap().is_some());
        assert!(ledger.void_chain(&chain_id).unwrap().is_none());
        assert_eq!(
            ledger.read_history(&chain_id, HistoryOrder::Ascending).unwrap().len(),
            2
        );
    }

    #[test]
    fn unknown_chain_is_not_found() {
        let ledger = ledger();

        assert!(matches!(
            ledger.read_latest("chain_missing"),
            Err(ConsentError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.read_history("chain_missing", HistoryOrder::Ascending),
            Err(ConsentError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.append("chain_missing", TxnStatus::InProgress),
            Err(ConsentError::NotFound { .. })
        ));
    }
}
