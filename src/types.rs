//! Shared value types: timestamps and ledger statuses
use super::error::ConsentError;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Returns `None` when the result falls outside the representable range.
    pub fn checked_add(&self, delta: TimeDelta) -> Option<Self> {
        self.0.checked_add_signed(delta).map(Self)
    }
    pub fn is_past(&self) -> bool {
        self.0 <= Utc::now()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Status carried by every ledger record. The `#[n]` indices are the stored
/// representation and must never be renumbered.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cbor(index_only)]
pub enum TxnStatus {
    #[n(0)]
    Created,
    #[n(1)]
    InProgress,
    #[n(2)]
    Accepted,
    #[n(3)]
    Rejected,
    #[n(4)]
    Fulfilled,
    #[n(5)]
    Voided,
}

impl TxnStatus {
    pub const ALL: [TxnStatus; 6] = [
        TxnStatus::Created,
        TxnStatus::InProgress,
        TxnStatus::Accepted,
        TxnStatus::Rejected,
        TxnStatus::Fulfilled,
        TxnStatus::Voided,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Created => "CREATED",
            TxnStatus::InProgress => "IN_PROGRESS",
            TxnStatus::Accepted => "ACCEPTED",
            TxnStatus::Rejected => "REJECTED",
            TxnStatus::Fulfilled => "FULFILLED",
            TxnStatus::Voided => "VOIDED",
        }
    }

    /// No lifecycle transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxnStatus::Accepted | TxnStatus::Rejected | TxnStatus::Fulfilled | TxnStatus::Voided
        )
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxnStatus {
    type Err = ConsentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TxnStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ConsentError::Validation(format!("unknown transaction status '{s}'")))
    }
}
