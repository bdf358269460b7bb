//! Identifier generation

use super::error::{ConsentError, Result};
use bech32::Bech32m;
use uuid7::uuid7;

pub const CHAIN_HRP: &str = "chain_";
pub const REQUEST_HRP: &str = "request_";
pub const CONSENT_HRP: &str = "consent_";
pub const DATA_HRP: &str = "data_";
pub const SCHEMA_HRP: &str = "schema_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|e| ConsentError::Validation(format!("invalid id prefix '{hrp}': {e}")))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| ConsentError::Storage(format!("failed to encode id: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_prefixed_unique_ids() {
        let a = new_uuid_to_bech32(CONSENT_HRP).unwrap();
        let b = new_uuid_to_bech32(CONSENT_HRP).unwrap();

        assert!(a.starts_with("consent_1"));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_prefix() {
        assert!(matches!(
            new_uuid_to_bech32(""),
            Err(ConsentError::Validation(_))
        ));
    }
}
