//! Consent lifecycle over an append-only transaction ledger.
//!
//! Requesters define [`registry::ConsentRequestModel`]s and issue consents
//! against them; users claim a consent and then fulfil, reject or accept it.
//! Every status change of a request or consent is a record on that entity's
//! own ledger chain, so the full history is kept for audit.

pub mod claim;
pub mod config;
pub mod consent;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod schema;
pub mod store;
pub mod types;
pub mod utils;
pub mod void;

pub use error::{ConsentError, ErrorKind, Result};
