//! Walks one consent through its whole life against an on-disk database:
//! a requester issues it, a user claims and fulfils it, the requester reads
//! the data back, and finally the request is voided.
//!
//!   RUST_LOG=consent_ledger=debug cargo run --example consent_flow [db-path]
use anyhow::Context;
use consent_ledger::{
    config::LifecycleConfig,
    consent::DataSubmission,
    identity::{OrgModel, RequesterModel, SledDirectory},
    ledger::HistoryOrder,
    lifecycle::{ConsentLifecycle, PendingConsentOptions},
    registry::ConsentRequestOptions,
    schema::{DataEntry, SledSchemaStore},
    store::ConsentDb,
};
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,consent_ledger=debug".parse().unwrap()),
        )
        .init();

    let db = match std::env::args().nth(1) {
        Some(path) => ConsentDb::open(&path).with_context(|| format!("opening database {path}"))?,
        None => ConsentDb::temporary()?,
    };
    let config = LifecycleConfig::from_env()?;

    let directory = Arc::new(SledDirectory::new(&db)?);
    directory.register_org(&OrgModel {
        org_id: "org_clinic".into(),
        name: "Northside Clinic".into(),
    })?;
    let requester = RequesterModel {
        id: "requester_frontdesk".into(),
        org_id: "org_clinic".into(),
    };
    directory.register_requester(&requester)?;
    directory.register_user("user_patient")?;

    let lifecycle = ConsentLifecycle::new(&db, Arc::new(SledSchemaStore::new(&db)?), directory, config);

    let created = lifecycle.registry().create_with_entries(
        &ConsentRequestOptions {
            title: "Share medical history".into(),
            description: "Allergies and current medication".into(),
            callback_url: "https://clinic.example/consents".into(),
            owner_id: requester.id.clone(),
        },
        &[DataEntry {
            schema: r#"{"type":"object","properties":{"allergies":{"type":"string"}}}"#.into(),
            ui_schema: None,
            data: None,
        }],
    )?;
    let consent = lifecycle.create_pending_consent(
        &created.request_id,
        &requester,
        PendingConsentOptions::default(),
    )?;

    let view = lifecycle.read_consent_for_request(&consent.id, "user_patient")?;
    info!(title = %view.request.title, org = %view.org.name, "user opened consent");

    lifecycle.submit_data_and_fulfil(
        &consent.id,
        "user_patient",
        DataSubmission {
            submit_data: r#"{"allergies":"penicillin"}"#.into(),
            expiry: None,
        },
    )?;

    lifecycle
        .read_consent_for_requester(&consent.id, &requester.id)
        .context("requester read")?;
    let fulfilled = lifecycle.read_fulfilled_consent(&consent.id)?;
    info!(hash = %fulfilled.data.hash, verified = fulfilled.data.verify(), "requester read data");

    lifecycle.voids().void_consent_request(&created.request_id)?;
    info!(voided = lifecycle.voids().is_voided(&consent.id)?, "request voided");

    for record in lifecycle
        .ledger()
        .read_history(&consent.chain_id, HistoryOrder::Ascending)?
    {
        println!(
            "{:>6} {:<12} parent={:?}",
            record.sequence_id,
            record.status.as_str(),
            record.parent_sequence_id
        );
    }

    db.flush()?;
    Ok(())
}
