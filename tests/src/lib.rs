//! Medical Ledger Test Suite
//!
//! Cross-crate scenarios driven the way the web front-end drives the
//! ledger:
//! - Ledger transitions through the positional dispatcher
//! - Patient listing partition by caller role
//! - Attachment write saga and authorized download

use std::sync::Arc;

use chrono::DateTime;
use medledger_attachments::{CallIdentity, GatewayError, LedgerGateway, LocalGateway};
use medledger_shared::{functions, ChaincodeConfig, CredentialContext, Role};

pub mod attachments;
pub mod ledger;
pub mod listing;

/// 2024-01-01T00:00:00Z
pub const TX_SECONDS: i64 = 1_704_067_200;

/// Certificate subject of a user-specific identity
pub fn cert(cn: &str) -> String {
    format!("x509::/OU=client/CN={cn}::/C=US/ST=North Carolina/O=org1.example.com/CN=ca.org1.example.com")
}

/// Call signed by `cn` from a non-bootstrap organization
pub fn call(cn: &str, function: &str, args: &[&str]) -> CredentialContext {
    CredentialContext::new(cert(cn), "Org3MSP")
        .invoking(function, args.iter().copied())
        .at_seconds(TX_SECONDS)
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn admin() -> CallIdentity {
    CallIdentity::new("admin", Role::Admin)
}

/// Gateway with a fixed clock and an initialized ledger
pub fn clinic_gateway() -> Result<LocalGateway, GatewayError> {
    let gateway = LocalGateway::new(Arc::new(ChaincodeConfig::default()))
        .with_clock(|| DateTime::from_timestamp(TX_SECONDS, 0).unwrap_or_default());
    gateway.submit(&admin(), functions::INIT_LEDGER, &[])?;
    Ok(gateway)
}
