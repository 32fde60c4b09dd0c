//! Effective caller identity resolution.
//!
//! The front-end submits every call with one shared service certificate and
//! names the real end user in the call itself. Resolution therefore walks a
//! fixed fallback chain; later steps exist to patch gaps in earlier ones, so
//! the order below must not change:
//!
//! 1. Shared service certificate: transient user id, then the `id`
//!    attribute, then (record creation only) the embedded creator or the
//!    first positional argument.
//! 2. Common name parsed from the certificate subject.
//! 3. Embedded creator, then the raw identity string, then the superuser id.

use std::sync::Arc;

use crate::{functions, ChaincodeConfig, CredentialContext};

/// Step of the fallback chain that produced an id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentitySource {
    Transient,
    Attribute,
    Creator,
    FirstArgument,
    CommonName,
    RawIdentity,
    /// Nothing usable was supplied
    SuperuserFallback,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub id: String,
    pub source: IdentitySource,
}

impl ResolvedIdentity {
    fn new(id: impl Into<String>, source: IdentitySource) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    /// The id is the literal superuser placeholder, not caller evidence
    pub fn is_fallback(&self) -> bool {
        self.source == IdentitySource::SuperuserFallback
    }
}

/// Derives a stable caller id from raw credential material. Never fails.
pub trait IdentityResolver {
    fn resolve(&self, ctx: &CredentialContext) -> ResolvedIdentity;
}

/// Resolver for X.509 subject strings such as
/// `x509::/OU=client/CN=DOC1::/C=US/ST=North Carolina/O=org1.example.com/CN=ca.org1.example.com`
#[derive(Clone, Debug, Default)]
pub struct CertificateIdentityResolver {
    config: Arc<ChaincodeConfig>,
}

impl CertificateIdentityResolver {
    pub fn new(config: Arc<ChaincodeConfig>) -> Self {
        Self { config }
    }

    fn is_shared_identity(&self, identity: &str) -> bool {
        self.config
            .shared_identity_markers
            .iter()
            .any(|marker| !marker.is_empty() && identity.contains(marker.as_str()))
    }

    /// Impersonation evidence carried by a shared service certificate
    fn impersonated(&self, ctx: &CredentialContext) -> Option<ResolvedIdentity> {
        if let Some(id) = ctx.transient_str(&self.config.transient_user_key) {
            return Some(ResolvedIdentity::new(id, IdentitySource::Transient));
        }

        if let Some(id) = ctx.attribute(&self.config.identity_attribute) {
            return Some(ResolvedIdentity::new(id, IdentitySource::Attribute));
        }

        if ctx.is_invoking(functions::ADD_MEDICAL_RECORD) && !ctx.args.is_empty() {
            if let Some(creator) = ctx.creator() {
                return Some(ResolvedIdentity::new(creator, IdentitySource::Creator));
            }
            if let Some(first) = ctx.args.first().filter(|arg| !arg.is_empty()) {
                return Some(ResolvedIdentity::new(
                    first.as_str(),
                    IdentitySource::FirstArgument,
                ));
            }
        }

        None
    }
}

impl IdentityResolver for CertificateIdentityResolver {
    fn resolve(&self, ctx: &CredentialContext) -> ResolvedIdentity {
        if self.is_shared_identity(&ctx.identity) {
            if let Some(resolved) = self.impersonated(ctx) {
                return resolved;
            }
        }

        if let Some(cn) = parse_common_name(
            &ctx.identity,
            &self.config.common_name_marker,
            self.config.common_name_delimiter,
        ) {
            return ResolvedIdentity::new(cn, IdentitySource::CommonName);
        }

        if let Some(creator) = ctx.creator() {
            return ResolvedIdentity::new(creator, IdentitySource::Creator);
        }

        if !ctx.identity.is_empty() {
            return ResolvedIdentity::new(ctx.identity.as_str(), IdentitySource::RawIdentity);
        }

        tracing::warn!(
            function = %ctx.function,
            "no usable caller identity; falling back to superuser placeholder"
        );
        ResolvedIdentity::new(
            self.config.superuser_id.as_str(),
            IdentitySource::SuperuserFallback,
        )
    }
}

/// Substring between the first `marker` and the next `delimiter`.
///
/// Returns `None` when the marker is missing, no delimiter follows it, or
/// the token is empty.
pub fn parse_common_name<'a>(identity: &'a str, marker: &str, delimiter: char) -> Option<&'a str> {
    if marker.is_empty() {
        return None;
    }
    let start = identity.find(marker)? + marker.len();
    let len = identity[start..].find(delimiter)?;
    if len == 0 {
        return None;
    }
    Some(&identity[start..start + len])
}
