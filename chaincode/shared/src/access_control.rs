//! Admin/doctor authorization policy.
//!
//! The very first call against an empty ledger cannot find an admin record
//! to check against, so two narrow bootstrap paths exist:
//! - peer-admin identities of a recognized affiliation may run the
//!   operations on the bootstrap allow-list without an identity check;
//! - ledger initialization is allowed when the caller has no user record,
//!   and when the check itself fails. Initialization only ever creates the
//!   admin record if it is absent, so allowing it cannot escalate anything.
//!
//! Every other internal failure denies.

use tracing::{debug, info, warn};

use crate::{
    functions, lookup_role, ChaincodeConfig, ChaincodeError, ChaincodeResult, CredentialContext,
    EntityKind, IdentityResolver, LedgerStub, ResolvedIdentity, Role,
};

/// Evaluates admin and doctor predicates for a single call
pub struct AccessGuard<'a, R: IdentityResolver + ?Sized> {
    config: &'a ChaincodeConfig,
    resolver: &'a R,
}

impl<'a, R: IdentityResolver + ?Sized> AccessGuard<'a, R> {
    pub fn new(config: &'a ChaincodeConfig, resolver: &'a R) -> Self {
        Self { config, resolver }
    }

    /// Effective caller of this call
    pub fn caller(&self, ctx: &CredentialContext) -> ResolvedIdentity {
        self.resolver.resolve(ctx)
    }

    /// Peer-admin identity of a recognized affiliation running an
    /// allow-listed bootstrap operation
    pub fn is_bootstrap_call(&self, ctx: &CredentialContext) -> bool {
        self.config.is_bootstrap_affiliation(&ctx.affiliation)
            && self.config.is_bootstrap_function(&ctx.function)
    }

    pub fn is_admin<S: LedgerStub + ?Sized>(&self, stub: &S, ctx: &CredentialContext) -> bool {
        if self.is_bootstrap_call(ctx) {
            info!(
                function = %ctx.function,
                affiliation = %ctx.affiliation,
                "bootstrap operation authorized for peer admin"
            );
            return true;
        }

        match self.check_admin(stub, ctx) {
            Ok(allowed) => allowed,
            Err(err) => {
                let initializing = ctx.is_invoking(functions::INIT_LEDGER);
                warn!(
                    function = %ctx.function,
                    error = %err,
                    allowed = initializing,
                    "admin check failed"
                );
                initializing
            }
        }
    }

    fn check_admin<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        ctx: &CredentialContext,
    ) -> ChaincodeResult<bool> {
        let caller = self.caller(ctx);
        let initializing = ctx.is_invoking(functions::INIT_LEDGER);

        // The placeholder id is not evidence of anything
        if caller.is_fallback() {
            return Ok(initializing);
        }

        if caller.id == self.config.superuser_id {
            return Ok(true);
        }

        match lookup_role(stub, &caller.id)? {
            Some(role) => Ok(role == Role::Admin),
            None => {
                if !initializing {
                    debug!(caller = %caller.id, "user does not exist");
                }
                Ok(initializing)
            }
        }
    }

    /// Whether the caller is a registered doctor.
    ///
    /// Fails with `NotFound` when the caller has no user record.
    pub fn is_doctor<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        ctx: &CredentialContext,
    ) -> ChaincodeResult<bool> {
        let caller = self.caller(ctx);
        match lookup_role(stub, &caller.id)? {
            Some(role) => Ok(role == Role::Doctor),
            None => Err(ChaincodeError::not_found(EntityKind::User, caller.id)),
        }
    }

    /// Fail with `Unauthorized(message)` unless the caller is an admin
    pub fn require_admin<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        ctx: &CredentialContext,
        message: &str,
    ) -> ChaincodeResult<()> {
        if self.is_admin(stub, ctx) {
            return Ok(());
        }
        warn!(function = %ctx.function, "admin authorization denied");
        Err(ChaincodeError::Unauthorized(message.to_string()))
    }

    /// Fail with `Unauthorized(message)` unless the caller is a doctor.
    ///
    /// A lookup failure counts as a denial.
    pub fn require_doctor<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        ctx: &CredentialContext,
        message: &str,
    ) -> ChaincodeResult<ResolvedIdentity> {
        match self.is_doctor(stub, ctx) {
            Ok(true) => Ok(self.caller(ctx)),
            Ok(false) => {
                warn!(function = %ctx.function, "doctor authorization denied");
                Err(ChaincodeError::Unauthorized(message.to_string()))
            }
            Err(err) => {
                warn!(function = %ctx.function, error = %err, "doctor check failed");
                Err(ChaincodeError::Unauthorized(message.to_string()))
            }
        }
    }
}
