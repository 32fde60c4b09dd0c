//! Client side of the ledger: submit transitions, evaluate queries

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use medledger_shared::{
    ChaincodeConfig, ChaincodeError, CredentialContext, ErrorKind, MemoryLedger, Role,
};
use records::{invoke, MedicalManagement};
use thiserror::Error;
use tracing::{debug, warn};

/// Session user on whose behalf a call is made
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallIdentity {
    pub user_id: String,
    pub role: Role,
}

impl CallIdentity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The ledger ran the call and refused it; `message` is its error text
    #[error("{message}")]
    Rejected {
        kind: Option<ErrorKind>,
        message: String,
    },

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn rejected(message: impl Into<String>) -> Self {
        GatewayError::Rejected {
            kind: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            GatewayError::Rejected { kind, .. } => *kind,
            GatewayError::Unavailable(_) => None,
        }
    }
}

impl From<ChaincodeError> for GatewayError {
    fn from(err: ChaincodeError) -> Self {
        GatewayError::Rejected {
            kind: Some(err.kind()),
            message: err.to_string(),
        }
    }
}

/// Named-operation access to the ledger
pub trait LedgerGateway {
    /// Run a transition and wait for it to commit
    fn submit(&self, caller: &CallIdentity, function: &str, args: &[String]) -> Result<String, GatewayError>;

    /// Run a query; nothing is committed
    fn evaluate(&self, caller: &CallIdentity, function: &str, args: &[String]) -> Result<String, GatewayError>;
}

impl<G: LedgerGateway + ?Sized> LedgerGateway for &G {
    fn submit(&self, caller: &CallIdentity, function: &str, args: &[String]) -> Result<String, GatewayError> {
        (**self).submit(caller, function, args)
    }

    fn evaluate(&self, caller: &CallIdentity, function: &str, args: &[String]) -> Result<String, GatewayError> {
        (**self).evaluate(caller, function, args)
    }
}

/// Front-end service certificate shared by every session
pub const SERVICE_IDENTITY: &str =
    "x509::/OU=client/CN=user1::/C=US/ST=North Carolina/L=Durham/O=org1.example.com/CN=ca.org1.example.com";

/// Affiliation a `LocalGateway` signs with unless told otherwise.
///
/// Org1MSP and Org2MSP are bootstrap affiliations: the chaincode lets any
/// caller from them run `initLedger` and `createDoctor` without a stored
/// admin profile. Sessions signed with one of them skip the admin check.
pub const CLIENT_AFFILIATION: &str = "Org3MSP";

pub(crate) type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// In-process gateway over a `MemoryLedger`.
///
/// Calls are signed with the shared service certificate and carry the
/// session user id as transient data, the way the web front-end calls a
/// remote peer.
pub struct LocalGateway {
    ledger: Mutex<MemoryLedger>,
    contract: MedicalManagement,
    config: Arc<ChaincodeConfig>,
    identity: String,
    affiliation: String,
    clock: Clock,
}

impl LocalGateway {
    pub fn new(config: Arc<ChaincodeConfig>) -> Self {
        Self {
            ledger: Mutex::new(MemoryLedger::new()),
            contract: MedicalManagement::new(config.clone()),
            config,
            identity: SERVICE_IDENTITY.to_string(),
            affiliation: CLIENT_AFFILIATION.to_string(),
            clock: Box::new(Utc::now),
        }
    }

    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        self.affiliation = affiliation.into();
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn context(&self, caller: &CallIdentity, function: &str, args: &[String]) -> CredentialContext {
        CredentialContext::new(self.identity.as_str(), self.affiliation.as_str())
            .invoking(function, args.iter().cloned())
            .with_transient(self.config.transient_user_key.as_str(), caller.user_id.as_bytes().to_vec())
            .at((self.clock)())
    }

    /// Run `inspect` against the committed ledger
    pub fn with_ledger<T>(&self, inspect: impl FnOnce(&MemoryLedger) -> T) -> Result<T, GatewayError> {
        let ledger = self
            .ledger
            .lock()
            .map_err(|_| GatewayError::Unavailable("ledger lock poisoned".to_string()))?;
        Ok(inspect(&*ledger))
    }
}

impl LedgerGateway for LocalGateway {
    fn submit(&self, caller: &CallIdentity, function: &str, args: &[String]) -> Result<String, GatewayError> {
        let ctx = self.context(caller, function, args);
        let mut ledger = self
            .ledger
            .lock()
            .map_err(|_| GatewayError::Unavailable("ledger lock poisoned".to_string()))?;

        match ledger.execute(|tx| invoke(&self.contract, tx, &ctx)) {
            Ok(response) => {
                debug!(function, caller = %caller.user_id, "transaction committed");
                Ok(response)
            }
            Err(err) => {
                warn!(function, caller = %caller.user_id, error = %err, "transaction rejected");
                Err(err.into())
            }
        }
    }

    fn evaluate(&self, caller: &CallIdentity, function: &str, args: &[String]) -> Result<String, GatewayError> {
        let ctx = self.context(caller, function, args);
        let ledger = self
            .ledger
            .lock()
            .map_err(|_| GatewayError::Unavailable("ledger lock poisoned".to_string()))?;
        ledger
            .evaluate(|tx| invoke(&self.contract, tx, &ctx))
            .map_err(GatewayError::from)
    }
}
