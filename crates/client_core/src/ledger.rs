use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::domain::FinalizedAgreement;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

/// Two implied decimal places in the ledger's integer price unit.
pub const PRICE_UNIT_SCALE: f64 = 100.0;
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentStatus {
    Idle,
    Submitting,
    AwaitingConfirmation,
    Confirmed,
    Failed,
}

/// Client-local tracking of one commitment transaction. Transitions are
/// forward-only: Idle -> Submitting -> AwaitingConfirmation ->
/// {Confirmed | Failed}. A fresh record is installed only when a new
/// negotiation produces a new finalized agreement.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitmentRecord {
    pub status: CommitmentStatus,
    pub transaction_hash: Option<String>,
    pub error_message: Option<String>,
}

impl CommitmentRecord {
    fn idle() -> Self {
        Self {
            status: CommitmentStatus::Idle,
            transaction_hash: None,
            error_message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            CommitmentStatus::Confirmed | CommitmentStatus::Failed
        )
    }
}

/// Arguments for the ledger's `recordAgreement` call, already converted to
/// ledger units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAgreementCall {
    /// 32-byte hex value, `0x`-prefixed.
    pub agreement_hash: String,
    pub party_a: String,
    pub party_b: String,
    pub price_units: u64,
    pub quantity_units: u64,
}

/// The ledger's `getAgreement` view of a recorded agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAgreementRecord {
    pub agreement_hash: String,
    pub party_a: String,
    pub party_b: String,
    pub price_units: u64,
    pub quantity_units: u64,
    pub timestamp: u64,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger rejected the transaction: {0}")]
    Rejected(String),
    #[error("transaction reverted on chain: {0}")]
    Reverted(String),
    #[error("no agreement recorded under {0}")]
    NotFound(String),
    #[error("ledger endpoint unreachable: {0}")]
    Transport(String),
    #[error("ledger connector is unavailable")]
    Unavailable,
}

/// Seam to the wallet/chain-client library. Implementations own signing and
/// transport; the bridge owns argument conversion and lifecycle tracking.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Broadcasts the commitment call, returning the transaction hash once
    /// the network accepts it.
    async fn submit_record(
        &self,
        contract_address: &str,
        call: &RecordAgreementCall,
    ) -> Result<String, LedgerError>;

    /// Resolves once the chain reports the transaction included and
    /// successful; fails on revert or drop.
    async fn wait_for_confirmation(&self, transaction_hash: &str) -> Result<(), LedgerError>;

    /// Read-only `getAgreement` query.
    async fn fetch_agreement(
        &self,
        contract_address: &str,
        agreement_hash: &str,
    ) -> Result<LedgerAgreementRecord, LedgerError>;
}

pub struct MissingLedgerConnector;

#[async_trait]
impl LedgerConnector for MissingLedgerConnector {
    async fn submit_record(
        &self,
        _contract_address: &str,
        _call: &RecordAgreementCall,
    ) -> Result<String, LedgerError> {
        Err(LedgerError::Unavailable)
    }

    async fn wait_for_confirmation(&self, _transaction_hash: &str) -> Result<(), LedgerError> {
        Err(LedgerError::Unavailable)
    }

    async fn fetch_agreement(
        &self,
        _contract_address: &str,
        _agreement_hash: &str,
    ) -> Result<LedgerAgreementRecord, LedgerError> {
        Err(LedgerError::Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Absent address fails every commitment fast with a configuration error.
    pub contract_address: Option<String>,
    pub confirmation_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            contract_address: None,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommitmentError {
    #[error("a commitment was already submitted for this agreement")]
    AlreadySubmitted,
    #[error("agreement hash '{0}' is not a hex digest")]
    InvalidHash(String),
    #[error("ledger contract address is not configured")]
    MissingContractAddress,
    #[error("price {0} cannot be encoded as ledger units")]
    UnencodablePrice(f64),
    #[error("submission rejected before broadcast: {0}")]
    Submission(String),
    #[error("transaction failed on chain: {0}")]
    Chain(String),
    #[error("transaction confirmation timed out after {0:?}")]
    ConfirmationTimeout(Duration),
    #[error("no agreement recorded under {0}")]
    NotRecorded(String),
}

/// Prefixes the service-computed hash with `0x` for the ledger call. The
/// client never recomputes the digest, and an already-prefixed hash is not
/// prefixed twice.
pub fn format_agreement_hash(hash: &str) -> Result<String, CommitmentError> {
    let digits = hash.strip_prefix("0x").unwrap_or(hash);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CommitmentError::InvalidHash(hash.to_string()));
    }
    Ok(format!("0x{digits}"))
}

/// Fixed-point encoding with two implied decimal places, round-half-up:
/// `75.5` becomes `7550`, and the `0.005` boundary resolves to `1`.
pub fn price_to_ledger_units(price: f64) -> Result<u64, CommitmentError> {
    if !price.is_finite() || price < 0.0 {
        return Err(CommitmentError::UnencodablePrice(price));
    }
    let scaled = (price * PRICE_UNIT_SCALE).round();
    if scaled > u64::MAX as f64 {
        return Err(CommitmentError::UnencodablePrice(price));
    }
    Ok(scaled as u64)
}

/// Builds the `recordAgreement` arguments from finalized terms. A missing
/// counter-party address falls back to the caller's own address; this keeps
/// single-party test sessions recordable and is logged so it never passes
/// silently.
pub fn build_record_call(
    finalized: &FinalizedAgreement,
    caller_address: &str,
) -> Result<RecordAgreementCall, CommitmentError> {
    let agreement_hash = format_agreement_hash(&finalized.agreement_hash)?;
    let price_units = price_to_ledger_units(finalized.price)?;

    let party_a = match &finalized.buyer_address {
        Some(address) => address.clone(),
        None => {
            warn!("ledger: buyer address missing from finalized terms, falling back to caller");
            caller_address.to_string()
        }
    };
    let party_b = match &finalized.seller_address {
        Some(address) => address.clone(),
        None => {
            warn!("ledger: seller address missing from finalized terms, falling back to caller");
            caller_address.to_string()
        }
    };

    Ok(RecordAgreementCall {
        agreement_hash,
        party_a,
        party_b,
        price_units,
        quantity_units: u64::from(finalized.quantity),
    })
}

/// Bridges a finalized agreement into the ledger's commitment call and
/// tracks the transaction to confirmation. At most one submission per
/// agreement: once the Idle slot is claimed, further submits are rejected.
pub struct CommitmentBridge {
    connector: Arc<dyn LedgerConnector>,
    settings: LedgerSettings,
    record: Mutex<CommitmentRecord>,
    updates: watch::Sender<CommitmentRecord>,
}

impl CommitmentBridge {
    pub fn new(connector: Arc<dyn LedgerConnector>, settings: LedgerSettings) -> Arc<Self> {
        let (updates, _) = watch::channel(CommitmentRecord::idle());
        Arc::new(Self {
            connector,
            settings,
            record: Mutex::new(CommitmentRecord::idle()),
            updates,
        })
    }

    pub async fn record(&self) -> CommitmentRecord {
        self.record.lock().await.clone()
    }

    /// Every record transition is published here; the confirmation watch
    /// keeps publishing after the submitting caller has moved on.
    pub fn subscribe(&self) -> watch::Receiver<CommitmentRecord> {
        self.updates.subscribe()
    }

    /// Submits the commitment transaction. Returns the record as it stands
    /// once the network has accepted (or rejected) the broadcast; the
    /// confirmation outcome arrives later through the record itself.
    pub async fn submit(
        self: &Arc<Self>,
        finalized: &FinalizedAgreement,
        caller_address: &str,
    ) -> Result<CommitmentRecord, CommitmentError> {
        let contract_address = self
            .settings
            .contract_address
            .clone()
            .ok_or(CommitmentError::MissingContractAddress)?;
        // Argument conversion happens before the Idle slot is claimed, so a
        // malformed hash or price leaves the record untouched.
        let call = build_record_call(finalized, caller_address)?;

        {
            let mut guard = self.record.lock().await;
            if guard.status != CommitmentStatus::Idle {
                return Err(CommitmentError::AlreadySubmitted);
            }
            guard.status = CommitmentStatus::Submitting;
            let _ = self.updates.send(guard.clone());
        }
        info!(
            agreement_hash = %call.agreement_hash,
            price_units = call.price_units,
            quantity_units = call.quantity_units,
            "ledger: submitting commitment"
        );

        let transaction_hash = match self.connector.submit_record(&contract_address, &call).await {
            Ok(hash) => hash,
            Err(err) => {
                error!("ledger: submission rejected: {err}");
                self.transition(|record| {
                    record.status = CommitmentStatus::Failed;
                    record.error_message = Some(err.to_string());
                })
                .await;
                return Err(CommitmentError::Submission(err.to_string()));
            }
        };

        let record = self
            .transition(|record| {
                record.status = CommitmentStatus::AwaitingConfirmation;
                record.transaction_hash = Some(transaction_hash.clone());
            })
            .await;
        info!(transaction_hash = %transaction_hash, "ledger: transaction accepted, awaiting confirmation");

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            bridge.watch_confirmation(transaction_hash).await;
        });

        Ok(record)
    }

    /// Surfaces the ledger's read-only view of a recorded agreement.
    pub async fn fetch_recorded(
        &self,
        agreement_hash: &str,
    ) -> Result<LedgerAgreementRecord, CommitmentError> {
        let contract_address = self
            .settings
            .contract_address
            .clone()
            .ok_or(CommitmentError::MissingContractAddress)?;
        let formatted = format_agreement_hash(agreement_hash)?;
        self.connector
            .fetch_agreement(&contract_address, &formatted)
            .await
            .map_err(|err| match err {
                LedgerError::NotFound(hash) => CommitmentError::NotRecorded(hash),
                other => CommitmentError::Chain(other.to_string()),
            })
    }

    /// Installs a fresh Idle record for the next finalized agreement. Only
    /// the reset path of the wizard calls this; the record for the previous
    /// agreement is gone for good, matching its one-shot lifecycle.
    pub async fn reset(&self) {
        let mut guard = self.record.lock().await;
        *guard = CommitmentRecord::idle();
        let _ = self.updates.send(guard.clone());
    }

    async fn watch_confirmation(&self, transaction_hash: String) {
        let deadline = self.settings.confirmation_timeout;
        let outcome =
            tokio::time::timeout(deadline, self.connector.wait_for_confirmation(&transaction_hash))
                .await;
        match outcome {
            Ok(Ok(())) => {
                info!(transaction_hash = %transaction_hash, "ledger: commitment confirmed");
                self.settle_watched(&transaction_hash, |record| {
                    record.status = CommitmentStatus::Confirmed;
                })
                .await;
            }
            Ok(Err(err)) => {
                error!(transaction_hash = %transaction_hash, "ledger: transaction failed: {err}");
                self.settle_watched(&transaction_hash, |record| {
                    record.status = CommitmentStatus::Failed;
                    record.error_message = Some(err.to_string());
                })
                .await;
            }
            Err(_) => {
                let err = CommitmentError::ConfirmationTimeout(deadline);
                error!(transaction_hash = %transaction_hash, "ledger: {err}");
                self.settle_watched(&transaction_hash, |record| {
                    record.status = CommitmentStatus::Failed;
                    record.error_message = Some(err.to_string());
                })
                .await;
            }
        }
    }

    async fn transition(&self, apply: impl FnOnce(&mut CommitmentRecord)) -> CommitmentRecord {
        let mut guard = self.record.lock().await;
        apply(&mut guard);
        let snapshot = guard.clone();
        let _ = self.updates.send(snapshot.clone());
        snapshot
    }

    /// Applies a confirmation outcome only if the record still belongs to the
    /// watched transaction; a reset in the meantime means the outcome is for
    /// a record that no longer exists.
    async fn settle_watched(
        &self,
        transaction_hash: &str,
        apply: impl FnOnce(&mut CommitmentRecord),
    ) {
        let mut guard = self.record.lock().await;
        if guard.transaction_hash.as_deref() != Some(transaction_hash) {
            return;
        }
        apply(&mut guard);
        let _ = self.updates.send(guard.clone());
    }
}


#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
