use std::sync::Arc;

use shared::domain::{FinalizedAgreement, Offer, SessionId, SessionParams};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    ledger::{CommitmentBridge, CommitmentError, CommitmentRecord, LedgerAgreementRecord},
    orchestrator::{NegotiationOrchestrator, OrchestratorError},
};

/// The three wizard stages. Strictly forward, with reset as the only escape
/// hatch back to the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Form,
    Negotiation,
    Agreement,
}

impl Stage {
    /// The complete transition table: `Form -> Negotiation` on session
    /// creation, `Negotiation -> Agreement` on a finalized agreement, and
    /// `{Negotiation, Agreement} -> Form` on explicit reset.
    pub fn can_transition_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Form, Stage::Negotiation)
                | (Stage::Negotiation, Stage::Agreement)
                | (Stage::Negotiation, Stage::Form)
                | (Stage::Agreement, Stage::Form)
        )
    }
}

#[derive(Debug, Error)]
pub enum WizardError {
    #[error("stage transition {from:?} -> {to:?} is not permitted")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("operation requires stage {required:?}, current stage is {actual:?}")]
    WrongStage { required: Stage, actual: Stage },
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Commitment(#[from] CommitmentError),
}

/// Gates which orchestrator and bridge operations are reachable from the
/// current stage. A failed operation never moves the stage; reset discards
/// all session, agreement and commitment state.
pub struct NegotiationWizard {
    orchestrator: Arc<NegotiationOrchestrator>,
    bridge: Arc<CommitmentBridge>,
    stage: Mutex<Stage>,
}

impl NegotiationWizard {
    pub fn new(orchestrator: Arc<NegotiationOrchestrator>, bridge: Arc<CommitmentBridge>) -> Self {
        Self {
            orchestrator,
            bridge,
            stage: Mutex::new(Stage::Form),
        }
    }

    pub async fn stage(&self) -> Stage {
        *self.stage.lock().await
    }

    pub fn orchestrator(&self) -> &Arc<NegotiationOrchestrator> {
        &self.orchestrator
    }

    pub fn bridge(&self) -> &Arc<CommitmentBridge> {
        &self.bridge
    }

    /// Creates the session and advances the wizard to the negotiation stage.
    pub async fn start_negotiation(
        &self,
        params: SessionParams,
    ) -> Result<SessionId, WizardError> {
        self.require_stage(Stage::Form).await?;
        let session_id = self.orchestrator.create_session(params).await?;
        self.advance(Stage::Negotiation).await?;
        Ok(session_id)
    }

    /// Runs the negotiation to a finalized agreement and advances to the
    /// agreement stage.
    pub async fn run_negotiation(&self) -> Result<FinalizedAgreement, WizardError> {
        self.require_stage(Stage::Negotiation).await?;
        let finalized = self.orchestrator.run_to_agreement().await?;
        self.advance(Stage::Agreement).await?;
        Ok(finalized)
    }

    /// Manual timeline refresh, available once a session exists.
    pub async fn refresh_timeline(&self) -> Result<Vec<Offer>, WizardError> {
        let stage = self.stage().await;
        if stage == Stage::Form {
            return Err(WizardError::WrongStage {
                required: Stage::Negotiation,
                actual: stage,
            });
        }
        Ok(self.orchestrator.refresh_timeline().await?)
    }

    /// Submits the finalized agreement to the ledger.
    pub async fn commit_agreement(
        &self,
        caller_address: &str,
    ) -> Result<CommitmentRecord, WizardError> {
        self.require_stage(Stage::Agreement).await?;
        let finalized = self.orchestrator.finalized_agreement().await?;
        Ok(self.bridge.submit(&finalized, caller_address).await?)
    }

    pub async fn commitment_record(&self) -> CommitmentRecord {
        self.bridge.record().await
    }

    /// Ledger read-back of the committed agreement.
    pub async fn recorded_agreement(&self) -> Result<LedgerAgreementRecord, WizardError> {
        self.require_stage(Stage::Agreement).await?;
        let finalized = self.orchestrator.finalized_agreement().await?;
        Ok(self.bridge.fetch_recorded(&finalized.agreement_hash).await?)
    }

    /// Discards everything and returns to the form stage.
    pub async fn reset(&self) -> Result<(), WizardError> {
        let mut stage = self.stage.lock().await;
        if !stage.can_transition_to(Stage::Form) {
            return Err(WizardError::InvalidTransition {
                from: *stage,
                to: Stage::Form,
            });
        }
        self.orchestrator.reset().await?;
        self.bridge.reset().await;
        *stage = Stage::Form;
        info!("wizard: state reset, back to form");
        Ok(())
    }

    async fn require_stage(&self, required: Stage) -> Result<(), WizardError> {
        let actual = self.stage().await;
        if actual != required {
            return Err(WizardError::WrongStage { required, actual });
        }
        Ok(())
    }

    async fn advance(&self, next: Stage) -> Result<(), WizardError> {
        let mut stage = self.stage.lock().await;
        if !stage.can_transition_to(next) {
            return Err(WizardError::InvalidTransition {
                from: *stage,
                to: next,
            });
        }
        *stage = next;
        Ok(())
    }
}
