pub mod ledger;
pub mod orchestrator;
pub mod session_client;
pub mod timeline;
pub mod wizard;

pub use ledger::{
    CommitmentBridge, CommitmentError, CommitmentRecord, CommitmentStatus, LedgerAgreementRecord,
    LedgerConnector, LedgerError, LedgerSettings, MissingLedgerConnector, RecordAgreementCall,
};
pub use orchestrator::{
    LifecyclePhase, NegotiationEvent, NegotiationOrchestrator, OrchestratorError,
    OrchestratorSnapshot,
};
pub use session_client::{ServiceError, SessionClient};
pub use wizard::{NegotiationWizard, Stage, WizardError};
