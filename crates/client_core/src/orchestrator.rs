use std::{sync::Arc, time::Duration};

use shared::{
    domain::{Agreement, FinalizedAgreement, Offer, Session, SessionId, SessionParams},
    error::ValidationError,
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    session_client::{ServiceError, SessionClient},
    timeline,
};

const TIMELINE_RETRY_ATTEMPTS: usize = 3;
const TIMELINE_RETRY_DELAY: Duration = Duration::from_millis(400);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Where the session lifecycle currently stands. A failed step never
/// advances the phase; it restores the phase of the last successful step and
/// records the error, so the caller can retry without recreating anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Form,
    Creating,
    Negotiating,
    Finalizing,
    Ready,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid session parameters: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("operation requires phase {required:?}, current phase is {actual:?}")]
    WrongPhase {
        required: LifecyclePhase,
        actual: LifecyclePhase,
    },
    #[error("timeline refresh is unavailable in phase {0:?}")]
    RefreshUnavailable(LifecyclePhase),
    #[error("a negotiation run is already outstanding for session {0}")]
    NegotiationInProgress(i64),
    #[error("no active session")]
    NoActiveSession,
    #[error("no finalized agreement available")]
    NoFinalizedAgreement,
}

#[derive(Debug, Clone)]
pub enum NegotiationEvent {
    PhaseChanged(LifecyclePhase),
    TimelineUpdated(Vec<Offer>),
    AgreementReady(FinalizedAgreement),
    Error(String),
}

/// Point-in-time copy of the orchestrator state for display.
#[derive(Debug, Clone)]
pub struct OrchestratorSnapshot {
    pub phase: LifecyclePhase,
    pub session: Option<Session>,
    pub offers: Vec<Offer>,
    pub agreement: Option<Agreement>,
    pub finalized: Option<FinalizedAgreement>,
    pub last_error: Option<String>,
}

struct OrchestratorState {
    phase: LifecyclePhase,
    session: Option<Session>,
    offers: Vec<Offer>,
    agreement: Option<Agreement>,
    finalized: Option<FinalizedAgreement>,
    last_error: Option<String>,
    run_inflight: bool,
}

impl OrchestratorState {
    fn initial() -> Self {
        Self {
            phase: LifecyclePhase::Form,
            session: None,
            offers: Vec::new(),
            agreement: None,
            finalized: None,
            last_error: None,
            run_inflight: false,
        }
    }
}

/// Drives one negotiation session through create, auto-run, timeline
/// retrieval and finalization, strictly in that order. Owns the only mutable
/// session state in the system.
pub struct NegotiationOrchestrator {
    service: SessionClient,
    inner: Mutex<OrchestratorState>,
    events: broadcast::Sender<NegotiationEvent>,
}

impl NegotiationOrchestrator {
    pub fn new(service: SessionClient) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            service,
            inner: Mutex::new(OrchestratorState::initial()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NegotiationEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> OrchestratorSnapshot {
        let guard = self.inner.lock().await;
        OrchestratorSnapshot {
            phase: guard.phase,
            session: guard.session.clone(),
            offers: guard.offers.clone(),
            agreement: guard.agreement.clone(),
            finalized: guard.finalized.clone(),
            last_error: guard.last_error.clone(),
        }
    }

    pub async fn phase(&self) -> LifecyclePhase {
        self.inner.lock().await.phase
    }

    pub async fn finalized_agreement(&self) -> Result<FinalizedAgreement, OrchestratorError> {
        self.inner
            .lock()
            .await
            .finalized
            .clone()
            .ok_or(OrchestratorError::NoFinalizedAgreement)
    }

    /// Validates the parameters locally, then asks the service for a session.
    /// Success moves the lifecycle to `Negotiating`; failure returns to
    /// `Form` with the error surfaced and recorded.
    pub async fn create_session(
        &self,
        params: SessionParams,
    ) -> Result<SessionId, OrchestratorError> {
        params.validate()?;
        {
            let mut guard = self.inner.lock().await;
            if guard.phase != LifecyclePhase::Form {
                return Err(OrchestratorError::WrongPhase {
                    required: LifecyclePhase::Form,
                    actual: guard.phase,
                });
            }
            guard.phase = LifecyclePhase::Creating;
        }
        self.emit(NegotiationEvent::PhaseChanged(LifecyclePhase::Creating));

        match self.service.create_session(&params).await {
            Ok(created) => {
                let session_id = created.session_id;
                {
                    let mut guard = self.inner.lock().await;
                    guard.phase = LifecyclePhase::Negotiating;
                    guard.session = Some(created.session);
                    guard.last_error = None;
                }
                self.emit(NegotiationEvent::PhaseChanged(LifecyclePhase::Negotiating));
                info!(session_id = session_id.0, "negotiation: session created");
                Ok(session_id)
            }
            Err(err) => {
                {
                    let mut guard = self.inner.lock().await;
                    guard.phase = LifecyclePhase::Form;
                    guard.last_error = Some(err.to_string());
                }
                self.emit(NegotiationEvent::Error(err.to_string()));
                warn!("negotiation: session creation failed: {err}");
                Err(err.into())
            }
        }
    }

    /// Runs the full auto-negotiate -> fetch-timeline -> finalize sequence.
    /// The finalize call is never issued before the timeline has been fetched
    /// at least once, so the finalized terms reflect the last recorded offer
    /// pair. A second call while one is outstanding is rejected, never run
    /// concurrently.
    pub async fn run_to_agreement(&self) -> Result<FinalizedAgreement, OrchestratorError> {
        let session_id = {
            let mut guard = self.inner.lock().await;
            if guard.phase != LifecyclePhase::Negotiating {
                return Err(OrchestratorError::WrongPhase {
                    required: LifecyclePhase::Negotiating,
                    actual: guard.phase,
                });
            }
            let session_id = guard
                .session
                .as_ref()
                .map(|session| session.id)
                .ok_or(OrchestratorError::NoActiveSession)?;
            if guard.run_inflight {
                return Err(OrchestratorError::NegotiationInProgress(session_id.0));
            }
            guard.run_inflight = true;
            session_id
        };

        let result = self.run_to_agreement_inner(session_id).await;

        {
            let mut guard = self.inner.lock().await;
            guard.run_inflight = false;
            match &result {
                Ok(_) => guard.last_error = None,
                Err(err) => guard.last_error = Some(err.to_string()),
            }
        }

        match &result {
            Ok(finalized) => {
                info!(
                    session_id = session_id.0,
                    price = finalized.price,
                    quantity = finalized.quantity,
                    "negotiation: agreement finalized"
                );
                self.emit(NegotiationEvent::AgreementReady(finalized.clone()));
            }
            Err(err) => {
                warn!(session_id = session_id.0, "negotiation: run failed: {err}");
                self.emit(NegotiationEvent::Error(err.to_string()));
            }
        }

        result
    }

    async fn run_to_agreement_inner(
        &self,
        session_id: SessionId,
    ) -> Result<FinalizedAgreement, OrchestratorError> {
        // Step 1: let the engine play out the rounds. The phase stays at
        // Negotiating until finalization starts, so a failure here leaves the
        // session exactly where it was.
        let agreement = self.service.run_auto_negotiation(session_id).await?;
        info!(
            session_id = session_id.0,
            price = agreement.price,
            quantity = agreement.quantity,
            "negotiation: auto run settled"
        );
        {
            let mut guard = self.inner.lock().await;
            guard.agreement = Some(agreement);
        }

        // Step 2: record the rounds before asking for the final terms.
        let offers = self.fetch_timeline_with_retry(session_id).await?;
        let merged = {
            let mut guard = self.inner.lock().await;
            let merged = timeline::merge_refreshed(&guard.offers, offers);
            guard.offers = merged.clone();
            merged
        };
        self.emit(NegotiationEvent::TimelineUpdated(merged));

        // Step 3: finalize.
        {
            let mut guard = self.inner.lock().await;
            guard.phase = LifecyclePhase::Finalizing;
        }
        self.emit(NegotiationEvent::PhaseChanged(LifecyclePhase::Finalizing));

        match self.service.finalize(session_id).await {
            Ok(finalized) => {
                {
                    let mut guard = self.inner.lock().await;
                    guard.phase = LifecyclePhase::Ready;
                    guard.finalized = Some(finalized.clone());
                }
                self.emit(NegotiationEvent::PhaseChanged(LifecyclePhase::Ready));
                Ok(finalized)
            }
            Err(err) => {
                let mut guard = self.inner.lock().await;
                guard.phase = LifecyclePhase::Negotiating;
                Err(err.into())
            }
        }
    }

    /// Re-fetches and re-normalizes the offer timeline without touching the
    /// lifecycle phase. Available while negotiating and after the agreement
    /// is ready.
    pub async fn refresh_timeline(&self) -> Result<Vec<Offer>, OrchestratorError> {
        let session_id = {
            let guard = self.inner.lock().await;
            if !matches!(
                guard.phase,
                LifecyclePhase::Negotiating | LifecyclePhase::Ready
            ) {
                return Err(OrchestratorError::RefreshUnavailable(guard.phase));
            }
            guard
                .session
                .as_ref()
                .map(|session| session.id)
                .ok_or(OrchestratorError::NoActiveSession)?
        };

        let fetched = self.fetch_timeline_with_retry(session_id).await?;
        let merged = {
            let mut guard = self.inner.lock().await;
            let merged = timeline::merge_refreshed(&guard.offers, fetched);
            guard.offers = merged.clone();
            merged
        };
        self.emit(NegotiationEvent::TimelineUpdated(merged.clone()));
        Ok(merged)
    }

    /// Discards all session state back to the blank form. Rejected while a
    /// negotiation run is outstanding so a completing run cannot resurrect
    /// stale data into the fresh state.
    pub async fn reset(&self) -> Result<(), OrchestratorError> {
        let mut guard = self.inner.lock().await;
        if guard.run_inflight {
            let session_id = guard.session.as_ref().map(|s| s.id.0).unwrap_or_default();
            return Err(OrchestratorError::NegotiationInProgress(session_id));
        }
        *guard = OrchestratorState::initial();
        drop(guard);
        self.emit(NegotiationEvent::PhaseChanged(LifecyclePhase::Form));
        Ok(())
    }

    /// The timeline fetch is an idempotent GET, so transient failures get a
    /// bounded linear-backoff retry. Create and auto-negotiate are never
    /// retried; replaying them would create duplicate sessions or rounds.
    async fn fetch_timeline_with_retry(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Offer>, ServiceError> {
        let mut attempt = 0;
        loop {
            match self.service.timeline(session_id).await {
                Ok(offers) => return Ok(timeline::normalize(offers)),
                Err(err) if err.is_transient() && attempt + 1 < TIMELINE_RETRY_ATTEMPTS => {
                    attempt += 1;
                    warn!(
                        session_id = session_id.0,
                        attempt,
                        max_attempts = TIMELINE_RETRY_ATTEMPTS,
                        "negotiation: timeline fetch failed, retrying: {err}"
                    );
                    tokio::time::sleep(TIMELINE_RETRY_DELAY * attempt as u32).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn emit(&self, event: NegotiationEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
