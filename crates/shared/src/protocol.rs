use serde::{Deserialize, Serialize};

use crate::domain::{Agreement, Offer, Session, SessionId};

/// Envelope returned by `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: SessionId,
    pub session: Session,
}

/// Envelope returned by `POST /sessions/{id}/auto`. The service also inlines
/// a raw per-round trace next to the agreement; the client ignores it and
/// reads rounds from the timeline endpoint instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoNegotiationResponse {
    pub agreement: Agreement,
}

/// Envelope returned by `GET /sessions/{id}/timeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineResponse {
    pub offers: Vec<Offer>,
}

/// Error body the service attaches to non-success responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub detail: String,
}
