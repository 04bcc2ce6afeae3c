use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(SessionId);
id_newtype!(OfferId);
id_newtype!(AgreementId);

/// Side of the deal. The service tags offers and sessions with exactly these
/// two values; anything else fails decoding instead of rendering as neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Buyer,
    Seller,
}

impl Party {
    pub fn as_str(self) -> &'static str {
        match self {
            Party::Buyer => "buyer",
            Party::Seller => "seller",
        }
    }

    pub fn counterparty(self) -> Party {
        match self {
            Party::Buyer => Party::Seller,
            Party::Seller => Party::Buyer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Finalized,
}

/// Parameters for one negotiation attempt. Immutable once the session is
/// created; the service echoes them back inside [`Session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub role: Party,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_address: Option<String>,
    pub target_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub quantity: u32,
    pub fairness_weight: f64,
    pub max_rounds: u32,
}

impl SessionParams {
    /// Checks the parameter constraints locally, before any service round-trip.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity < 1 {
            return Err(ValidationError::QuantityTooSmall(self.quantity));
        }
        if !(0.0..=1.0).contains(&self.fairness_weight) {
            return Err(ValidationError::FairnessWeightOutOfRange(
                self.fairness_weight,
            ));
        }
        if self.max_rounds < 1 {
            return Err(ValidationError::MaxRoundsTooSmall(self.max_rounds));
        }
        for price in [self.target_price, self.min_price, self.max_price] {
            if !price.is_finite() || price < 0.0 {
                return Err(ValidationError::InvalidPrice(price));
            }
        }
        if self.min_price > self.max_price {
            return Err(ValidationError::InvertedPriceBounds {
                min: self.min_price,
                max: self.max_price,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub role: Party,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_address: Option<String>,
    pub target_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub quantity: u32,
    pub fairness_weight: f64,
    pub max_rounds: u32,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One round's proposal, produced entirely by the negotiation service.
/// `payload` is an opaque engine dump the client never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub session_id: SessionId,
    pub round: u32,
    pub made_by: Party,
    pub price: f64,
    pub quantity: u32,
    pub fairness: f64,
    pub utility: f64,
    #[serde(default)]
    pub payload: String,
}

/// Settled terms as reported by the auto-negotiation step. The service omits
/// the row identifiers on this path, so they decode tolerantly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AgreementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fairness: Option<f64>,
    /// Hex digest without a `0x` prefix, computed only by the service.
    pub agreement_hash: String,
}

/// Authoritative terms returned by the finalize step; these are what gets
/// committed to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedAgreement {
    pub agreement_hash: String,
    pub price: f64,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_address: Option<String>,
}
