//! Redemption outcomes and activation result classification.

use serde::{Deserialize, Serialize};

use crate::remote::ActivationResponse;

/// Terminal or retryable result of one redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionOutcome {
    Redeemed,
    AlreadyOwnedElsewhere,
    RateLimited,
    InvalidOrRegionLocked,
    TransientError,
}

impl RedemptionOutcome {
    /// Retryable outcomes are attempted again on a later run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RedemptionOutcome::RateLimited | RedemptionOutcome::TransientError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionOutcome::Redeemed => "redeemed",
            RedemptionOutcome::AlreadyOwnedElsewhere => "already_owned",
            RedemptionOutcome::RateLimited => "rate_limited",
            RedemptionOutcome::InvalidOrRegionLocked => "invalid_or_region_locked",
            RedemptionOutcome::TransientError => "transient_error",
        }
    }
}

impl std::fmt::Display for RedemptionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steam `PurchaseResultDetail` values the classifier names.
pub mod codes {
    pub const ALREADY_PURCHASED: i64 = 9;
    pub const INVALID_KEY: i64 = 14;
    pub const DUPLICATE_ACTIVATION_CODE: i64 = 15;
    pub const REGION_LOCKED: i64 = 13;
    pub const BASE_GAME_REQUIRED: i64 = 24;
    pub const NOT_AVAILABLE: i64 = 36;
    pub const WRONG_STOREFRONT: i64 = 50;
    pub const RATE_LIMITED: i64 = 53;
}

/// How a single activation response should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Final {
        outcome: RedemptionOutcome,
        code: Option<i64>,
        detail: String,
    },
    /// Ambiguous answer; worth another try.
    Ambiguous(String),
}

pub fn classify_activation(response: &ActivationResponse) -> Classified {
    match response {
        ActivationResponse::Activated { items } => Classified::Final {
            outcome: RedemptionOutcome::Redeemed,
            code: None,
            detail: if items.is_empty() {
                "activated".to_string()
            } else {
                format!("activated: {}", items.join(", "))
            },
        },
        ActivationResponse::Failed { code } => {
            let code = *code;
            let (outcome, detail) = match code {
                codes::ALREADY_PURCHASED => (
                    RedemptionOutcome::AlreadyOwnedElsewhere,
                    "product already owned",
                ),
                codes::DUPLICATE_ACTIVATION_CODE => (
                    RedemptionOutcome::AlreadyOwnedElsewhere,
                    "key already activated by this or another account",
                ),
                codes::RATE_LIMITED => (
                    RedemptionOutcome::RateLimited,
                    "too many activation attempts",
                ),
                codes::REGION_LOCKED => (
                    RedemptionOutcome::InvalidOrRegionLocked,
                    "key is locked to another region",
                ),
                codes::INVALID_KEY => (RedemptionOutcome::InvalidOrRegionLocked, "invalid key"),
                codes::BASE_GAME_REQUIRED => (
                    RedemptionOutcome::InvalidOrRegionLocked,
                    "base game required",
                ),
                codes::NOT_AVAILABLE => (
                    RedemptionOutcome::InvalidOrRegionLocked,
                    "requires a console or is not available",
                ),
                codes::WRONG_STOREFRONT => (
                    RedemptionOutcome::InvalidOrRegionLocked,
                    "key belongs to another storefront",
                ),
                _ => (
                    RedemptionOutcome::InvalidOrRegionLocked,
                    "activation refused",
                ),
            };
            Classified::Final {
                outcome,
                code: Some(code),
                detail: detail.to_string(),
            }
        }
        ActivationResponse::Unrecognized(body) => Classified::Ambiguous(body.clone()),
    }
}
