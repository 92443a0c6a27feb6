//! Guardian error taxonomy and HTTP mapping.
//!
//! Every failure is terminal for the triggering call: there are no
//! internal retries, and the response tells the caller how to recover
//! (restart from begin, poll the deadline, run seed recovery).

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use guardian_wallet::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardianError {
    /// The wallet engine has not passed its startup probe yet.
    #[error("guardian not initialized: wallet engine not ready")]
    NotInitialized,

    /// Missing or malformed required fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// Escrow id already finalized.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No pending session / no bounty record for the id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Refund gate: the chain has not reached the recorded deadline.
    #[error("deadline not reached: {blocks_remaining} blocks remaining")]
    DeadlineNotReached { blocks_remaining: u64 },

    /// The signing wallet is not held in this process's memory.
    #[error("wallet not resident: {0}")]
    WalletNotResident(String),

    /// The signing engine rejected an operation; reason verbatim.
    #[error("engine failure: {0}")]
    Engine(String),

    /// The durable registry document could not be written or read.
    #[error("storage error: {0}")]
    Storage(String),
}

impl GuardianError {
    /// Stable machine-readable code used in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DeadlineNotReached { .. } => "DEADLINE_NOT_REACHED",
            Self::WalletNotResident(_) => "WALLET_NOT_RESIDENT",
            Self::Engine(_) => "ENGINE_FAILURE",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<EngineError> for GuardianError {
    fn from(err: EngineError) -> Self {
        GuardianError::Engine(err.to_string())
    }
}

impl actix_web::ResponseError for GuardianError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) | Self::WalletNotResident(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DeadlineNotReached { .. } => StatusCode::FORBIDDEN,
            Self::Engine(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = serde_json::json!({
            "error": self.code(),
            "details": self.to_string(),
        });

        match self {
            Self::DeadlineNotReached { blocks_remaining } => {
                body["blocks_remaining"] = serde_json::json!(blocks_remaining);
            }
            Self::NotFound(_) => {
                body["hint"] = serde_json::json!(
                    "pending sessions are ephemeral; restart the handshake from begin"
                );
            }
            Self::WalletNotResident(_) => {
                body["hint"] = serde_json::json!(
                    "the wallet can be reconstructed from the persisted recovery seed \
                     via the operator recovery procedure"
                );
            }
            _ => {}
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}

pub type GuardianResult<T> = Result<T, GuardianError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn status_codes_match_the_taxonomy() {
        assert_eq!(GuardianError::NotInitialized.status_code(), 503);
        assert_eq!(GuardianError::Validation("x".into()).status_code(), 400);
        assert_eq!(GuardianError::Conflict("x".into()).status_code(), 409);
        assert_eq!(GuardianError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            GuardianError::DeadlineNotReached {
                blocks_remaining: 7
            }
            .status_code(),
            403
        );
        assert_eq!(
            GuardianError::WalletNotResident("x".into()).status_code(),
            400
        );
        assert_eq!(GuardianError::Engine("x".into()).status_code(), 500);
        assert_eq!(GuardianError::Storage("x".into()).status_code(), 500);
    }

    #[test]
    fn deadline_error_reports_exact_blocks_remaining() {
        let err = GuardianError::DeadlineNotReached {
            blocks_remaining: 999_900,
        };
        assert!(err.to_string().contains("999900"));

        let response = err.error_response();
        assert_eq!(response.status(), 403);
    }

    #[test]
    fn engine_errors_pass_reason_through() {
        let err: GuardianError =
            EngineError::Rpc("not enough signers".to_string()).into();
        assert!(err.to_string().contains("not enough signers"));
        assert_eq!(err.code(), "ENGINE_FAILURE");
    }
}
