use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Business-rule failures surfaced to the client with a distinguishing
/// status and message. Validation failures are caught before any state
/// is touched; transport-level failures never originate here.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EngineError {
    #[error("invalid {entity} transition: cannot {action} from {from}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },
    #[error("insufficient escrow funds: requested {requested_cents}, pending {pending_cents}")]
    InsufficientFunds {
        requested_cents: i64,
        pending_cents: i64,
    },
    #[error("check-in location is {distance_m:.0}m from the job site (allowed {allowed_radius_m:.0}m)")]
    OutOfRange {
        distance_m: f64,
        allowed_radius_m: f64,
    },
    #[error("location unavailable")]
    LocationUnavailable,
    #[error("an open check-in already exists for this project")]
    AlreadyCheckedIn,
    #[error("no matching open check-in")]
    NoOpenCheckIn,
    #[error("a pending application for this target already exists")]
    DuplicateApplication,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
}

impl EngineError {
    /// Stable machine-readable code for client-side branching.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidStateTransition { .. } => "invalid_state_transition",
            EngineError::InsufficientFunds { .. } => "insufficient_funds",
            EngineError::OutOfRange { .. } => "out_of_range",
            EngineError::LocationUnavailable => "location_unavailable",
            EngineError::AlreadyCheckedIn => "already_checked_in",
            EngineError::NoOpenCheckIn => "no_open_check_in",
            EngineError::DuplicateApplication => "duplicate_application",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Validation(_) => "validation",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            EngineError::InvalidStateTransition { .. }
            | EngineError::InsufficientFunds { .. }
            | EngineError::AlreadyCheckedIn
            | EngineError::NoOpenCheckIn
            | EngineError::DuplicateApplication => StatusCode::CONFLICT,
            EngineError::OutOfRange { .. } | EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::LocationUnavailable => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "success": false,
            "error": self.code(),
            "message": self.to_string(),
        });
        // Out-of-range carries the numbers so the client can display
        // "you are Xm away, allowed Ym".
        if let EngineError::OutOfRange {
            distance_m,
            allowed_radius_m,
        } = &self
        {
            body["distance_m"] = json!(distance_m);
            body["allowed_radius_m"] = json!(allowed_radius_m);
        }
        (self.status(), Json(body)).into_response()
    }
}
