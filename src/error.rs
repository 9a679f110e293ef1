use serde_json::json;
use thiserror::Error;

/// Internal error type.
///
/// These never cross the operation boundary: `lifecycle` converts every
/// internal failure into an [`OpError`] category before returning.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid ticket key '{0}'")]
    InvalidKey(String),

    #[error("invalid status '{0}'")]
    InvalidStatus(String),

    #[error("sheet schema error: {0}")]
    SheetSchema(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] turso::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// User-visible operation failure taxonomy.
///
/// The route layer maps these onto HTTP responses via [`OpError::http_status`]
/// and [`OpError::to_json`]. The underlying cause of a `Backend` failure is
/// logged where it happens and never reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// Ticket key absent or already closed.
    NotFound(String),
    /// Ownership conflict; carries the current owner for the response payload.
    Conflict {
        message: String,
        current_owner: String,
    },
    /// Malformed request data (blank note, bad key, unmapped fields).
    Validation(String),
    /// The synchronous database step failed. Generic message only.
    Backend(String),
}

impl OpError {
    pub fn backend() -> Self {
        OpError::Backend("internal server error".to_string())
    }

    pub fn http_status(&self) -> u16 {
        match self {
            OpError::NotFound(_) => 404,
            OpError::Conflict { .. } => 409,
            OpError::Validation(_) => 400,
            OpError::Backend(_) => 500,
        }
    }

    /// Structured JSON error payload for the route layer.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            OpError::Conflict {
                message,
                current_owner,
            } => json!({
                "success": false,
                "message": message,
                "conflict": true,
                "responsavel_atual": current_owner,
            }),
            OpError::NotFound(m) | OpError::Validation(m) | OpError::Backend(m) => json!({
                "success": false,
                "message": m,
            }),
        }
    }
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpError::NotFound(m)
            | OpError::Validation(m)
            | OpError::Backend(m)
            | OpError::Conflict { message: m, .. } => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for OpError {}

pub type OpResult<T> = std::result::Result<T, OpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(OpError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            OpError::Conflict {
                message: "x".into(),
                current_owner: "alice".into()
            }
            .http_status(),
            409
        );
        assert_eq!(OpError::Validation("x".into()).http_status(), 400);
        assert_eq!(OpError::backend().http_status(), 500);
    }

    #[test]
    fn test_conflict_payload_carries_owner() {
        let err = OpError::Conflict {
            message: "ticket already claimed by alice".into(),
            current_owner: "alice".into(),
        };
        let payload = err.to_json();
        assert_eq!(payload["conflict"], true);
        assert_eq!(payload["responsavel_atual"], "alice");
        assert_eq!(payload["success"], false);
    }
}
