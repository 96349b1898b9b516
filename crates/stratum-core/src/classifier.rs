//! Response classification
//!
//! Maps a raw status code and body onto a fixed set of outcomes. Nothing
//! above this module looks at status codes directly.
//!
//! | Status            | Outcome                                         |
//! |-------------------|-------------------------------------------------|
//! | < 300             | `Success`                                       |
//! | 400, 422          | `InvalidRequest`                                |
//! | 401, 403          | `AuthenticationFailure`                         |
//! | 404               | `NotFoundNonFatal` / `NotFoundFatal` (mandatory)|
//! | 409               | `Conflict`                                      |
//! | 503               | `ServiceUnavailable` (drives node failover)     |
//! | any other >= 300  | `UnknownFailure`                                |

use bytes::Bytes;

use crate::error::CallError;

/// Classified result of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { status: u16, body: Bytes },
    NotFoundNonFatal,
    InvalidRequest { status: u16, body: String },
    AuthenticationFailure { status: u16, body: String },
    Conflict { body: String },
    NotFoundFatal { body: String },
    ServiceUnavailable { body: String },
    UnknownFailure { status: u16, body: String },
}

/// Classify a response. `mandatory` only affects 404 handling.
pub fn classify(status: u16, body: &Bytes, mandatory: bool) -> Outcome {
    if status < 300 {
        return Outcome::Success {
            status,
            body: body.clone(),
        };
    }

    let text = || String::from_utf8_lossy(body).into_owned();
    match status {
        400 | 422 => Outcome::InvalidRequest {
            status,
            body: text(),
        },
        401 | 403 => Outcome::AuthenticationFailure {
            status,
            body: text(),
        },
        404 if mandatory => Outcome::NotFoundFatal { body: text() },
        404 => Outcome::NotFoundNonFatal,
        409 => Outcome::Conflict { body: text() },
        503 => Outcome::ServiceUnavailable { body: text() },
        _ => Outcome::UnknownFailure {
            status,
            body: text(),
        },
    }
}

impl Outcome {
    /// The only outcome that reports the node itself as unusable.
    pub fn is_node_unavailable(&self) -> bool {
        matches!(self, Outcome::ServiceUnavailable { .. })
    }

    /// Split the outcome into what the caller gets back: the status and body
    /// of a success, `None` for a soft not-found, or the error of a failure.
    pub fn into_result(self, node: &str) -> Result<Option<(u16, Bytes)>, CallError> {
        let err = match self {
            Outcome::Success { status, body } => return Ok(Some((status, body))),
            Outcome::NotFoundNonFatal => return Ok(None),
            Outcome::InvalidRequest { status, body } => CallError::InvalidRequest { status, body },
            Outcome::AuthenticationFailure { status, body } => {
                CallError::AuthenticationFailure { status, body }
            }
            Outcome::Conflict { body } => CallError::Conflict { body },
            Outcome::NotFoundFatal { body } => CallError::NotFound { body },
            Outcome::ServiceUnavailable { body } => CallError::ServiceUnavailable {
                node: node.to_string(),
                body,
            },
            Outcome::UnknownFailure { status, body } => CallError::UnknownFailure { status, body },
        };
        Err(err)
    }
}
