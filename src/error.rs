//! Failure taxonomy shared by the cache store and the mutation coordinator.
//!
//! Every failure coming out of the resource client is reduced to a
//! [`ClassifiedError`] exactly once. Consumers only ever look at the kind and
//! the `retryable` flag, never at transport details.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::api::auth::AuthProvider;

/// The small set of failure categories the rest of the client reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
  #[error("network unreachable")]
  NetworkUnreachable,
  #[error("unauthorized")]
  Unauthorized,
  #[error("forbidden")]
  Forbidden,
  #[error("not found")]
  NotFound,
  #[error("validation failed")]
  Validation,
  #[error("server error")]
  ServerError,
  #[error("unknown error")]
  Unknown,
}

impl ErrorKind {
  /// Message shown to the user when the backend gave us nothing better.
  pub fn default_message(&self) -> &'static str {
    match self {
      ErrorKind::NetworkUnreachable => "Unable to reach the server. Check your connection.",
      ErrorKind::Unauthorized => "Your session has expired. Please sign in again.",
      ErrorKind::Forbidden => "You do not have permission to do that.",
      ErrorKind::NotFound => "The requested item could not be found.",
      ErrorKind::Validation => "Some of the submitted information is invalid.",
      ErrorKind::ServerError => "The server ran into a problem. Please try again later.",
      ErrorKind::Unknown => "Something went wrong.",
    }
  }
}

/// A failure after classification. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
  pub kind: ErrorKind,
  /// HTTP status of the response, 0 when no response was received.
  pub http_status: u16,
  pub message: String,
  pub retryable: bool,
  /// Whether the request may have reached the server before failing.
  pub request_sent: bool,
}

impl ClassifiedError {
  pub fn new(kind: ErrorKind, http_status: u16, message: impl Into<String>) -> Self {
    Self {
      kind,
      http_status,
      message: message.into(),
      retryable: matches!(kind, ErrorKind::NetworkUnreachable | ErrorKind::ServerError),
      request_sent: http_status != 0,
    }
  }

  /// No connection was made; the server never saw the request.
  pub fn unreachable(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::NetworkUnreachable, 0, message)
  }

  /// The connection dropped or timed out after the request went out.
  pub fn interrupted(message: impl Into<String>) -> Self {
    Self {
      request_sent: true,
      ..Self::unreachable(message)
    }
  }

  pub fn unknown(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Unknown, 0, message)
  }

  pub fn is_unauthorized(&self) -> bool {
    self.kind == ErrorKind::Unauthorized
  }
}

/// A failure as observed at the transport boundary, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
  /// The request never left the client (connect refused, DNS, bad request).
  Unreachable(String),
  /// The request was sent but no response arrived (timeout, reset).
  Interrupted(String),
  /// The server answered with a non-success status.
  Http { status: u16, body: String },
  /// A response arrived but its body could not be understood.
  Decode(String),
}

impl From<&reqwest::Error> for RawFailure {
  fn from(err: &reqwest::Error) -> Self {
    if let Some(status) = err.status() {
      return RawFailure::Http {
        status: status.as_u16(),
        body: String::new(),
      };
    }
    if err.is_decode() || err.is_body() {
      return RawFailure::Decode(err.to_string());
    }
    if err.is_connect() || err.is_builder() {
      return RawFailure::Unreachable(err.to_string());
    }
    RawFailure::Interrupted(err.to_string())
  }
}

/// Map a raw failure onto the taxonomy. Pure and deterministic.
pub fn classify(raw: &RawFailure) -> ClassifiedError {
  match raw {
    RawFailure::Unreachable(detail) => ClassifiedError::unreachable(unreachable_message(detail)),
    RawFailure::Interrupted(detail) => ClassifiedError::interrupted(unreachable_message(detail)),
    RawFailure::Decode(detail) => ClassifiedError::unknown(format!("Unexpected response: {}", detail)),
    RawFailure::Http { status, body } => {
      let kind = match status {
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        422 => ErrorKind::Validation,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
      };
      let message = match kind {
        ErrorKind::Validation => validation_message(body),
        _ => server_message(body),
      }
      .unwrap_or_else(|| kind.default_message().to_string());
      ClassifiedError::new(kind, *status, message)
    }
  }
}

fn unreachable_message(detail: &str) -> String {
  let message = ErrorKind::NetworkUnreachable.default_message();
  if detail.is_empty() {
    message.to_string()
  } else {
    format!("{} ({})", message, detail)
  }
}

/// Forward session-ending failures to the auth collaborator.
///
/// Called by every component that observes a classified failure, whether the
/// failure is surfaced to the user or absorbed silently.
pub fn escalate(err: &ClassifiedError, auth: &dyn AuthProvider) {
  if err.is_unauthorized() {
    tracing::warn!(status = err.http_status, "Request unauthorized, clearing session");
    auth.on_unauthorized();
  }
}

// ============================================================================
// Error payloads
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
  message: Option<String>,
  #[serde(default)]
  errors: Option<FieldErrors>,
  #[serde(default)]
  detail: Option<Vec<DetailItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldErrors {
  /// `{"errors": {"field": ["msg", ...]}}`
  ByField(BTreeMap<String, Vec<String>>),
  /// `{"errors": [{"field": "x", "message": "..."}]}`
  List(Vec<FieldError>),
}

#[derive(Debug, Deserialize)]
struct FieldError {
  field: Option<String>,
  message: String,
}

/// `{"detail": [{"loc": ["body", "field"], "msg": "..."}]}`
#[derive(Debug, Deserialize)]
struct DetailItem {
  #[serde(default)]
  loc: Vec<serde_json::Value>,
  msg: String,
}

fn server_message(body: &str) -> Option<String> {
  let parsed: ErrorBody = serde_json::from_str(body).ok()?;
  parsed.message.filter(|m| !m.trim().is_empty())
}

/// Flatten structured field errors into one readable line.
fn validation_message(body: &str) -> Option<String> {
  let parsed: ErrorBody = serde_json::from_str(body).ok()?;

  let mut parts: Vec<String> = Vec::new();
  match parsed.errors {
    Some(FieldErrors::ByField(map)) => {
      for (field, messages) in map {
        for message in messages {
          parts.push(format!("{}: {}", field, message));
        }
      }
    }
    Some(FieldErrors::List(list)) => {
      for item in list {
        match item.field {
          Some(field) => parts.push(format!("{}: {}", field, item.message)),
          None => parts.push(item.message),
        }
      }
    }
    None => {}
  }

  for item in parsed.detail.unwrap_or_default() {
    let field = item
      .loc
      .iter()
      .rev()
      .find_map(|v| v.as_str())
      .filter(|s| *s != "body");
    match field {
      Some(field) => parts.push(format!("{}: {}", field, item.msg)),
      None => parts.push(item.msg),
    }
  }

  if parts.is_empty() {
    parsed.message.filter(|m| !m.trim().is_empty())
  } else {
    Some(parts.join("; "))
  }
}
