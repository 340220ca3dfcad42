use serde_json::Value;

/// How a single HTTP exchange failed, before it is folded into an [`ApiError`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("Cannot connect to the Portfolio Intelligence service at {0}")]
    Connect(String),
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("Invalid response from server: {0}")]
    Decode(String),
    #[error("HTTP error: {0}")]
    Http(String),
}

impl RequestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RequestError::Server { status: 404, .. })
    }
}

/// The single error shape callers of the remote client see.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// `not_found` is set when the service answered 404, i.e. the session behind the query is gone.
    #[error("Query failed: {message}")]
    QueryFailed { message: String, not_found: bool },
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("Portfolio unavailable: {message}")]
    PortfolioUnavailable { message: String },
    #[error("Request failed: {message}")]
    RequestFailed { message: String },
}

impl ApiError {
    pub fn query(err: RequestError) -> Self {
        ApiError::QueryFailed {
            not_found: err.is_not_found(),
            message: err.to_string(),
        }
    }

    /// The session the request referred to no longer exists on the server.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ApiError::SessionNotFound { .. } | ApiError::QueryFailed { not_found: true, .. }
        )
    }

    pub fn portfolio(err: RequestError) -> Self {
        ApiError::PortfolioUnavailable {
            message: err.to_string(),
        }
    }

    /// Session endpoints answer 404 for unknown ids; everything else is a plain failure.
    pub fn session(session_id: &str, err: RequestError) -> Self {
        if err.is_not_found() {
            ApiError::SessionNotFound {
                session_id: session_id.to_string(),
            }
        } else {
            ApiError::RequestFailed {
                message: err.to_string(),
            }
        }
    }
}

/// Turn a non-success response body into a message.
pub fn normalize_error_body(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {}", status);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(payload) => normalize_server_error(&payload),
        Err(_) => trimmed.to_string(),
    }
}

/// Extract a readable message from a server error payload.
///
/// Known shapes are tried in order; anything unrecognised is returned as the
/// serialized payload so nothing is swallowed.
pub fn normalize_server_error(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = non_empty_str(detail) {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let messages: Vec<String> = items.iter().filter_map(validation_item).collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
        if let Some(text) = detail.get("message").and_then(non_empty_str) {
            return text.to_string();
        }
    }

    if let Some(error) = payload.get("error") {
        if let Some(text) = error.get("message").and_then(non_empty_str) {
            return text.to_string();
        }
        if let Some(text) = non_empty_str(error) {
            return text.to_string();
        }
    }

    if let Some(text) = payload.get("message").and_then(non_empty_str) {
        return text.to_string();
    }

    if let Some(text) = non_empty_str(payload) {
        return text.to_string();
    }

    payload.to_string()
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// `{"loc": ["body", "query"], "msg": "field required"}` -> `query: field required`
fn validation_item(item: &Value) -> Option<String> {
    let msg = item.get("msg").and_then(non_empty_str)?;
    let field = item
        .get("loc")
        .and_then(Value::as_array)
        .and_then(|loc| loc.last())
        .map(|last| match last {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    Some(match field {
        Some(field) => format!("{}: {}", field, msg),
        None => msg.to_string(),
    })
}
