use reqwest::StatusCode;

use crate::DestinationError;

/// Maps an HTTP response status to the error kind spec section 7 assigns
/// it: 429/5xx are transient (bus redelivers), 404 is `not_found`, other
/// 4xx are permanent.
pub fn classify_status(status: StatusCode, body: impl Into<String>) -> DestinationError {
    let body = body.into();
    if status == StatusCode::NOT_FOUND {
        DestinationError::NotFound(body)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DestinationError::Transient(format!("{status}: {body}"))
    } else {
        DestinationError::Permanent(format!("{status}: {body}"))
    }
}

pub fn require_config<'a>(
    config: &'a std::collections::HashMap<String, String>,
    key: &str,
) -> Result<&'a str, DestinationError> {
    config
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| DestinationError::ConfigMissing(key.to_string()))
}
