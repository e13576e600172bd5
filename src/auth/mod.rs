use axum::http::HeaderMap;


/// Header carrying the access key handed out after authorization.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Extract the caller's access key from HTTP headers
///
/// Looks at `X-Access-Token: <key>` first and falls back to
/// `Authorization: Bearer <key>`.
pub fn extract_access_token(headers: &HeaderMap) -> Result<String, TokenError> {
    if let Some(value) = headers.get(ACCESS_TOKEN_HEADER) {
        let token = value
            .to_str()
            .map_err(|_| TokenError::InvalidFormat)?
            .trim();

        if token.is_empty() {
            return Err(TokenError::Empty);
        }

        return Ok(token.to_string());
    }

    extract_bearer_token(headers)
}

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    // Expect "Bearer <token>"
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if parts[0].to_lowercase() != "bearer" {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();

    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Neither access-token header is present
    Missing,
    /// Not valid header text, or not "Bearer <token>"
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Access token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid access token format"),
            TokenError::Empty => write!(f, "Access token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}
