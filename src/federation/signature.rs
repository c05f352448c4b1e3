//! HTTP Signature header checks
//!
//! Only the header shape and the key ownership are checked here. Verifying
//! the signature bytes needs the sender's public key and is left to the host.

use http::HeaderMap;

use crate::error::AppError;

/// Parsed Signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Pseudo-header binding the signature to method and path
pub const REQUEST_TARGET: &str = "(request-target)";

impl ParsedSignature {
    /// Whether `name` is among the signed headers
    pub fn covers(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h.eq_ignore_ascii_case(name))
    }
}

/// Parse a Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut headers = Vec::new();
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');

        match key.trim() {
            "keyId" => key_id = Some(value.to_string()),
            "headers" => {
                headers = value
                    .split_whitespace()
                    .map(|s| s.to_ascii_lowercase())
                    .collect()
            }
            "signature" => signature = Some(value.to_string()),
            _ => {}
        }
    }

    let key_id = key_id
        .filter(|k| !k.is_empty())
        .ok_or(AppError::Unauthorized)?;
    let signature = signature
        .filter(|s| !s.is_empty())
        .ok_or(AppError::Unauthorized)?;

    Ok(ParsedSignature {
        key_id,
        headers,
        signature,
    })
}

/// Extract keyId from the Signature header
///
/// # Errors
/// `Unauthorized` when the header is missing, unparseable, or does not
/// cover `(request-target)`
pub fn extract_signature_key_id(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get("signature")
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    let parsed = parse_signature_header(value)?;
    if !parsed.covers(REQUEST_TARGET) {
        tracing::debug!(key_id = %parsed.key_id, "Signature does not cover (request-target)");
        return Err(AppError::Unauthorized);
    }

    Ok(parsed.key_id)
}

/// Whether the keyId belongs to the activity's actor
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    !actor.is_empty() && key_actor == actor
}
