//! Identifier validation and parsing.

use crate::error::ProtoError;

/// Maximum length for planet and server identifiers.
pub const MAX_ID_LEN: usize = 100;

/// Validates a planet identifier: 1 to 100 characters from
/// `[A-Za-z0-9_-]`.
pub fn validate_planet_id(id: &str) -> Result<(), ProtoError> {
    if id.is_empty() {
        return Err(ProtoError::InvalidIdentifier(
            "planet_id must not be empty".to_owned(),
        ));
    }

    if id.len() > MAX_ID_LEN {
        return Err(ProtoError::InvalidIdentifier(format!(
            "planet_id must be {MAX_ID_LEN} characters or less"
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ProtoError::InvalidIdentifier(
            "planet_id must contain only letters, numbers, underscores, and hyphens".to_owned(),
        ));
    }

    Ok(())
}

/// Extracts the dotted IP address from a canonical server identifier.
///
/// Server ids conventionally follow `unity_<ip-with-dots-as-underscores>`,
/// e.g. `unity_192_168_1_100` → `192.168.1.100`. Any other token is accepted
/// as an identifier but yields `"unknown"`.
#[must_use]
pub fn server_ip_from_id(server_id: &str) -> String {
    if let Some(rest) = server_id.strip_prefix("unity_") {
        let parts: Vec<&str> = rest.split('_').collect();
        if parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok()) {
            return parts.join(".");
        }
    }

    "unknown".to_owned()
}
