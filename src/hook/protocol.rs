//! Wire format for the hook protocol.
//!
//! Request: `<hook-name>\0<json-state>\0` in one datagram. Response:
//! literal `success\0` in one datagram, or the connection is closed with
//! no reply. Ports the `bytes.Split`/`encoding/json` handling in
//! `pkg/clienthandler/clienthandler.go`.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

pub const SUCCESS_REPLY: &[u8] = b"success\0";

pub const HOOK_CREATE_CONTAINER: &str = "createContainer";
pub const HOOK_POSTSTOP: &str = "poststop";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request has fewer than 2 NUL-separated parts")]
    Malformed,
    #[error("invalid state JSON: {0}")]
    InvalidState(#[from] serde_json::Error),
    #[error("state.id is empty")]
    EmptyId,
}

/// The subset of an OCI runtime `State` object the handler needs.
#[derive(Debug, Deserialize)]
pub struct ContainerState {
    pub id: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

pub struct HookRequest {
    pub hook_name: String,
    pub state: ContainerState,
}

/// Parse one raw datagram into a hook name and container state. Requires
/// at least two NUL-separated parts and a non-empty `id`.
pub fn parse(datagram: &[u8]) -> Result<HookRequest, ProtocolError> {
    let mut parts = datagram.split(|&b| b == 0);
    let hook_name = parts.next().ok_or(ProtocolError::Malformed)?;
    let state_json = parts.next().ok_or(ProtocolError::Malformed)?;

    let hook_name = String::from_utf8_lossy(hook_name).into_owned();
    let state: ContainerState = serde_json::from_slice(state_json)?;
    if state.id.is_empty() {
        return Err(ProtocolError::EmptyId);
    }

    Ok(HookRequest { hook_name, state })
}

/// Is `hook_name` one this daemon handles? Anything else (e.g.
/// `prestart`) gets an unconditional success reply with no side effect.
pub fn is_known_hook(hook_name: &str) -> bool {
    matches!(hook_name, HOOK_CREATE_CONTAINER | HOOK_POSTSTOP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_request() {
        let raw = b"createContainer\0{\"id\":\"abc\",\"annotations\":{}}\0";
        let req = parse(raw).unwrap();
        assert_eq!(req.hook_name, "createContainer");
        assert_eq!(req.state.id, "abc");
    }

    #[test]
    fn rejects_request_without_nul_separator() {
        let raw = b"createContainer only one part";
        assert!(matches!(parse(raw), Err(ProtocolError::Malformed) | Err(ProtocolError::InvalidState(_))));
    }

    #[test]
    fn rejects_empty_id() {
        let raw = b"createContainer\0{\"id\":\"\",\"annotations\":{}}\0";
        assert!(matches!(parse(raw), Err(ProtocolError::EmptyId)));
    }

    #[test]
    fn unknown_hook_name_is_not_known() {
        assert!(!is_known_hook("prestart"));
        assert!(is_known_hook(HOOK_CREATE_CONTAINER));
        assert!(is_known_hook(HOOK_POSTSTOP));
    }
}
