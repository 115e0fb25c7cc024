#![deny(warnings)]

//! Save/restore boundary.
//!
//! The wire format is a versioned JSON envelope around the engine's
//! allow-listed [`SaveState`]. Legacy encodings are normalized here, at
//! the boundary: the core only ever sees canonical identities.

use serde::Serialize;
use serde_json::Value;
use sim_core::Operative;
use sim_runtime::{Engine, EngineConfig, RestoreError, SaveState};
use thiserror::Error;
use tracing::info;

/// Current wire format version.
pub const FORMAT_VERSION: u32 = 2;

/// Errors crossing the persistence boundary.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The save text is not valid JSON or does not match the schema.
    #[error("malformed save: {0}")]
    Json(#[from] serde_json::Error),
    /// A required envelope field is absent.
    #[error("save is missing field '{0}'")]
    MissingField(&'static str),
    /// The envelope version is newer than this build understands.
    #[error("unsupported save version: {0}")]
    UnsupportedVersion(u64),
    /// A legacy numeric action kind outside the known mapping.
    #[error("unknown legacy action kind: {0}")]
    UnknownLegacyKind(Value),
    /// The decoded state does not overlay onto the current catalogs.
    #[error(transparent)]
    Restore(#[from] RestoreError),
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    state: &'a SaveState,
}

/// Encode a snapshot as versioned JSON.
pub fn encode(state: &SaveState) -> Result<String, PersistError> {
    Ok(serde_json::to_string_pretty(&Envelope {
        version: FORMAT_VERSION,
        state,
    })?)
}

/// Decode a save of any supported version into the canonical state.
pub fn decode(text: &str) -> Result<SaveState, PersistError> {
    let envelope: Value = serde_json::from_str(text)?;
    let version = envelope
        .get("version")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    let mut state = envelope
        .get("state")
        .cloned()
        .ok_or(PersistError::MissingField("state"))?;
    match version {
        1 => {
            normalize_legacy_ids(&mut state)?;
            info!("migrated version-1 save");
        }
        v if v == u64::from(FORMAT_VERSION) => {}
        v => return Err(PersistError::UnsupportedVersion(v)),
    }
    Ok(serde_json::from_value(state)?)
}

/// Snapshot a live engine to save text.
pub fn save_engine(engine: &Engine) -> Result<String, PersistError> {
    encode(&engine.to_save())
}

/// Rebuild an engine from save text.
pub fn restore_engine(
    config: EngineConfig,
    operative: Operative,
    text: &str,
) -> Result<Engine, PersistError> {
    let state = decode(text)?;
    Ok(Engine::restore(config, operative, state)?)
}

/// Rewrite every legacy `{type, name}` action identity in place to the
/// canonical `{kind, name}` form.
fn normalize_legacy_ids(state: &mut Value) -> Result<(), PersistError> {
    if let Some(action) = state.get_mut("action") {
        normalize_action_id(action)?;
    }
    if let Some(automation) = state.get_mut("automation") {
        for key in ["low_action", "high_action"] {
            if let Some(target) = automation.get_mut(key) {
                normalize_action_id(target)?;
            }
        }
    }
    if let Some(actions) = state.get_mut("actions").and_then(Value::as_array_mut) {
        for entry in actions {
            if let Some(id) = entry.get_mut("id") {
                normalize_action_id(id)?;
            }
        }
    }
    Ok(())
}

fn normalize_action_id(value: &mut Value) -> Result<(), PersistError> {
    let Some(object) = value.as_object_mut() else {
        return Ok(());
    };
    let Some(numeric) = object.remove("type") else {
        return Ok(());
    };
    let kind = match numeric.as_u64() {
        Some(1) => "Contract",
        Some(2) => "Operation",
        Some(3) => "BlackOp",
        Some(4) => "General",
        _ => return Err(PersistError::UnknownLegacyKind(numeric)),
    };
    object.insert("kind".to_string(), Value::String(kind.to_string()));
    Ok(())
}
