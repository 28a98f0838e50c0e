use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::models::error::WireError;
use crate::models::peer::{PeerId, PeerRecord};

/// 100 ns ticks in one minute.
pub const TICKS_PER_MINUTE: i64 = 600_000_000;

/// Encode a single record as `"<peer>:<tzid>:<offset ticks>"`.
pub fn encode_token(record: &PeerRecord) -> String {
    format!(
        "{}:{}:{}",
        record.peer_id,
        record.timezone_id,
        i64::from(record.utc_offset_minutes) * TICKS_PER_MINUTE
    )
}

/// Decode a token-pass blob. The offset is truncated to whole minutes.
pub fn decode_token(blob: &str) -> Result<PeerRecord, WireError> {
    let (peer, rest) = blob
        .split_once(':')
        .ok_or_else(|| WireError::Malformed(blob.to_string()))?;
    let (timezone_id, ticks) = rest
        .rsplit_once(':')
        .ok_or_else(|| WireError::Malformed(blob.to_string()))?;

    let peer_id = peer
        .trim()
        .parse::<u32>()
        .map_err(|_| WireError::InvalidPeerId(peer.to_string()))?;
    let ticks = ticks
        .trim()
        .parse::<i64>()
        .map_err(|_| WireError::InvalidOffset(ticks.to_string()))?;
    if timezone_id.is_empty() {
        return Err(WireError::Malformed(blob.to_string()));
    }

    let utc_offset_minutes = i32::try_from(ticks / TICKS_PER_MINUTE)
        .map_err(|_| WireError::InvalidOffset(ticks.to_string()))?;

    Ok(PeerRecord {
        peer_id: PeerId(peer_id),
        timezone_id: timezone_id.to_string(),
        utc_offset_minutes,
    })
}

/// A peer's entry in the aggregated mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tzid: Option<String>,
    #[serde(default)]
    pub offset: f64,
}

impl SyncEntry {
    pub fn new(tzid: impl Into<String>, offset_minutes: f64) -> Self {
        Self {
            tzid: Some(tzid.into()),
            offset: offset_minutes,
        }
    }
}

/// Display identity to entry. Ordered, so every peer iterates it the same way.
pub type SyncMap = BTreeMap<String, SyncEntry>;

pub fn encode_map(map: &SyncMap) -> Result<String, WireError> {
    serde_json::to_string(map).map_err(WireError::Json)
}

/// Decode an aggregated mapping.
///
/// Only a blob that is not a JSON object is an error. Individual entries that
/// don't look like `{tzid, offset}` are dropped.
pub fn decode_map(blob: &str) -> Result<SyncMap, WireError> {
    let value: Value = serde_json::from_str(blob).map_err(WireError::Json)?;
    let Value::Object(object) = value else {
        return Err(WireError::NotAnObject);
    };

    let mut map = SyncMap::new();
    for (key, entry) in object {
        match serde_json::from_value::<SyncEntry>(entry) {
            Ok(entry) => {
                map.insert(key, entry);
            }
            Err(e) => debug!("Dropping malformed entry for '{}': {}", key, e),
        }
    }
    Ok(map)
}
