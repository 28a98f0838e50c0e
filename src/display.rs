use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{TimezoneDefinition, TimezoneRegistry};
use crate::services::reconcile::{DisplayInstance, Slot};

const PEER_SEPARATOR: &str = "\n";

/// A text clock for one timezone, shared by every peer in that zone.
#[derive(Debug, Clone)]
pub struct ClockEntry {
    slot: Slot,
    definitions: watch::Receiver<Arc<TimezoneRegistry>>,
    network_offset: Duration,
    active: bool,
    ordinal: usize,
    timezone_id: String,
    definition: Option<TimezoneDefinition>,
    offset_minutes: f64,
    peers: Vec<String>,
}

impl ClockEntry {
    pub fn new(
        slot: Slot,
        definitions: watch::Receiver<Arc<TimezoneRegistry>>,
        network_offset: Duration,
    ) -> Self {
        Self {
            slot,
            definitions,
            network_offset,
            active: false,
            ordinal: 0,
            timezone_id: String::new(),
            definition: None,
            offset_minutes: 0.0,
            peers: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Definition name, or the raw id when the zone is unknown.
    pub fn display_name(&self) -> &str {
        self.definition
            .as_ref()
            .map(|definition| definition.display_name.as_str())
            .unwrap_or(&self.timezone_id)
    }

    /// `peers / name / HH:MM`. Unknown zones get no clock line since their
    /// offset can't be trusted.
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let peers = self.peers.join(PEER_SEPARATOR);
        match self.definition {
            Some(_) => {
                let local = now
                    + self.network_offset
                    + Duration::seconds((self.offset_minutes * 60.0) as i64);
                format!("{}\n{}\n{}", peers, self.display_name(), local.format("%H:%M"))
            }
            None => format!("{}\n{}", peers, self.timezone_id),
        }
    }

    /// Column and row on a clock wall. Columns alternate around the centre:
    /// 0, -1, 1, -2, 2 ...
    pub fn grid_position(&self, max_columns: usize) -> (i64, i64) {
        grid_position(self.ordinal, max_columns)
    }
}

pub fn grid_position(ordinal: usize, max_columns: usize) -> (i64, i64) {
    let max_columns = max_columns.max(1);
    let row = (ordinal / max_columns) as i64;
    let column = (ordinal % max_columns) as i64;
    let column = if column % 2 == 0 { column / 2 } else { -(column / 2) - 1 };
    (column, row)
}

impl DisplayInstance for ClockEntry {
    fn set_active(&mut self, active: bool) {
        self.active = active;
        debug!("Instance {} active={}", self.slot.0, active);
    }

    fn set_assignment(&mut self, timezone_id: &str, ordinal: usize, peers_shown: &[String]) {
        if self.timezone_id != timezone_id {
            self.timezone_id = timezone_id.to_string();
            self.definition = self.definitions.borrow().lookup(timezone_id).cloned();
        }
        self.ordinal = ordinal;
        self.peers = peers_shown.to_vec();
    }

    fn set_offset(&mut self, offset_minutes: f64) {
        self.offset_minutes = offset_minutes;
    }
}
