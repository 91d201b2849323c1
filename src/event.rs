//! The normalized event shared by the parser and the tracker.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

/// Inventory slot values captured from a `BagMgr@` line.
///
/// `num` is always the absolute count now held in the slot, never a delta.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct BagPayload {
    pub page_id: u32,
    pub slot_id: u32,
    pub config_base_id: u32,
    pub num: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum EventKind {
    /// Entered a map other than the safe hub.
    MapStart,
    /// Returned to the safe hub.
    MapEnd,
    /// Inventory baseline; never counts as a drop.
    BagInit(BagPayload),
    /// New absolute count for a slot.
    BagMod(BagPayload),
}

impl EventKind {
    /// Returns the bag payload, if this is an inventory event.
    pub fn bag(&self) -> Option<&BagPayload> {
        match self {
            EventKind::BagInit(bag) | EventKind::BagMod(bag) => Some(bag),
            EventKind::MapStart | EventKind::MapEnd => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MapStart => "MapStart",
            EventKind::MapEnd => "MapEnd",
            EventKind::BagInit(_) => "BagInit",
            EventKind::BagMod(_) => "BagMod",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A recognized log line.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Event {
    /// Logical time taken from the line prefix, or the wall clock when the
    /// prefix is missing.
    pub time: NaiveDateTime,
    pub kind: EventKind,
    /// The raw line the event was parsed from.
    pub line: String,
}

impl Event {
    pub fn new(time: NaiveDateTime, kind: EventKind) -> Self {
        Event {
            time,
            kind,
            line: String::new(),
        }
    }
}
