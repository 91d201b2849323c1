//! Per-map drop accounting.
//!
//! The tracker is a small state machine (`Idle` / in map) driven by parsed
//! events in arrival order. Inventory counts in the log are absolute, so a drop
//! is the positive difference between a slot's new count and the last count
//! seen for that slot.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, trace};

use crate::event::{BagPayload, Event, EventKind};

/// How many recent events are kept for diagnostics.
pub const RECENT_EVENTS: usize = 100;

/// Identifies one inventory slot holding one item type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct SlotKey {
    pub page_id: u32,
    pub slot_id: u32,
    pub config_base_id: u32,
}

impl From<&BagPayload> for SlotKey {
    fn from(bag: &BagPayload) -> Self {
        SlotKey {
            page_id: bag.page_id,
            slot_id: bag.slot_id,
            config_base_id: bag.config_base_id,
        }
    }
}

/// One play instance of a map.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MapSession {
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub active: bool,
    /// Items gained during this map, by config base id.
    pub tally: HashMap<u32, u64>,
}

impl MapSession {
    fn open(at: NaiveDateTime) -> Self {
        MapSession {
            started_at: Some(at),
            ended_at: None,
            active: true,
            tally: HashMap::new(),
        }
    }

    /// Sum of every item counted in this map.
    pub fn total(&self) -> u64 {
        self.tally.values().sum()
    }
}

/// Snapshot of everything the tracker knows.
///
/// Returned by value from [`Tracker::state`]; it shares nothing with the
/// tracker.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct State {
    pub in_map: bool,
    /// The active map, or the last finished one until the next map starts.
    pub current: MapSession,
    pub completed: Vec<MapSession>,
    pub session_started_at: Option<NaiveDateTime>,
    pub session_ended_at: Option<NaiveDateTime>,
    pub total_drops: u64,
    /// Oldest first.
    pub last_events: Vec<Event>,
    #[serde(skip)]
    pub inventory: HashMap<SlotKey, u32>,
}

impl State {
    /// Whether a map is currently being counted.
    pub fn is_counting(&self) -> bool {
        self.in_map && self.current.active
    }
}

/// Fixed-capacity FIFO of the most recent events.
#[derive(Debug, Default)]
struct RecentEvents {
    buf: Vec<Event>,
    // Index of the oldest entry once `buf` is full.
    head: usize,
}

impl RecentEvents {
    fn push(&mut self, event: Event) {
        if self.buf.len() < RECENT_EVENTS {
            self.buf.push(event);
        } else {
            self.buf[self.head] = event;
            self.head = (self.head + 1) % RECENT_EVENTS;
        }
    }

    fn to_vec(&self) -> Vec<Event> {
        let (newer, older) = self.buf.split_at(self.head);
        older.iter().chain(newer).cloned().collect()
    }
}

#[derive(Debug, Default)]
struct Aggregate {
    in_map: bool,
    current: MapSession,
    completed: Vec<MapSession>,
    session_started_at: Option<NaiveDateTime>,
    session_ended_at: Option<NaiveDateTime>,
    total_drops: u64,
    recent: RecentEvents,
    inventory: HashMap<SlotKey, u32>,
}

impl Aggregate {
    fn apply(&mut self, event: &Event) {
        self.recent.push(event.clone());

        match &event.kind {
            EventKind::MapStart => {
                if self.in_map && self.current.active {
                    // No MapEnd was seen; the new map's start stands in for the old map's end.
                    debug!(at = %event.time, "map started while another was active");
                    self.finish_current(event.time);
                }
                if self.session_started_at.is_none() {
                    self.session_started_at = Some(event.time);
                }
                self.in_map = true;
                self.current = MapSession::open(event.time);
            }
            EventKind::MapEnd => {
                if self.in_map {
                    self.in_map = false;
                    self.finish_current(event.time);
                    self.session_ended_at = Some(event.time);
                }
            }
            EventKind::BagInit(bag) => {
                self.inventory.insert(SlotKey::from(bag), bag.num);
            }
            EventKind::BagMod(bag) => {
                let previous = self
                    .inventory
                    .insert(SlotKey::from(bag), bag.num)
                    .unwrap_or(0);
                let delta = i64::from(bag.num) - i64::from(previous);

                if delta > 0 && self.in_map && self.current.active {
                    let gained = delta.unsigned_abs();
                    *self.current.tally.entry(bag.config_base_id).or_insert(0) += gained;
                    self.total_drops += gained;
                    trace!(item = bag.config_base_id, gained, "counted drop");
                }
            }
        }
    }

    // Closes `current` and records it, leaving it in place so its final
    // numbers stay visible until the next map.
    fn finish_current(&mut self, at: NaiveDateTime) {
        self.current.active = false;
        self.current.ended_at = Some(at);
        self.completed.push(self.current.clone());
    }

    fn snapshot(&self) -> State {
        State {
            in_map: self.in_map,
            current: self.current.clone(),
            completed: self.completed.clone(),
            session_started_at: self.session_started_at,
            session_ended_at: self.session_ended_at,
            total_drops: self.total_drops,
            last_events: self.recent.to_vec(),
            inventory: self.inventory.clone(),
        }
    }
}

/// Thread-safe owner of the session aggregate.
///
/// Events are expected from a single consumer so that deltas are computed in
/// log order, but every operation takes the same lock and may be called from
/// anywhere.
#[derive(Debug, Default)]
pub struct Tracker {
    inner: Mutex<Aggregate>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event.
    pub fn on_event(&self, event: &Event) {
        self.lock().apply(event);
    }

    /// Returns an independent copy of the current state.
    pub fn state(&self) -> State {
        self.lock().snapshot()
    }

    /// Discards everything, including inventory baselines and session
    /// timestamps. Upstream tailing is unaffected.
    pub fn reset(&self) {
        *self.lock() = Aggregate::default();
        debug!("tracker reset");
    }

    fn lock(&self) -> MutexGuard<'_, Aggregate> {
        // Every mutation completes before the guard drops, so a poisoned
        // aggregate is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
