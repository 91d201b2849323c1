//! Item names and prices, and the per-session summary built from them.
//!
//! The item table is read-only reference data keyed by config base id (as a
//! string, the way `full_table.json` stores it). Ids missing from the table
//! are worth nothing and are left out of listings; they never cause errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tracker::{MapSession, State};
use crate::Error;

/// Default file name of the item table.
pub const ITEM_TABLE_FILE: &str = "full_table.json";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ItemInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub price: f64,
    pub last_update: f64,
    pub from: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemTable {
    items: HashMap<String, ItemInfo>,
}

impl ItemTable {
    pub fn new(items: HashMap<String, ItemInfo>) -> Self {
        ItemTable { items }
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(ItemTable::new(serde_json::from_str(json)?))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Loads the first candidate that exists and parses, or an empty table.
    pub fn load_first<I, P>(candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in candidates {
            let path = path.as_ref();
            match Self::load(path) {
                Ok(table) => {
                    info!(path = %path.display(), items = table.len(), "loaded item table");
                    return table;
                }
                Err(e) => debug!(path = %path.display(), "skipping item table: {}", e),
            }
        }
        ItemTable::default()
    }

    /// The usual places to look for [`ITEM_TABLE_FILE`]: the working
    /// directory, then next to the executable.
    pub fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(ITEM_TABLE_FILE)];
        if let Ok(dir) = std::env::current_dir() {
            paths.push(dir.join(ITEM_TABLE_FILE));
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            paths.push(dir.join(ITEM_TABLE_FILE));
        }
        paths.dedup();
        paths
    }

    pub fn get(&self, config_base_id: u32) -> Option<&ItemInfo> {
        self.items.get(&config_base_id.to_string())
    }

    /// Unit price, or 0 for unknown items.
    pub fn price(&self, config_base_id: u32) -> f64 {
        self.get(config_base_id).map_or(0.0, |item| item.price)
    }

    /// Total value of a tally.
    pub fn value_of(&self, tally: &HashMap<u32, u64>) -> f64 {
        tally
            .iter()
            .map(|(&id, &count)| count as f64 * self.price(id))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One known item counted in the current map.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TallyLine {
    pub config_base_id: u32,
    pub name: String,
    pub kind: String,
    pub price: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapLine {
    pub started_at: Option<NaiveDateTime>,
    /// `None` while the map is still running.
    pub ended_at: Option<NaiveDateTime>,
    pub duration_ms: i64,
    pub earnings: f64,
}

/// Presentation numbers derived from a tracker [`State`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub in_map: bool,
    pub session_started_at: Option<NaiveDateTime>,
    /// The last map end once idle, otherwise `now`.
    pub session_ended_at: Option<NaiveDateTime>,
    pub total_drops: u64,
    /// Known items of the current map, most valuable first.
    pub tally: Vec<TallyLine>,
    /// Completed maps, followed by the running one if any.
    pub maps: Vec<MapLine>,
    pub session_earnings: f64,
    pub earnings_per_hour: f64,
    pub avg_map_ms: i64,
}

impl Summary {
    pub fn new(state: &State, items: &ItemTable, now: NaiveDateTime) -> Self {
        let mut tally: Vec<TallyLine> = state
            .current
            .tally
            .iter()
            .filter_map(|(&id, &count)| {
                let item = items.get(id)?;
                Some(TallyLine {
                    config_base_id: id,
                    name: item.name.clone(),
                    kind: item.kind.clone(),
                    price: item.price,
                    count,
                })
            })
            .collect();
        tally.sort_by(|a, b| {
            let (va, vb) = (a.count as f64 * a.price, b.count as f64 * b.price);
            vb.total_cmp(&va).then(a.config_base_id.cmp(&b.config_base_id))
        });

        let mut maps: Vec<MapLine> = state
            .completed
            .iter()
            .map(|map| map_line(map, items, now))
            .collect();
        let completed_ms: i64 = maps.iter().map(|m| m.duration_ms).sum();
        let avg_map_ms = match i64::try_from(maps.len()) {
            Ok(n) if n > 0 => completed_ms / n,
            _ => 0,
        };

        // After a MapEnd the finished map stays in `current` and is already
        // part of `completed`.
        if state.is_counting() {
            maps.push(map_line(&state.current, items, now));
        }
        let session_earnings = maps.iter().map(|m| m.earnings).sum();

        let session_ended_at = state.session_started_at.map(|_| {
            match state.session_ended_at {
                Some(end) if !state.current.active => end,
                _ => now,
            }
        });
        let earnings_per_hour = match (state.session_started_at, session_ended_at) {
            (Some(start), Some(end)) if end > start => {
                let hours = (end - start).num_milliseconds() as f64 / 3_600_000.0;
                session_earnings / hours
            }
            _ => 0.0,
        };

        Summary {
            in_map: state.is_counting(),
            session_started_at: state.session_started_at,
            session_ended_at,
            total_drops: state.total_drops,
            tally,
            maps,
            session_earnings,
            earnings_per_hour,
            avg_map_ms,
        }
    }
}

fn map_line(map: &MapSession, items: &ItemTable, now: NaiveDateTime) -> MapLine {
    let end = map.ended_at.unwrap_or(now);
    let duration_ms = map
        .started_at
        .map_or(0, |start| (end - start).num_milliseconds().max(0));

    MapLine {
        started_at: map.started_at,
        ended_at: map.ended_at,
        duration_ms,
        earnings: items.value_of(&map.tally),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BagPayload, Event, EventKind};
    use crate::tracker::Tracker;
    use chrono::{Duration, NaiveDate};
    use tempfile::TempDir;

    const TABLE: &str = r#"{
        "5210": {"name": "Flame Elementium", "type": "currency", "price": 1.5, "last_update": 1730000000, "from": "market"},
        "100300": {"name": "Flame Sand", "type": "currency", "price": 0.01},
        "42": {"name": "Mystery"}
    }"#;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 4)
            .unwrap()
            .and_hms_opt(19, 0, 0)
            .unwrap()
            + Duration::seconds(secs)
    }

    fn bag_mod(secs: i64, cfg: u32, num: u32) -> Event {
        Event::new(
            at(secs),
            EventKind::BagMod(BagPayload {
                page_id: 102,
                slot_id: cfg,
                config_base_id: cfg,
                num,
            }),
        )
    }

    #[test]
    fn test_lookup() {
        let table = ItemTable::from_json(TABLE).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(5210).unwrap().name, "Flame Elementium");
        assert_eq!(table.get(5210).unwrap().kind, "currency");
        assert_eq!(table.price(42), 0.0);
        assert_eq!(table.price(999_999), 0.0);
        assert!(table.get(999_999).is_none());
    }

    #[test]
    fn test_load_first_skips_bad_candidates() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("broken.json");
        let good = dir.path().join(ITEM_TABLE_FILE);
        std::fs::write(&broken, "{ not json").unwrap();
        std::fs::write(&good, TABLE).unwrap();

        let table = ItemTable::load_first([dir.path().join("missing.json"), broken.clone(), good]);
        assert_eq!(table.len(), 3);

        assert!(matches!(ItemTable::load(&broken), Err(Error::Json(_))));
        assert!(ItemTable::load_first([broken]).is_empty());
    }

    #[test]
    fn test_summary_while_running() {
        let items = ItemTable::from_json(TABLE).unwrap();
        let tracker = Tracker::new();
        tracker.on_event(&Event::new(at(0), EventKind::MapStart));
        tracker.on_event(&bag_mod(10, 5210, 2));
        tracker.on_event(&bag_mod(11, 100300, 100));
        tracker.on_event(&bag_mod(12, 777, 5));

        let summary = Summary::new(&tracker.state(), &items, at(1800));
        assert!(summary.in_map);
        assert_eq!(summary.total_drops, 107);
        // Unknown id 777 is skipped.
        let ids: Vec<_> = summary.tally.iter().map(|t| t.config_base_id).collect();
        assert_eq!(ids, vec![5210, 100300]);
        assert_eq!(summary.maps.len(), 1);
        assert_eq!(summary.maps[0].ended_at, None);
        assert_eq!(summary.maps[0].duration_ms, 1_800_000);
        assert!((summary.session_earnings - 4.0).abs() < 1e-9);
        assert!((summary.earnings_per_hour - 8.0).abs() < 1e-9);
        assert_eq!(summary.session_ended_at, Some(at(1800)));
        assert_eq!(summary.avg_map_ms, 0);
    }

    #[test]
    fn test_summary_after_maps() {
        let items = ItemTable::from_json(TABLE).unwrap();
        let tracker = Tracker::new();
        tracker.on_event(&Event::new(at(0), EventKind::MapStart));
        tracker.on_event(&bag_mod(10, 5210, 4));
        tracker.on_event(&Event::new(at(600), EventKind::MapEnd));
        tracker.on_event(&Event::new(at(900), EventKind::MapStart));
        tracker.on_event(&bag_mod(1000, 5210, 6));
        tracker.on_event(&Event::new(at(1800), EventKind::MapEnd));

        let summary = Summary::new(&tracker.state(), &items, at(7200));
        assert!(!summary.in_map);
        assert_eq!(summary.maps.len(), 2);
        assert_eq!(summary.avg_map_ms, 750_000);
        // Both maps counted once, even though the last one is also `current`.
        assert!((summary.session_earnings - 9.0).abs() < 1e-9);
        assert_eq!(summary.session_ended_at, Some(at(1800)));
        assert!((summary.earnings_per_hour - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_empty() {
        let summary = Summary::new(&State::default(), &ItemTable::default(), at(0));
        assert!(!summary.in_map);
        assert!(summary.maps.is_empty());
        assert_eq!(summary.session_started_at, None);
        assert_eq!(summary.session_ended_at, None);
        assert_eq!(summary.earnings_per_hour, 0.0);
        assert!(serde_json::to_string(&summary).is_ok());
    }
}
