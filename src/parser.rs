//! Stateless line to event matching.

use chrono::{Local, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use tracing::trace;

use crate::event::{BagPayload, Event, EventKind};

/// Scene paths outside of this prefix (login, UI scenes) are not maps.
pub const MAPS_PREFIX: &str = "/Game/Art/Maps/";

/// The hideout every run returns to. Entering it ends the current map.
pub const SAFE_HUB: &str =
    "/Game/Art/Maps/01SD/XZ_YuJinZhiXiBiNanSuo200/XZ_YuJinZhiXiBiNanSuo200.XZ_YuJinZhiXiBiNanSuo200";

// One to three bracket groups (timestamp, frame counter, category) precede the marker.
const MARKER: &str = r"(?:\[.*?\]){1,3}\s*GameLog: Display: \[Game\]\s*";

/// Maps raw log lines to [`Event`]s.
///
/// All patterns are compiled once in [`Parser::new`]; [`Parser::parse`] only
/// borrows `self`, so one parser can be shared between tasks.
#[derive(Clone, Debug)]
pub struct Parser {
    bag_init: Regex,
    bag_mod: Regex,
    transition: Regex,
    timestamp: Regex,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            bag_init: compile(&format!(
                r"{MARKER}BagMgr@:InitBagData\s+PageId = (\d+)\s+SlotId = (\d+)\s+ConfigBaseId = (\d+)\s+Num = (\d+)"
            )),
            bag_mod: compile(&format!(
                r"{MARKER}BagMgr@:Modfy BagItem\s+PageId = (\d+)\s+SlotId = (\d+)\s+ConfigBaseId = (\d+)\s+Num = (\d+)"
            )),
            transition: compile(
                r"PageApplyBase@ _UpdateGameEnd: .*?NextSceneName = World'(/Game/Art/Maps[^']*)'",
            ),
            timestamp: compile(r"^\[(\d{4})\.(\d{2})\.(\d{2})-(\d{2})\.(\d{2})\.(\d{2}):(\d{3})\]"),
        }
    }

    /// Parses one line. Lines that match no pattern yield `None`.
    pub fn parse(&self, line: &str) -> Option<Event> {
        let line = line.trim_end_matches(['\r', '\n']);

        let kind = if let Some(caps) = self.bag_init.captures(line) {
            EventKind::BagInit(bag_payload(&caps)?)
        } else if let Some(caps) = self.bag_mod.captures(line) {
            EventKind::BagMod(bag_payload(&caps)?)
        } else {
            let caps = self.transition.captures(line)?;
            let scene = caps.get(1)?.as_str();
            if !scene.starts_with(MAPS_PREFIX) {
                return None;
            }
            if scene == SAFE_HUB {
                EventKind::MapEnd
            } else {
                EventKind::MapStart
            }
        };

        let time = self
            .timestamp(line)
            .unwrap_or_else(|| Local::now().naive_local());
        trace!(%kind, %time, "parsed event");

        Some(Event {
            time,
            kind,
            line: line.to_owned(),
        })
    }

    /// Extracts the `[YYYY.MM.DD-HH.MM.SS:mmm]` prefix, if present and valid.
    pub fn timestamp(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = self.timestamp.captures(line)?;
        let field = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };

        NaiveDate::from_ymd_opt(i32::try_from(field(1)?).ok()?, field(2)?, field(3)?)?
            .and_hms_milli_opt(field(4)?, field(5)?, field(6)?, field(7)?)
    }
}

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => unreachable!("built-in pattern failed to compile: {e}"),
    }
}

fn bag_payload(caps: &Captures<'_>) -> Option<BagPayload> {
    // Digits that overflow u32 are not a count the game ever writes.
    let field = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };

    Some(BagPayload {
        page_id: field(1)?,
        slot_id: field(2)?,
        config_base_id: field(3)?,
        num: field(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, Timelike};

    const BAG_INIT: &str = "[2025.11.04-19.20.45:474][302]GameLog: Display: [Game] BagMgr@:InitBagData PageId = 1 SlotId = 2 ConfigBaseId = 5210 Num = 5";
    const BAG_MOD: &str = "[2025.11.04-19.21.45:100][111]GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = 1 SlotId = 2 ConfigBaseId = 5210 Num = 7";

    #[test]
    fn test_bag_init_and_mod() {
        let parser = Parser::new();

        let ev = parser.parse(BAG_INIT).unwrap();
        assert_eq!(
            ev.kind,
            EventKind::BagInit(BagPayload {
                page_id: 1,
                slot_id: 2,
                config_base_id: 5210,
                num: 5
            })
        );
        assert_eq!(ev.line, BAG_INIT);

        let ev = parser.parse(BAG_MOD).unwrap();
        assert!(matches!(ev.kind, EventKind::BagMod(bag) if bag.num == 7 && bag.config_base_id == 5210));
    }

    #[test]
    fn test_map_start_and_end() {
        let parser = Parser::new();

        let start = "[2025.11.04-19.20.45:474][302]GameLog: Display: [Game] PageApplyBase@ _UpdateGameEnd: LastSceneName = /Game/Art/Maps/UI/LoginScene/LoginScene NextSceneName = World'/Game/Art/Maps/07YJ/YJ_YongZhouHuiLang200/YJ_YongZhouHuiLang200.YJ_YongZhouHuiLang200'";
        assert_eq!(parser.parse(start).unwrap().kind, EventKind::MapStart);

        let end = format!(
            "[2025.11.04-19.26.24:480][420]GameLog: Display: [Game] PageApplyBase@ _UpdateGameEnd: LastSceneName = World'/Game/Art/Maps/07YJ/YJ_YongZhouHuiLang200/YJ_YongZhouHuiLang200.YJ_YongZhouHuiLang200' NextSceneName = World'{SAFE_HUB}'"
        );
        assert_eq!(parser.parse(&end).unwrap().kind, EventKind::MapEnd);
    }

    #[test]
    fn test_transition_outside_maps_ignored() {
        let parser = Parser::new();
        let line = "[2025.11.04-19.20.45:474][302]GameLog: Display: [Game] PageApplyBase@ _UpdateGameEnd: LastSceneName = /Game/Art/Maps/UI/LoginScene/LoginScene NextSceneName = World'/NotMaps/Somewhere'";
        assert!(parser.parse(line).is_none());

        // Shares the prefix text but not the trailing slash.
        let line = "PageApplyBase@ _UpdateGameEnd: NextSceneName = World'/Game/Art/MapsX/Foo'";
        assert!(parser.parse(line).is_none());
    }

    #[test]
    fn test_timestamp() {
        let parser = Parser::new();
        let time = parser.parse(BAG_MOD).unwrap().time;

        assert_eq!(time.year(), 2025);
        assert_eq!(time.month(), 11);
        assert_eq!(time.day(), 4);
        assert_eq!(time.hour(), 19);
        assert_eq!(time.minute(), 21);
        assert_eq!(time.second(), 45);
        assert_eq!(time.nanosecond(), 100_000_000);
    }

    #[test]
    fn test_missing_timestamp_falls_back_to_now() {
        let parser = Parser::new();
        let line = "[NOTATS]GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = 1 SlotId = 1 ConfigBaseId = 1 Num = 2";

        let before = Local::now().naive_local() - Duration::seconds(1);
        let ev = parser.parse(line).unwrap();
        let after = Local::now().naive_local() + Duration::seconds(2);

        assert!(ev.time >= before && ev.time <= after, "{}", ev.time);
    }

    #[test]
    fn test_invalid_timestamp_falls_back() {
        let parser = Parser::new();
        assert!(parser.timestamp("[2025.13.45-19.21.45:100]").is_none());

        let line = "[2025.13.45-19.21.45:100][1]GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = 1 SlotId = 1 ConfigBaseId = 1 Num = 2";
        assert!(parser.parse(line).is_some());
    }

    #[test]
    fn test_crlf() {
        let parser = Parser::new();
        let line = format!("{BAG_MOD}\r\n");
        let ev = parser.parse(&line).unwrap();
        assert!(matches!(ev.kind, EventKind::BagMod(_)));
        assert!(!ev.line.ends_with('\r'));
    }

    #[test]
    fn test_multiple_bracket_groups() {
        let parser = Parser::new();
        let line = "[2025.11.04-19.21.45:100][302][Foo]GameLog: Display: [Game] BagMgr@:InitBagData PageId = 3 SlotId = 4 ConfigBaseId = 100 Num = 5";
        assert!(matches!(parser.parse(line).unwrap().kind, EventKind::BagInit(_)));
    }

    #[test]
    fn test_unrecognized_and_malformed() {
        let parser = Parser::new();
        assert!(parser.parse("").is_none());
        assert!(parser.parse("[2025.11.04-19.20.45:463][302]GameLog: Display: [Game] Something else").is_none());
        assert!(parser.parse("BagMgr@:Modfy BagItem PageId = 1 SlotId = 2 ConfigBaseId = 3 Num = 4").is_none());
        assert!(parser.parse("[[[[]]]] \u{0}\u{fffd} GameLog").is_none());

        let overflow = "[1]GameLog: Display: [Game] BagMgr@:Modfy BagItem PageId = 1 SlotId = 2 ConfigBaseId = 3 Num = 99999999999";
        assert!(parser.parse(overflow).is_none());
    }
}
