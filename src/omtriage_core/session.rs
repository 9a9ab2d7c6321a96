use crate::omtriage_core::group::Item;
use std::collections::HashMap;
use time::{Date, PrimitiveDateTime};

/// Hour at which the afternoon half of a day starts (local wall clock).
pub const AFTERNOON_HOUR: u8 = 12;

/// Default gap between shots that starts a new session, in hours.
pub const DEFAULT_SESSION_GAP: f64 = 3.0;

/// Date format used in session labels.
const LABEL_DATE_FORMAT: &[time::format_description::FormatItem] =
    time::macros::format_description!("[year]-[month]-[day]");

/// Half of a calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Half {
    Am,
    Pm,
}

impl Half {
    pub fn of(time: &PrimitiveDateTime) -> Self {
        if time.hour() >= AFTERNOON_HOUR { Half::Pm } else { Half::Am }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Half::Am => "AM",
            Half::Pm => "PM",
        }
    }
}

impl std::fmt::Display for Half {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dated, half-day-bounded run of items. Never empty.
#[derive(Debug, Clone)]
pub struct Session {
    pub date: Date,
    pub half: Half,
    /// `None` for the first session of a date and half, then 1, 2, ...
    pub index: Option<u32>,
    /// Items sorted by capture time ascending.
    pub items: Vec<Item>,
    /// Built from an item without any capture time; dated by fallback time.
    pub undated: bool,
}

impl Session {
    fn new(first: Item, undated: bool) -> Self {
        let time = first.label_time();
        Session {
            date: time.date(),
            half: Half::of(&time),
            index: None,
            items: vec![first],
            undated,
        }
    }

    /// Folder name: `YYYY-MM-DD-{AM|PM}[-N]`.
    pub fn label(&self) -> String {
        let date = self
            .date
            .format(LABEL_DATE_FORMAT)
            .unwrap_or_else(|_| self.date.to_string());
        match self.index {
            Some(n) => format!("{}-{}-{}", date, self.half, n),
            None => format!("{}-{}", date, self.half),
        }
    }

    pub fn file_count(&self) -> usize {
        self.items.iter().map(|i| i.files.len()).sum()
    }
}

/// Whether `next` must open a new session after `prev`.
///
/// Date and half changes always split. Within a half, a gap strictly greater
/// than `gap_hours` splits; a gap of exactly `gap_hours` does not.
fn starts_new_session(prev: PrimitiveDateTime, next: PrimitiveDateTime, gap_hours: f64) -> bool {
    if prev.date() != next.date() || Half::of(&prev) != Half::of(&next) {
        return true;
    }
    let gap = (next - prev).as_seconds_f64();
    gap > gap_hours * 3600.0
}

/// Partition items into sessions.
///
/// Dated items are sorted by capture time and walked in order. Undated items
/// go last, each in its own session dated by its fallback time. Sessions that
/// share a date and half are numbered in order: the first carries no index,
/// later ones get 1, 2, ...
pub fn build_sessions(items: Vec<Item>, gap_hours: f64) -> Vec<Session> {
    let (mut dated, mut undated): (Vec<Item>, Vec<Item>) =
        items.into_iter().partition(|i| !i.is_undated());

    dated.sort_by(|a, b| {
        a.capture_time()
            .cmp(&b.capture_time())
            .then_with(|| a.directory.cmp(&b.directory))
            .then_with(|| a.key.cmp(&b.key))
    });
    undated.sort_by(|a, b| {
        a.fallback_time()
            .cmp(&b.fallback_time())
            .then_with(|| a.directory.cmp(&b.directory))
            .then_with(|| a.key.cmp(&b.key))
    });

    let mut sessions: Vec<Session> = Vec::new();
    let mut current: Option<(Session, PrimitiveDateTime)> = None;

    for item in dated {
        let Some(time) = item.capture_time() else {
            continue;
        };
        current = match current.take() {
            Some((mut session, prev)) if !starts_new_session(prev, time, gap_hours) => {
                session.items.push(item);
                Some((session, time))
            }
            previous => {
                if let Some((session, _)) = previous {
                    sessions.push(session);
                }
                Some((Session::new(item, false), time))
            }
        };
    }
    if let Some((session, _)) = current {
        sessions.push(session);
    }

    if !undated.is_empty() {
        log::info!(
            "{} items have no capture time and are dated by modification time",
            undated.len()
        );
    }
    for item in undated {
        sessions.push(Session::new(item, true));
    }

    number_sessions(&mut sessions);
    sessions
}

/// Assign disambiguation indices to sessions sharing a date and half.
fn number_sessions(sessions: &mut [Session]) {
    let mut seen: HashMap<(Date, Half), u32> = HashMap::new();
    for session in sessions.iter_mut() {
        let count = seen.entry((session.date, session.half)).or_insert(0);
        session.index = if *count == 0 { None } else { Some(*count) };
        *count += 1;
    }
}
