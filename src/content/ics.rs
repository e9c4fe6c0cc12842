//! Minimal iCalendar reader: just enough of RFC 5545 to import VEVENTs.

use thiserror::Error;
use time::{macros::format_description, Date, OffsetDateTime, PrimitiveDateTime};
use time_tz::{timezones, Offset, PrimitiveDateTimeExt, TimeZone};
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum IcsError {
    #[error("not an iCalendar file")]
    NotCalendar,
    #[error("file is not valid UTF-8")]
    Encoding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IcsEvent {
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Returns every VEVENT carrying both a start and an end; others are skipped.
pub fn parse(raw: &[u8]) -> Result<Vec<IcsEvent>, IcsError> {
    let text = std::str::from_utf8(raw).map_err(|_| IcsError::Encoding)?;
    let lines = unfold(text.trim_start_matches('\u{feff}'));
    if !lines
        .first()
        .is_some_and(|l| l.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(IcsError::NotCalendar);
    }

    let mut events = Vec::new();
    let mut current: Option<Partial> = None;
    for line in &lines {
        let Some(prop) = split_property(line) else {
            continue;
        };
        let is_event = prop.value.trim().eq_ignore_ascii_case("VEVENT");
        match prop.name.as_str() {
            "BEGIN" if is_event => current = Some(Partial::default()),
            "END" if is_event => {
                if let Some(ev) = current.take().and_then(Partial::finish) {
                    events.push(ev);
                }
            }
            _ => {
                if let Some(p) = current.as_mut() {
                    p.apply(&prop);
                }
            }
        }
    }
    Ok(events)
}

#[derive(Default)]
struct Partial {
    summary: String,
    description: String,
    location: String,
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    /// Depth inside sub-components such as VALARM.
    nested: usize,
}

impl Partial {
    fn apply(&mut self, prop: &Property<'_>) {
        let value = prop.value;
        match prop.name.as_str() {
            "BEGIN" => self.nested += 1,
            "END" => self.nested = self.nested.saturating_sub(1),
            _ if self.nested > 0 => {}
            "SUMMARY" => self.summary = unescape(value),
            "DESCRIPTION" => self.description = unescape(value),
            "LOCATION" => self.location = unescape(value),
            "DTSTART" => self.start = parse_instant(value, prop.param("TZID")),
            "DTEND" => self.end = parse_instant(value, prop.param("TZID")),
            _ => {}
        }
    }

    fn finish(self) -> Option<IcsEvent> {
        Some(IcsEvent {
            start: self.start?,
            end: self.end?,
            summary: self.summary,
            description: self.description,
            location: self.location,
        })
    }
}

/// Joins folded continuation lines (those starting with a space or tab).
fn unfold(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix([' ', '\t']) {
            if let Some(prev) = out.last_mut() {
                prev.push_str(rest);
                continue;
            }
        }
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    out
}

struct Property<'a> {
    name: String,
    params: Vec<(String, &'a str)>,
    value: &'a str,
}

impl Property<'_> {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim_matches('"'))
    }
}

/// `NAME;PARAM=x:VALUE` into the upper-cased name, its parameters and the raw value.
fn split_property(line: &str) -> Option<Property<'_>> {
    let mut in_quotes = false;
    let colon = line.char_indices().find_map(|(i, c)| match c {
        '"' => {
            in_quotes = !in_quotes;
            None
        }
        ':' if !in_quotes => Some(i),
        _ => None,
    })?;
    let head = &line[..colon];
    let mut parts = head.split(';');
    let name = parts.next().unwrap_or(head).trim().to_ascii_uppercase();
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v))
        .collect();
    Some(Property {
        name,
        params,
        value: &line[colon + 1..],
    })
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out.trim().to_string()
}

/// Date-only values start at midnight UTC. Local times are resolved in their
/// `TZID` zone; floating times and unknown zones are read as UTC.
fn parse_instant(value: &str, tzid: Option<&str>) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Some(utc) = value.strip_suffix('Z') {
        return PrimitiveDateTime::parse(utc, format_description!("[year][month][day]T[hour][minute][second]"))
            .ok()
            .map(PrimitiveDateTime::assume_utc);
    }
    if value.contains('T') {
        let local =
            PrimitiveDateTime::parse(value, format_description!("[year][month][day]T[hour][minute][second]"))
                .ok()?;
        return Some(in_zone(local, tzid));
    }
    Date::parse(value, format_description!("[year][month][day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

fn in_zone(local: PrimitiveDateTime, tzid: Option<&str>) -> OffsetDateTime {
    let Some(name) = tzid else {
        return local.assume_utc();
    };
    // Some producers prefix the Olson name with a path such as `/mozilla.org/20070129_1/`.
    let zone = timezones::get_by_name(name).or_else(|| {
        let start = name.find(|c: char| c.is_ascii_uppercase())?;
        timezones::get_by_name(&name[start..])
    });
    let Some(zone) = zone else {
        debug!(%name, "unknown TZID, reading as UTC");
        return local.assume_utc();
    };
    // A wall time skipped by a DST jump takes the offset in force at that UTC instant.
    local.assume_timezone(zone).take_first().unwrap_or_else(|| {
        let offset = zone.get_offset_utc(&local.assume_utc()).to_utc();
        local.assume_offset(offset)
    })
}
