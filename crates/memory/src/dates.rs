//! Swedish date-expression parsing.
//!
//! Turns free-form Swedish text into concrete ISO dates (YYYY-MM-DD) for
//! use as retrieval date filters. Recognizes relative words ("idag",
//! "igår", "i förrgår"), past-tense weekday phrases ("i måndags"),
//! explicit ISO dates, and day-plus-month-name forms ("13 augusti",
//! "den 14:e augusti 2025").
//!
//! No date expression found is a normal outcome, never an error — callers
//! proceed without a date filter.

use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate};
use regex::Regex;

static ISO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(20\d{2})-(\d{1,2})-(\d{1,2})\b").expect("valid regex")
});

static WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bi\s+(måndags|tisdags|onsdags|torsdags|fredags|lördags|söndags)\b")
        .expect("valid regex")
});

static DAY_MONTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:den\s+)?(\d{1,2})(?::?e)?\s+(januari|februari|mars|april|maj|juni|juli|augusti|augiusti|september|oktober|november|december)(?:\s+(20\d{2}))?\b",
    )
    .expect("valid regex")
});

/// Relative-day tokens, ordered today-first. Single detection checks
/// them in this order; multi-detection collects them in mention order.
/// ASCII spellings are accepted alongside the proper diacritics.
const RELATIVE_TOKENS: &[(&str, u64)] = &[
    ("idag", 0),
    ("i dag", 0),
    ("igår", 1),
    ("igar", 1),
    ("i förrgår", 2),
    ("i forrgar", 2),
];

fn month_number(name: &str) -> Option<u32> {
    // "augiusti" is a recurring user typo worth accepting.
    Some(match name {
        "januari" => 1,
        "februari" => 2,
        "mars" => 3,
        "april" => 4,
        "maj" => 5,
        "juni" => 6,
        "juli" => 7,
        "augusti" | "augiusti" => 8,
        "september" => 9,
        "oktober" => 10,
        "november" => 11,
        "december" => 12,
        _ => return None,
    })
}

fn weekday_number(past_tense: &str) -> Option<u32> {
    Some(match past_tense {
        "måndags" => 0,
        "tisdags" => 1,
        "onsdags" => 2,
        "torsdags" => 3,
        "fredags" => 4,
        "lördags" => 5,
        "söndags" => 6,
        _ => return None,
    })
}

fn iso(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn match_explicit_iso(text: &str) -> Option<String> {
    let caps = ISO_RE.captures(text)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(iso)
}

fn match_relative(text: &str, today: NaiveDate) -> Option<String> {
    for (token, days_ago) in RELATIVE_TOKENS {
        if text.contains(token) {
            return today.checked_sub_days(Days::new(*days_ago)).map(iso);
        }
    }
    None
}

/// "i måndags" resolves to the most recent strictly-past Monday: if today
/// is a Monday, that means seven days ago, never today.
fn match_last_weekday(text: &str, today: NaiveDate) -> Option<String> {
    let caps = WEEKDAY_RE.captures(text)?;
    let target = weekday_number(&caps[1])?;
    let today_num = today.weekday().num_days_from_monday();
    let mut days_ago = (today_num + 7 - target) % 7;
    if days_ago == 0 {
        days_ago = 7;
    }
    today.checked_sub_days(Days::new(u64::from(days_ago))).map(iso)
}

fn match_day_month(text: &str, today: NaiveDate) -> Option<String> {
    let caps = DAY_MONTH_RE.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_number(&caps[2])?;
    let year: i32 = caps
        .get(3)
        .map_or(Some(today.year()), |y| y.as_str().parse().ok())?;
    NaiveDate::from_ymd_opt(year, month, day).map(iso)
}

/// Detect a single calendar date from a Swedish message.
///
/// Precedence: explicit ISO date, then relative words, then past-tense
/// weekday, then day-plus-month-name.
pub fn detect_date(message: &str, today: NaiveDate) -> Option<String> {
    let text = message.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    match_explicit_iso(&text)
        .or_else(|| match_relative(&text, today))
        .or_else(|| match_last_weekday(&text, today))
        .or_else(|| match_day_month(&text, today))
}

/// Detect several dates when the message names more than one day
/// ("idag och igår"). Relative mentions are collected in left-to-right
/// order, then weekday, ISO, and day-month matches are appended; the
/// result is deduplicated preserving first-seen order. Falls back to
/// [`detect_date`] when no structured match is found.
pub fn detect_dates(message: &str, today: NaiveDate) -> Vec<String> {
    let text = message.trim().to_lowercase();
    if text.is_empty() {
        return Vec::new();
    }

    let mut mentions: Vec<(usize, u64)> = Vec::new();
    for (token, days_ago) in RELATIVE_TOKENS {
        for (pos, _) in text.match_indices(token) {
            mentions.push((pos, *days_ago));
        }
    }
    mentions.sort_by_key(|(pos, _)| *pos);

    let mut candidates: Vec<String> = mentions
        .into_iter()
        .filter_map(|(_, days_ago)| today.checked_sub_days(Days::new(days_ago)).map(iso))
        .collect();

    if let Some(d) = match_last_weekday(&text, today) {
        candidates.push(d);
    }
    if let Some(d) = match_explicit_iso(&text) {
        candidates.push(d);
    }
    if let Some(d) = match_day_month(&text, today) {
        candidates.push(d);
    }

    let mut unique: Vec<String> = Vec::new();
    for d in candidates {
        if !unique.contains(&d) {
            unique.push(d);
        }
    }
    if unique.is_empty() {
        return detect_date(message, today).into_iter().collect();
    }
    unique
}
