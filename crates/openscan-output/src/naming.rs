//! Filename templating.
//!
//! Patterns may contain `{date}` (`%Y-%m-%d`), `{time}` (`%H%M%S`) and `{n}`,
//! a three-digit sequence number that restarts every day.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::path::Path;
use tracing::debug;

const DEFAULT_PATTERN: &str = "scan_{date}_{time}_{n}";

/// A parsed filename pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    raw: String,
}

impl FilenamePattern {
    /// Wrap a pattern; blank patterns fall back to `scan_{date}_{time}_{n}`.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let raw = pattern.trim();
        Self {
            raw: if raw.is_empty() {
                DEFAULT_PATTERN.to_string()
            } else {
                raw.to_string()
            },
        }
    }

    /// The pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern carries the `{n}` sequence token.
    #[must_use]
    pub fn has_sequence(&self) -> bool {
        self.raw.contains("{n}")
    }

    /// Render a file stem (no extension) for `at` and sequence `n`.
    #[must_use]
    pub fn render(&self, at: NaiveDateTime, n: u32) -> String {
        let name = self
            .raw
            .replace("{date}", &at.format("%Y-%m-%d").to_string())
            .replace("{time}", &at.format("%H%M%S").to_string())
            .replace("{n}", &format!("{n:03}"));
        let name = sanitize(&name);
        if name.is_empty() {
            "scan".to_string()
        } else {
            name
        }
    }

    /// Regex matching names this pattern produced on `day`, capturing `n`.
    ///
    /// Returns `None` when the pattern has no sequence token.
    #[must_use]
    pub fn sequence_matcher(&self, day: NaiveDate) -> Option<Regex> {
        if !self.has_sequence() {
            return None;
        }
        let tokens = Regex::new(r"\{(date|time|n)\}").ok()?;
        let mut expr = String::from("^");
        let mut last = 0;
        let mut captured = false;
        for token in tokens.captures_iter(&self.raw) {
            let whole = token.get(0)?;
            expr.push_str(&regex::escape(&sanitize(&self.raw[last..whole.start()])));
            match &token[1] {
                "date" => expr.push_str(&regex::escape(&day.format("%Y-%m-%d").to_string())),
                "time" => expr.push_str(r"\d{6}"),
                _ if !captured => {
                    expr.push_str(r"(\d+)");
                    captured = true;
                }
                _ => expr.push_str(r"\d+"),
            }
            last = whole.end();
        }
        expr.push_str(&regex::escape(&sanitize(&self.raw[last..])));
        expr.push_str(r"(?:_\d+)?\.[A-Za-z0-9]+$");
        Regex::new(&expr).ok()
    }
}

impl Default for FilenamePattern {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Daily `{n}` counter, seeded from the output folder on the first use of
/// each day.
#[derive(Debug, Default)]
pub struct DailySequence {
    day: Option<NaiveDate>,
    last: u32,
}

impl DailySequence {
    /// Next sequence number for `day`.
    pub fn next(&mut self, day: NaiveDate, folder: &Path, pattern: &FilenamePattern) -> u32 {
        if self.day != Some(day) {
            self.last = highest_in_folder(folder, pattern, day);
            self.day = Some(day);
            debug!(%day, seed = self.last, "seeded daily sequence");
        }
        self.last += 1;
        self.last
    }
}

fn highest_in_folder(folder: &Path, pattern: &FilenamePattern, day: NaiveDate) -> u32 {
    let Some(matcher) = pattern.sequence_matcher(day) else {
        return 0;
    };
    let Ok(entries) = std::fs::read_dir(folder) else {
        return 0;
    };
    entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = matcher.captures(name.to_str()?)?;
            caps.get(1)?.as_str().parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0)
}
