use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::frontmatter::Frontmatter;

/// The kinds of memory a store can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Decision,
    Learning,
    Gotcha,
    Artifact,
    Hub,
    Breadcrumb,
}

impl MemoryType {
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Decision,
        MemoryType::Learning,
        MemoryType::Gotcha,
        MemoryType::Artifact,
        MemoryType::Hub,
        MemoryType::Breadcrumb,
    ];

    /// The ID prefix for this type. Breadcrumbs use the thought-document
    /// convention `think-` rather than their type name.
    pub fn prefix(self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Learning => "learning",
            MemoryType::Gotcha => "gotcha",
            MemoryType::Artifact => "artifact",
            MemoryType::Hub => "hub",
            MemoryType::Breadcrumb => "think",
        }
    }

    /// Breadcrumbs live under `temporary/`; everything else under `permanent/`.
    pub fn subdirectory(self) -> &'static str {
        if self.is_permanent() {
            "permanent"
        } else {
            "temporary"
        }
    }

    pub fn is_permanent(self) -> bool {
        !matches!(self, MemoryType::Breadcrumb)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Learning => "learning",
            MemoryType::Gotcha => "gotcha",
            MemoryType::Artifact => "artifact",
            MemoryType::Hub => "hub",
            MemoryType::Breadcrumb => "breadcrumb",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "decision" => Ok(MemoryType::Decision),
            "learning" => Ok(MemoryType::Learning),
            "gotcha" => Ok(MemoryType::Gotcha),
            "artifact" => Ok(MemoryType::Artifact),
            "hub" => Ok(MemoryType::Hub),
            "breadcrumb" | "thought" => Ok(MemoryType::Breadcrumb),
            other => Err(Error::Invalid(format!(
                "unknown memory type '{other}': expected decision, learning, gotcha, artifact, hub, or breadcrumb"
            ))),
        }
    }
}

/// Severity annotation, mostly used on gotchas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::Invalid(format!(
                "unknown severity '{other}': expected low, medium, high, or critical"
            ))),
        }
    }
}

/// A memory: frontmatter plus Markdown body.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub front: Frontmatter,
    pub body: String,
}

impl Memory {
    /// Scope-relative path of this memory's file.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}.md",
            self.front.memory_type.subdirectory(),
            self.front.id
        )
    }
}

/// Slugify a title: lowercase, ASCII alphanumerics and underscores kept,
/// every other run of characters collapsed to a single hyphen, hyphens
/// trimmed at both ends.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for c in title.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    out
}

/// Generate a unique memory ID of the form `<prefix>-<slug>`.
///
/// A leading type prefix already present in the title is stripped before
/// composing, so "Gotcha: duplicate prefix" becomes `gotcha-duplicate-prefix`
/// rather than `gotcha-gotcha-duplicate-prefix`. Collisions against
/// `existing` are resolved with `-2`, `-3`, … suffixes.
pub fn generate_id(memory_type: MemoryType, title: &str, existing: &HashSet<String>) -> String {
    let prefix = memory_type.prefix();
    let mut base = slug(title);
    if let Some(stripped) = base.strip_prefix(&format!("{prefix}-")) {
        base = stripped.to_string();
    }

    let candidate = if base.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}-{base}")
    };

    dedupe(candidate, existing)
}

/// Generate a timestamp-derived thought ID: `think-YYYYMMDD-HHMMSSmmm`.
///
/// Same-millisecond collisions fall back to the uniqueness suffix.
pub fn generate_thought_id(now: DateTime<Utc>, existing: &HashSet<String>) -> String {
    let candidate = format!("think-{}", now.format("%Y%m%d-%H%M%S%3f"));
    dedupe(candidate, existing)
}

fn dedupe(candidate: String, existing: &HashSet<String>) -> String {
    if !existing.contains(&candidate) {
        return candidate;
    }
    let mut n = 2u64;
    loop {
        let suffixed = format!("{candidate}-{n}");
        if !existing.contains(&suffixed) {
            return suffixed;
        }
        n += 1;
    }
}

/// Extract the timestamp encoded in a thought ID.
///
/// Accepts both the current 9-digit (`HHMMSSmmm`) and the legacy 6-digit
/// (`HHMMSS`) time field, with or without a uniqueness suffix.
pub fn parse_thought_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let re = Regex::new(r"^think-(\d{8})-(\d{6}|\d{9})(?:-\d+)?$").ok()?;
    let caps = re.captures(id)?;
    let date = &caps[1];
    let time = &caps[2];

    let year: i32 = date[0..4].parse().ok()?;
    let month: u32 = date[4..6].parse().ok()?;
    let day: u32 = date[6..8].parse().ok()?;
    let hour: u32 = time[0..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    let second: u32 = time[4..6].parse().ok()?;
    let millis: u32 = if time.len() == 9 {
        time[6..9].parse().ok()?
    } else {
        0
    };

    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .map(|ts| ts + chrono::Duration::milliseconds(i64::from(millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn type_prefixes() {
        assert_eq!(MemoryType::Decision.prefix(), "decision");
        assert_eq!(MemoryType::Breadcrumb.prefix(), "think");
    }

    #[test]
    fn type_directories() {
        assert_eq!(MemoryType::Learning.subdirectory(), "permanent");
        assert_eq!(MemoryType::Breadcrumb.subdirectory(), "temporary");
    }

    #[test]
    fn type_parses_thought_alias() {
        assert_eq!(
            "thought".parse::<MemoryType>().unwrap(),
            MemoryType::Breadcrumb
        );
    }

    #[test]
    fn slug_basic() {
        assert_eq!(slug("Avoid sync I/O in hooks"), "avoid-sync-i-o-in-hooks");
    }

    #[test]
    fn slug_collapses_runs_and_trims() {
        assert_eq!(slug("  --Weird***title--  "), "weird-title");
    }

    #[test]
    fn slug_preserves_underscores() {
        assert_eq!(slug("use_fts_index now"), "use_fts_index-now");
    }

    #[test]
    fn slug_non_ascii_becomes_hyphen() {
        assert_eq!(slug("café crème"), "caf-cr-me");
    }

    #[test]
    fn generate_id_composes_prefix_and_slug() {
        let id = generate_id(MemoryType::Learning, "Avoid sync I/O in hooks", &ids(&[]));
        assert_eq!(id, "learning-avoid-sync-i-o-in-hooks");
    }

    #[test]
    fn generate_id_strips_duplicate_prefix() {
        let id = generate_id(MemoryType::Gotcha, "Gotcha: duplicate prefix", &ids(&[]));
        assert_eq!(id, "gotcha-duplicate-prefix");
    }

    #[test]
    fn generate_id_strips_prefix_only_once() {
        let id = generate_id(MemoryType::Gotcha, "gotcha gotcha moments", &ids(&[]));
        assert_eq!(id, "gotcha-gotcha-moments");
    }

    #[test]
    fn generate_id_suffixes_on_collision() {
        let existing = ids(&["learning-retry", "learning-retry-2"]);
        let id = generate_id(MemoryType::Learning, "Retry", &existing);
        assert_eq!(id, "learning-retry-3");
    }

    #[test]
    fn generate_id_empty_title_falls_back_to_prefix() {
        let id = generate_id(MemoryType::Hub, "???", &ids(&[]));
        assert_eq!(id, "hub");
    }

    #[test]
    fn thought_id_has_millisecond_precision() {
        let ts = crate::clock::parse_timestamp("2026-01-17T12:34:56.789Z").unwrap();
        let id = generate_thought_id(ts, &ids(&[]));
        assert_eq!(id, "think-20260117-123456789");
    }

    #[test]
    fn thought_id_same_millisecond_gets_suffix() {
        let ts = crate::clock::parse_timestamp("2026-01-17T12:34:56.789Z").unwrap();
        let first = generate_thought_id(ts, &ids(&[]));
        let existing = ids(&[&first]);
        let second = generate_thought_id(ts, &existing);
        assert_eq!(second, "think-20260117-123456789-2");
        assert_ne!(first, second);
    }

    #[test]
    fn thought_timestamp_parses_nine_digit() {
        let ts = parse_thought_timestamp("think-20260117-123456789").unwrap();
        assert_eq!(
            crate::clock::format_timestamp(ts),
            "2026-01-17T12:34:56.789Z"
        );
    }

    #[test]
    fn thought_timestamp_parses_legacy_six_digit() {
        let ts = parse_thought_timestamp("think-20260117-123456").unwrap();
        assert_eq!(
            crate::clock::format_timestamp(ts),
            "2026-01-17T12:34:56.000Z"
        );
    }

    #[test]
    fn thought_timestamp_ignores_suffix() {
        assert!(parse_thought_timestamp("think-20260117-123456789-2").is_some());
    }

    #[test]
    fn thought_timestamp_rejects_other_ids() {
        assert!(parse_thought_timestamp("learning-foo").is_none());
        assert!(parse_thought_timestamp("think-2026-123456").is_none());
    }
}
