use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::error::{Error, Result};
use crate::memory::{parse_thought_timestamp, MemoryType, Severity};
use crate::scope::ScopeKind;

/// Parsed YAML frontmatter of a memory file.
///
/// Field order here is the declared serialization order; [`serialize`] emits
/// the fields in exactly this sequence so written files are byte-stable.
/// The `Serialize` derive is the JSON envelope shape, not the file format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frontmatter {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub scope: ScopeKind,
    pub tags: Vec<String>,
    #[serde(with = "crate::clock::serde_millis")]
    pub created: DateTime<Utc>,
    #[serde(with = "crate::clock::serde_millis")]
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Content-hash hint for the embedding cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
}

/// Wire shape of the YAML block. Timestamps arrive as strings so missing or
/// legacy values can be backfilled deterministically.
#[derive(Deserialize)]
struct RawFrontmatter {
    id: String,
    title: String,
    #[serde(rename = "type")]
    memory_type: MemoryType,
    scope: ScopeKind,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    embedding: Option<String>,
}

/// Extract a leading YAML block delimited by `---` lines, returning
/// frontmatter and the verbatim body.
///
/// An empty body after the frontmatter is a valid result and is preserved
/// as empty. Invalid or absent frontmatter is an error; there is no "no
/// frontmatter" success path.
pub fn parse(content: &str, path_hint: &str) -> Result<(Frontmatter, String)> {
    let parse_err = |message: String| Error::Parse {
        path: path_hint.to_string(),
        message,
    };

    let rest = content
        .strip_prefix("---\r\n")
        .or_else(|| content.strip_prefix("---\n"))
        .ok_or_else(|| parse_err("missing frontmatter delimiter".into()))?;

    let mut yaml_end = None;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            yaml_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (yaml_len, body_start) =
        yaml_end.ok_or_else(|| parse_err("unterminated frontmatter block".into()))?;

    let yaml = &rest[..yaml_len];
    let body = rest[body_start..].to_string();

    let raw: RawFrontmatter =
        serde_yaml::from_str(yaml).map_err(|e| parse_err(e.to_string()))?;
    if raw.id.trim().is_empty() {
        return Err(parse_err("frontmatter id is empty".into()));
    }

    let created_opt = parse_stamp(raw.created.as_deref(), path_hint)?;
    let updated_opt = parse_stamp(raw.updated.as_deref(), path_hint)?;
    // Backfill timestamps dropped by hand edits: prefer the sibling stamp,
    // then the instant encoded in a thought ID, then the epoch.
    let fallback = parse_thought_timestamp(&raw.id)
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    let created = created_opt.or(updated_opt).unwrap_or(fallback);
    let updated = updated_opt.unwrap_or(created);

    Ok((
        Frontmatter {
            id: raw.id,
            title: raw.title,
            memory_type: raw.memory_type,
            scope: raw.scope,
            tags: raw.tags,
            created,
            updated,
            severity: raw.severity,
            project: raw.project,
            links: raw.links,
            embedding: raw.embedding,
        },
        body,
    ))
}

fn parse_stamp(value: Option<&str>, path_hint: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(s) => clock::parse_timestamp(s)
            .map(Some)
            .ok_or_else(|| Error::Parse {
                path: path_hint.to_string(),
                message: format!("unparseable timestamp '{s}'"),
            }),
    }
}

/// Serialize frontmatter and body into file content.
///
/// Fields are emitted in the declared order, scalars are double-quoted when
/// they contain YAML metacharacters, arrays use block style, and optional
/// fields are omitted when absent.
pub fn serialize(front: &Frontmatter, body: &str) -> String {
    let mut out = String::with_capacity(256 + body.len());
    out.push_str("---\n");
    push_scalar(&mut out, "id", &front.id);
    push_scalar(&mut out, "title", &front.title);
    push_scalar(&mut out, "type", front.memory_type.as_str());
    push_scalar(&mut out, "scope", front.scope.as_str());
    push_list(&mut out, "tags", &front.tags, true);
    push_scalar(&mut out, "created", &clock::format_timestamp(front.created));
    push_scalar(&mut out, "updated", &clock::format_timestamp(front.updated));
    if let Some(severity) = front.severity {
        push_scalar(&mut out, "severity", &severity.to_string());
    }
    if let Some(project) = &front.project {
        push_scalar(&mut out, "project", project);
    }
    push_list(&mut out, "links", &front.links, false);
    if let Some(embedding) = &front.embedding {
        push_scalar(&mut out, "embedding", embedding);
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}

fn push_scalar(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(&quote(value));
    out.push('\n');
}

/// Block-style sequence; `tags` is always present (as `[]` when empty),
/// `links` is omitted entirely when empty.
fn push_list(out: &mut String, key: &str, values: &[String], always: bool) {
    if values.is_empty() {
        if always {
            out.push_str(key);
            out.push_str(": []\n");
        }
        return;
    }
    out.push_str(key);
    out.push_str(":\n");
    for value in values {
        out.push_str("  - ");
        out.push_str(&quote(value));
        out.push('\n');
    }
}

/// Double-quote a scalar when YAML would otherwise mangle it.
fn quote(value: &str) -> String {
    if value.is_empty() {
        return "\"\"".to_string();
    }

    let needs_quoting = value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
        || value.contains(": ")
        || value.ends_with(':')
        || value.contains(" #")
        || value.contains('"')
        || value.contains('\n')
        || value
            .starts_with(['-', '?', ':', '[', ']', '{', '}', ',', '&', '*', '!', '|', '>', '%', '@', '`', '#', '\'', '"'])
        || matches!(
            value,
            "true" | "false" | "null" | "~" | "yes" | "no" | "on" | "off"
        )
        || value.parse::<f64>().is_ok();

    if !needs_quoting {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frontmatter {
        Frontmatter {
            id: "learning-avoid-sync-i-o-in-hooks".into(),
            title: "Avoid sync I/O in hooks".into(),
            memory_type: MemoryType::Learning,
            scope: ScopeKind::Project,
            tags: vec!["perf".into(), "hooks".into()],
            created: clock::parse_timestamp("2026-01-17T12:34:56.000Z").unwrap(),
            updated: clock::parse_timestamp("2026-01-17T12:34:56.000Z").unwrap(),
            severity: None,
            project: None,
            links: Vec::new(),
            embedding: None,
        }
    }

    #[test]
    fn round_trip_preserves_known_fields() {
        let front = sample();
        let body = "# Notes\n\nHooks must never block.\n";
        let content = serialize(&front, body);
        let (parsed, parsed_body) = parse(&content, "permanent/x.md").unwrap();
        assert_eq!(parsed, front);
        assert_eq!(parsed_body, body);
    }

    #[test]
    fn round_trip_is_byte_stable() {
        let front = sample();
        let content = serialize(&front, "body\n");
        let (parsed, body) = parse(&content, "x.md").unwrap();
        assert_eq!(serialize(&parsed, &body), content);
    }

    #[test]
    fn serialize_quotes_title_with_colon() {
        let mut front = sample();
        front.title = "Gotcha: duplicate prefix".into();
        let content = serialize(&front, "");
        assert!(content.contains("title: \"Gotcha: duplicate prefix\"\n"));

        let (parsed, _) = parse(&content, "x.md").unwrap();
        assert_eq!(parsed.title, "Gotcha: duplicate prefix");
    }

    #[test]
    fn serialize_uses_block_style_arrays() {
        let front = sample();
        let content = serialize(&front, "");
        assert!(content.contains("tags:\n  - perf\n  - hooks\n"));
    }

    #[test]
    fn serialize_empty_tags_as_flow_empty() {
        let mut front = sample();
        front.tags.clear();
        let content = serialize(&front, "");
        assert!(content.contains("tags: []\n"));
    }

    #[test]
    fn serialize_omits_absent_optionals() {
        let content = serialize(&sample(), "");
        assert!(!content.contains("severity"));
        assert!(!content.contains("project"));
        assert!(!content.contains("links"));
        assert!(!content.contains("embedding"));
    }

    #[test]
    fn serialize_includes_present_optionals() {
        let mut front = sample();
        front.severity = Some(Severity::High);
        front.project = Some("payments".into());
        front.links = vec!["hub-payments".into()];
        front.embedding = Some("abc123".into());
        let content = serialize(&front, "");
        assert!(content.contains("severity: high\n"));
        assert!(content.contains("project: payments\n"));
        assert!(content.contains("links:\n  - hub-payments\n"));
        assert!(content.contains("embedding: abc123\n"));
    }

    #[test]
    fn empty_body_is_preserved_as_empty() {
        let content = serialize(&sample(), "");
        assert!(content.ends_with("---\n"));
        let (_, body) = parse(&content, "x.md").unwrap();
        assert_eq!(body, "");
    }

    #[test]
    fn parse_accepts_flow_style_tags() {
        let content = "---\nid: hub-x\ntitle: X\ntype: hub\nscope: global\ntags: [a, b]\ncreated: 2026-01-01T00:00:00.000Z\nupdated: 2026-01-01T00:00:00.000Z\n---\nbody";
        let (front, body) = parse(content, "x.md").unwrap();
        assert_eq!(front.tags, vec!["a", "b"]);
        assert_eq!(body, "body");
    }

    #[test]
    fn parse_missing_delimiter_is_error() {
        let err = parse("# Just markdown\n", "notes.md").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn parse_unterminated_block_is_error() {
        let err = parse("---\nid: hub-x\n", "notes.md").unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn parse_invalid_yaml_is_error() {
        let err = parse("---\nid: [unclosed\n---\n", "notes.md").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn parse_unknown_type_is_error() {
        let content = "---\nid: note-x\ntitle: X\ntype: note\nscope: global\n---\n";
        assert!(parse(content, "x.md").is_err());
    }

    #[test]
    fn parse_backfills_missing_updated_from_created() {
        let content = "---\nid: hub-x\ntitle: X\ntype: hub\nscope: global\ncreated: 2026-01-01T00:00:00.000Z\n---\n";
        let (front, _) = parse(content, "x.md").unwrap();
        assert_eq!(front.updated, front.created);
    }

    #[test]
    fn parse_backfills_thought_timestamps_from_id() {
        let content =
            "---\nid: think-20260117-123456789\ntitle: T\ntype: breadcrumb\nscope: local\n---\n";
        let (front, _) = parse(content, "x.md").unwrap();
        assert_eq!(
            clock::format_timestamp(front.created),
            "2026-01-17T12:34:56.789Z"
        );
    }

    #[test]
    fn parse_rejects_garbage_timestamp() {
        let content =
            "---\nid: hub-x\ntitle: X\ntype: hub\nscope: global\ncreated: yesterday\n---\n";
        assert!(parse(content, "x.md").is_err());
    }

    #[test]
    fn quote_passthrough_for_plain_scalars() {
        assert_eq!(quote("plain-slug_1"), "plain-slug_1");
    }

    #[test]
    fn quote_wraps_booleans_and_numbers() {
        assert_eq!(quote("true"), "\"true\"");
        assert_eq!(quote("3.14"), "\"3.14\"");
    }

    #[test]
    fn quote_escapes_inner_quotes() {
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }
}
