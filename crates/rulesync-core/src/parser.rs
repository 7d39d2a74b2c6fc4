//! Rule document parsing.
//!
//! A rule is markdown with optional YAML frontmatter:
//!
//! ```text
//! ---
//! description: TypeScript conventions
//! globs: "src/**/*.ts, src/**/*.tsx"
//! ---
//! # TypeScript
//! Follow @docs/style.md and [the lint config](config/eslint.json).
//! ```
//!
//! `globs` may also be a YAML list. Referenced files are `@path` mentions and
//! relative markdown link targets outside fenced code blocks.

use crate::error::{Result, RuleSyncError};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Metadata derived from a rule document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedRule {
    pub description: Option<String>,
    pub file_patterns: Vec<String>,
    pub referenced_files: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleFrontmatter {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    globs: Option<Globs>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Globs {
    One(String),
    Many(Vec<String>),
}

// ---------------------------------------------------------------------------
// Frontmatter
// ---------------------------------------------------------------------------

/// Split `content` into (frontmatter, body). No frontmatter → `(None, content)`.
fn split_frontmatter(content: &str) -> Result<(Option<&str>, &str)> {
    let rest = if let Some(r) = content.strip_prefix("---\n") {
        r
    } else if let Some(r) = content.strip_prefix("---\r\n") {
        r
    } else {
        return Ok((None, content));
    };
    // An empty block closes immediately.
    if let Some(body) = rest.strip_prefix("---") {
        return Ok((Some(""), body.trim_start_matches(['\r', '\n'])));
    }
    let Some(end) = rest.find("\n---") else {
        return Err(RuleSyncError::validation("", "unterminated frontmatter"));
    };
    let fm = &rest[..end];
    let body = rest[end + "\n---".len()..].trim_start_matches(['\r', '\n']);
    Ok((Some(fm), body))
}

fn parse_frontmatter(fm: &str) -> Result<RuleFrontmatter> {
    if fm.trim().is_empty() {
        return Ok(RuleFrontmatter::default());
    }
    serde_yaml::from_str(fm)
        .map_err(|e| RuleSyncError::validation("", format!("malformed frontmatter: {e}")))
}

fn split_globs(globs: Option<Globs>) -> Vec<String> {
    let raw: Vec<String> = match globs {
        None => Vec::new(),
        Some(Globs::One(s)) => s.split(',').map(str::to_string).collect(),
        Some(Globs::Many(v)) => v,
    };
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for g in raw {
        let g = g.trim();
        if !g.is_empty() && !out.iter().any(|o| o == g) {
            out.push(g.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Body scanning
// ---------------------------------------------------------------------------

static MENTION_RE: OnceLock<Regex> = OnceLock::new();
static LINK_RE: OnceLock<Regex> = OnceLock::new();

fn mention_re() -> &'static Regex {
    MENTION_RE.get_or_init(|| Regex::new(r"(?:^|[\s(])@([A-Za-z0-9_./\-]+)").unwrap())
}

fn link_re() -> &'static Regex {
    LINK_RE.get_or_init(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").unwrap())
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|h| !h.is_empty())
}

fn is_local_link(target: &str) -> bool {
    !(target.contains("://")
        || target.starts_with('#')
        || target.starts_with("mailto:")
        || target.starts_with('/'))
}

fn push_unique(out: &mut Vec<String>, path: &str) {
    if !path.is_empty() && !out.iter().any(|p| p == path) {
        out.push(path.to_string());
    }
}

fn referenced_files(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        for cap in mention_re().captures_iter(line) {
            let path = cap[1].trim_end_matches(['.', ',']);
            // `@someone` is a mention, `@src/lib.rs` is a file.
            if path.contains('/') || path.contains('.') {
                push_unique(&mut out, path);
            }
        }
        for cap in link_re().captures_iter(line) {
            let target = &cap[1];
            if is_local_link(target) {
                let path = target.split('#').next().unwrap_or(target);
                push_unique(&mut out, path);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse a rule document. The caller fills in the rule id on errors.
pub fn parse_rule(content: &str) -> Result<ParsedRule> {
    if content.trim().is_empty() {
        return Err(RuleSyncError::validation("", "content is empty"));
    }
    let (fm, body) = split_frontmatter(content)?;
    let fm = match fm {
        Some(fm) => parse_frontmatter(fm)?,
        None => RuleFrontmatter::default(),
    };
    let description = fm
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .or_else(|| first_heading(body));
    Ok(ParsedRule {
        description,
        file_patterns: split_globs(fm.globs),
        referenced_files: referenced_files(body),
    })
}
