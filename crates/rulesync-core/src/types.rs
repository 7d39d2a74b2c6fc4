use crate::error::{Result, RuleSyncError};
use crate::parser;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// SyncStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    #[default]
    LocalOnly,
    ServerOnly,
    Conflict,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::LocalOnly => "local-only",
            SyncStatus::ServerOnly => "server-only",
            SyncStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RuleMetadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetadata {
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub referenced_files: Vec<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A markdown rule document together with the metadata extracted from it.
///
/// On the wire the metadata fields sit next to `content` in a single object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(flatten)]
    pub metadata: RuleMetadata,
    pub content: String,
}

impl Rule {
    /// Build a rule from a file name and its raw markdown.
    ///
    /// The id is the file stem and the stored file name is derived from it,
    /// so any directory part of `filename` is dropped. Derived metadata comes
    /// from the parser.
    pub fn from_file(
        filename: &str,
        content: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id_from_filename(filename)?;
        let filename = paths::rule_filename(&id);
        Self::new(id, filename, content, last_modified)
    }

    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        content: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id.into();
        validate_rule_id(&id)?;
        let content = content.into();
        let parsed = parser::parse_rule(&content).map_err(|e| match e {
            RuleSyncError::Validation { reason, .. } => RuleSyncError::validation(&id, reason),
            other => other,
        })?;
        Ok(Rule {
            metadata: RuleMetadata {
                id,
                filename: filename.into(),
                description: parsed.description,
                file_patterns: parsed.file_patterns,
                referenced_files: parsed.referenced_files,
                last_modified,
                sync_status: SyncStatus::LocalOnly,
            },
            content,
        })
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Replace the content and recompute every derived metadata field.
    ///
    /// The rule is left untouched when the new content does not parse.
    pub fn set_content(&mut self, content: impl Into<String>, at: DateTime<Utc>) -> Result<()> {
        let content = content.into();
        let parsed = parser::parse_rule(&content).map_err(|e| match e {
            RuleSyncError::Validation { reason, .. } => {
                RuleSyncError::validation(&self.metadata.id, reason)
            }
            other => other,
        })?;
        self.metadata.description = parsed.description;
        self.metadata.file_patterns = parsed.file_patterns;
        self.metadata.referenced_files = parsed.referenced_files;
        self.metadata.last_modified = at;
        self.content = content;
        Ok(())
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.content)
    }

    /// Re-run the parser and check the derived fields agree with the content.
    /// The file name must be the one derived from the id.
    pub fn validate(&self) -> Result<()> {
        validate_rule_id(&self.metadata.id)?;
        let expected = paths::rule_filename(&self.metadata.id);
        if self.metadata.filename != expected {
            return Err(RuleSyncError::validation(
                &self.metadata.id,
                format!(
                    "file name '{}' does not match id (expected '{expected}')",
                    self.metadata.filename
                ),
            ));
        }
        let parsed = parser::parse_rule(&self.content).map_err(|e| match e {
            RuleSyncError::Validation { reason, .. } => {
                RuleSyncError::validation(&self.metadata.id, reason)
            }
            other => other,
        })?;
        if parsed.file_patterns != self.metadata.file_patterns
            || parsed.referenced_files != self.metadata.referenced_files
        {
            return Err(RuleSyncError::validation(
                &self.metadata.id,
                "metadata is stale: derived fields do not match content",
            ));
        }
        Ok(())
    }

    /// Same document under a different id and file name.
    pub fn duplicate_as(&self, new_id: &str) -> Result<Rule> {
        validate_rule_id(new_id)?;
        let mut copy = self.clone();
        copy.metadata.id = new_id.to_string();
        copy.metadata.filename = paths::rule_filename(new_id);
        copy.metadata.sync_status = SyncStatus::LocalOnly;
        Ok(copy)
    }
}

// ---------------------------------------------------------------------------
// RuleConflict
// ---------------------------------------------------------------------------

/// Both copies of a rule that changed on each side since the last sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConflict {
    pub id: String,
    pub local: Rule,
    pub server: Rule,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 of rule content.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{digest:x}")
}

pub fn validate_rule_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(RuleSyncError::InvalidRuleId(id.to_string()));
    }
    Ok(())
}

/// `typescript-style.md` → `typescript-style`.
pub fn id_from_filename(filename: &str) -> Result<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = name.strip_suffix(".md").unwrap_or(name);
    validate_rule_id(stem)?;
    Ok(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn from_file_derives_id_and_metadata() {
        let content = "---\ndescription: Style\nglobs: \"*.ts\"\n---\n# TS\nSee @src/main.ts\n";
        let rule = Rule::from_file("typescript-style.md", content, ts()).unwrap();
        assert_eq!(rule.id(), "typescript-style");
        assert_eq!(rule.metadata.filename, "typescript-style.md");
        assert_eq!(rule.metadata.description.as_deref(), Some("Style"));
        assert_eq!(rule.metadata.file_patterns, vec!["*.ts"]);
        assert_eq!(rule.metadata.referenced_files, vec!["src/main.ts"]);
        assert_eq!(rule.metadata.sync_status, SyncStatus::LocalOnly);
    }

    #[test]
    fn set_content_recomputes_derived_fields() {
        let mut rule = Rule::from_file("r.md", "---\nglobs: \"*.rs\"\n---\nbody\n", ts()).unwrap();
        let later = ts() + chrono::Duration::minutes(5);
        rule.set_content("---\nglobs: [\"*.py\", \"*.pyi\"]\n---\nbody\n", later)
            .unwrap();
        assert_eq!(rule.metadata.file_patterns, vec!["*.py", "*.pyi"]);
        assert_eq!(rule.metadata.last_modified, later);
    }

    #[test]
    fn set_content_keeps_rule_on_parse_error() {
        let mut rule = Rule::from_file("r.md", "# Title\n", ts()).unwrap();
        let err = rule.set_content("", ts()).unwrap_err();
        assert!(matches!(err, RuleSyncError::Validation { ref id, .. } if id == "r"));
        assert_eq!(rule.content, "# Title\n");
    }

    #[test]
    fn wire_shape_is_flat_camel_case() {
        let rule = Rule::from_file("a.md", "# A\n", ts()).unwrap();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["filename"], "a.md");
        assert_eq!(json["syncStatus"], "local-only");
        assert!(json["filePatterns"].is_array());
        assert_eq!(json["content"], "# A\n");
        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn rule_ids_are_restricted() {
        assert!(validate_rule_id("ok-id_1.v2").is_ok());
        assert!(validate_rule_id("").is_err());
        assert!(validate_rule_id("../etc").is_err());
        assert!(validate_rule_id("has space").is_err());
        assert!(validate_rule_id(".hidden").is_err());
    }

    #[test]
    fn from_file_drops_directory_parts_of_the_name() {
        let rule = Rule::from_file("../../escape.md", "# E\n", ts()).unwrap();
        assert_eq!(rule.id(), "escape");
        assert_eq!(rule.metadata.filename, "escape.md");
    }

    #[test]
    fn validate_rejects_file_name_not_matching_id() {
        let traversal = Rule::new("evil", "../../escaped.md", "# E\n", ts()).unwrap();
        let err = traversal.validate().unwrap_err();
        assert!(matches!(err, RuleSyncError::Validation { ref id, .. } if id == "evil"));

        let renamed = Rule::new("a", "b.md", "# A\n", ts()).unwrap();
        assert!(renamed.validate().is_err());
        assert!(Rule::new("a", "a.md", "# A\n", ts()).unwrap().validate().is_ok());
    }

    #[test]
    fn id_from_filename_strips_dirs_and_extension() {
        assert_eq!(id_from_filename("rules/python.md").unwrap(), "python");
        assert_eq!(id_from_filename("plain").unwrap(), "plain");
    }

    #[test]
    fn validate_flags_stale_metadata() {
        let mut rule = Rule::from_file("a.md", "---\nglobs: \"*.go\"\n---\n", ts()).unwrap();
        assert!(rule.validate().is_ok());
        rule.metadata.file_patterns.clear();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
