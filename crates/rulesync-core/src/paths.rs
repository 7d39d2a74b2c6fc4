use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const RULESYNC_DIR: &str = ".rulesync";
pub const CONFIG_FILE: &str = ".rulesync/config.yaml";
pub const PENDING_DELETIONS_FILE: &str = ".rulesync/pending_deletions.yaml";
pub const MANIFEST_FILE: &str = ".rulesync/manifest.yaml";

pub const DEFAULT_RULES_DIR: &str = ".rules";
pub const RULE_EXTENSION: &str = "md";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn rulesync_dir(root: &Path) -> PathBuf {
    root.join(RULESYNC_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn pending_deletions_path(root: &Path) -> PathBuf {
    root.join(PENDING_DELETIONS_FILE)
}

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

pub fn rules_dir(root: &Path, rules_dir: &str) -> PathBuf {
    root.join(rules_dir)
}

/// File name a rule is stored under. Derived from the id alone, so a rule
/// file always lands directly inside the rules directory.
pub fn rule_filename(id: &str) -> String {
    format!("{id}.{RULE_EXTENSION}")
}

pub fn rule_path(root: &Path, rules_dir: &str, id: &str) -> PathBuf {
    self::rules_dir(root, rules_dir).join(rule_filename(id))
}
