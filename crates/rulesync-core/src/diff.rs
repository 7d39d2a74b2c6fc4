//! Line diff between the local and server copies of a conflicting rule.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "line", rename_all = "lowercase")]
pub enum DiffLine {
    Same(String),
    /// Only in the local copy.
    Local(String),
    /// Only in the server copy.
    Server(String),
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffLine::Same(l) => write!(f, "  {l}"),
            DiffLine::Local(l) => write!(f, "- {l}"),
            DiffLine::Server(l) => write!(f, "+ {l}"),
        }
    }
}

/// Longest-common-subsequence diff over lines. Rules are small documents,
/// so the quadratic table is fine.
pub fn line_diff(local: &str, server: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = local.lines().collect();
    let b: Vec<&str> = server.lines().collect();
    let (n, m) = (a.len(), b.len());

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push(DiffLine::Same(a[i].to_string()));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(DiffLine::Local(a[i].to_string()));
            i += 1;
        } else {
            out.push(DiffLine::Server(b[j].to_string()));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|l| DiffLine::Local(l.to_string())));
    out.extend(b[j..].iter().map(|l| DiffLine::Server(l.to_string())));
    out
}

/// Render a diff with `-`/`+` markers, one line each.
pub fn render(diff: &[DiffLine]) -> String {
    let mut s = String::new();
    for line in diff {
        s.push_str(&line.to_string());
        s.push('\n');
    }
    s
}
