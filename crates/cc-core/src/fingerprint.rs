//! Content-addressed diff fingerprints.
//!
//! Each changed line is keyed by the file it belongs to and kept in diff
//! order. Hunk offsets, index lines, context lines and trailing whitespace
//! are dropped, so the same change proposed from another PR, or rebased onto
//! a moved base, hashes identically.

use sha2::{Digest, Sha256};

fn header_path(rest: &str) -> Option<String> {
    let path = rest.trim().split('\t').next().unwrap_or_default();
    if path.is_empty() || path == "/dev/null" {
        return None;
    }
    Some(
        path.strip_prefix("a/")
            .or_else(|| path.strip_prefix("b/"))
            .unwrap_or(path)
            .to_string(),
    )
}

/// Old and new side line counts from a `@@ -l,s +l,s @@` header. A count
/// that cannot be read keeps the hunk open until the next file header.
fn hunk_span(header: &str) -> (u64, u64) {
    let mut ranges = header
        .trim_start_matches('@')
        .split_whitespace()
        .take(2)
        .map(|range| {
            let range = range.trim_start_matches(['-', '+']);
            match range.split_once(',') {
                Some((_, len)) => len.parse().unwrap_or(u64::MAX),
                None if range.parse::<u64>().is_ok() => 1,
                None => u64::MAX,
            }
        });
    (
        ranges.next().unwrap_or(u64::MAX),
        ranges.next().unwrap_or(u64::MAX),
    )
}

/// Changed lines as `path\0line`, in the order the diff lists them.
pub fn normalize_diff(diff: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut path = String::new();
    let mut remaining: Option<(u64, u64)> = None;
    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            remaining = None;
            if let Some((_, new)) = rest.rsplit_once(" b/") {
                path = new.to_string();
            }
            continue;
        }
        let Some((old, new)) = remaining.as_mut() else {
            if line.starts_with("@@") {
                remaining = Some(hunk_span(line));
            } else if let Some(rest) = line.strip_prefix("+++ ") {
                if let Some(new) = header_path(rest) {
                    path = new;
                }
            } else if let Some(rest) = line.strip_prefix("--- ")
                && let Some(old) = header_path(rest)
            {
                path = old;
            }
            continue;
        };
        match line.chars().next() {
            Some('+') => *new = new.saturating_sub(1),
            Some('-') => *old = old.saturating_sub(1),
            Some('\\') => continue,
            Some('@') if line.starts_with("@@") => {
                remaining = Some(hunk_span(line));
                continue;
            }
            _ => {
                *old = old.saturating_sub(1);
                *new = new.saturating_sub(1);
            }
        }
        if *old == 0 && *new == 0 {
            remaining = None;
        }
        if !(line.starts_with('+') || line.starts_with('-')) {
            continue;
        }
        let line = line.trim_end();
        if line.len() > 1 {
            lines.push(format!("{path}\0{line}"));
        }
    }
    lines
}

/// SHA-256 over the normalized change set; `None` when the diff carries no
/// changed lines.
pub fn fingerprint(diff: &str) -> Option<String> {
    let lines = normalize_diff(diff);
    if lines.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Some(hex::encode(hasher.finalize()))
}

/// Paths touched by a unified diff, in first-seen order.
pub fn changed_paths(diff: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in diff.lines() {
        let Some(rest) = line.strip_prefix("+++ ").or_else(|| line.strip_prefix("--- ")) else {
            continue;
        };
        let path = rest
            .trim()
            .trim_start_matches("a/")
            .trim_start_matches("b/")
            .to_string();
        if path == "/dev/null" || path.is_empty() {
            continue;
        }
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF_A: &str = "diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -10,3 +10,4 @@ fn main() {
 let a = 1;
-let b = 2;
+let b = 3;
+let c = 4;   
";

    const DIFF_A_MOVED: &str = "diff --git a/src/lib.rs b/src/lib.rs
index 3333333..4444444 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -42,3 +42,4 @@ fn other() {
 let z = 0;
-let b = 2;
+let b = 3;
+let c = 4;
";

    #[test]
    fn test_fingerprint_ignores_offsets_and_context() {
        assert_eq!(fingerprint(DIFF_A), fingerprint(DIFF_A_MOVED));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let changed = DIFF_A.replace("let c = 4;", "let c = 5;");
        assert_ne!(fingerprint(DIFF_A), fingerprint(&changed));
    }

    #[test]
    fn test_fingerprint_keeps_file_paths() {
        let body = "@@ -1 +1,2 @@\n+unsafe { free(p) };\n+drop_guard();\n";
        let auth = format!("--- a/src/auth.rs\n+++ b/src/auth.rs\n{body}");
        let other = format!("--- a/src/other.rs\n+++ b/src/other.rs\n{body}");
        assert_ne!(fingerprint(&auth), fingerprint(&other));
    }

    #[test]
    fn test_fingerprint_keeps_line_order() {
        let forward = "--- a/src/auth.rs\n+++ b/src/auth.rs\n@@ -1 +1,2 @@\n+unsafe { free(p) };\n+drop_guard();\n";
        let reversed = "--- a/src/auth.rs\n+++ b/src/auth.rs\n@@ -1 +1,2 @@\n+drop_guard();\n+unsafe { free(p) };\n";
        assert_ne!(fingerprint(forward), fingerprint(reversed));
    }

    #[test]
    fn test_deleted_file_keyed_by_old_path() {
        let diff = "diff --git a/src/gone.rs b/src/gone.rs\ndeleted file mode 100644\n--- a/src/gone.rs\n+++ /dev/null\n@@ -1 +0,0 @@\n-fn gone() {}\n";
        assert_eq!(normalize_diff(diff), vec!["src/gone.rs\0-fn gone() {}"]);
    }

    #[test]
    fn test_changed_line_resembling_header_is_kept() {
        let diff = "--- a/x.md\n+++ b/x.md\n@@ -1 +1 @@\n--- old rule\n+++ new rule\n";
        assert_eq!(
            normalize_diff(diff),
            vec!["x.md\0--- old rule", "x.md\0+++ new rule"]
        );
    }

    #[test]
    fn test_bare_multi_file_diff_switches_path() {
        let diff = "--- a/a.rs\n+++ b/a.rs\n@@ -1 +1 @@\n-x\n+y\n--- a/b.rs\n+++ b/b.rs\n@@ -3,2 +3,2 @@\n ctx\n-x\n+y\n";
        assert_eq!(
            normalize_diff(diff),
            vec!["a.rs\0-x", "a.rs\0+y", "b.rs\0-x", "b.rs\0+y"]
        );
    }

    #[test]
    fn test_empty_diff_has_no_fingerprint() {
        assert_eq!(fingerprint(""), None);
        assert_eq!(fingerprint("--- a/x\n+++ b/x\n"), None);
    }

    #[test]
    fn test_changed_paths() {
        let diff = "--- a/src/a.rs\n+++ b/src/a.rs\n--- /dev/null\n+++ b/src/new.rs\n";
        assert_eq!(changed_paths(diff), vec!["src/a.rs", "src/new.rs"]);
    }
}
