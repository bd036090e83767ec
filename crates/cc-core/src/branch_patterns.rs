use regex::Regex;

/// Allow-list match for analysis branches. An empty list allows everything.
/// Entries prefixed with `re:` are regular expressions; anything else is a
/// glob where `*` stays within one path segment and `**` crosses segments.
pub fn branch_matches(branch: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|pattern| pattern_matches(branch, pattern))
}

fn pattern_matches(branch: &str, pattern: &str) -> bool {
    let source = match pattern.strip_prefix("re:") {
        Some(raw) => format!("^(?:{raw})$"),
        None => glob_to_regex(pattern),
    };
    match Regex::new(&source) {
        Ok(regex) => regex.is_match(branch),
        Err(err) => {
            tracing::debug!(pattern, error = %err, "ignoring invalid branch pattern");
            false
        }
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_empty_allows_all() {
        assert!(branch_matches("anything/at/all", &[]));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let allow = patterns(&["release/*"]);
        assert!(branch_matches("release/1.2", &allow));
        assert!(!branch_matches("release/1.2/hotfix", &allow));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let allow = patterns(&["feature/**"]);
        assert!(branch_matches("feature/a/b", &allow));
        assert!(!branch_matches("bugfix/a", &allow));
    }

    #[test]
    fn test_regex_entries() {
        let allow = patterns(&["main", "re:hotfix-\\d+"]);
        assert!(branch_matches("main", &allow));
        assert!(branch_matches("hotfix-42", &allow));
        assert!(!branch_matches("hotfix-x", &allow));
        assert!(!branch_matches("mainline", &allow));
    }

    #[test]
    fn test_dots_are_literal() {
        assert!(!branch_matches("v1x0", &patterns(&["v1.0"])));
    }
}
