use crate::types::CommandKind;

const PREFIX: &str = "/codecrow";

/// Parses the first `/codecrow <command> [args]` line of a comment body.
pub fn parse_directive(body: &str) -> Option<(CommandKind, Option<String>)> {
    body.lines().find_map(|line| {
        let rest = line.trim().strip_prefix(PREFIX)?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let rest = rest.trim();
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, Some(args.trim().to_string())),
            None => (rest, None),
        };
        let command = match name.to_ascii_lowercase().as_str() {
            "analyze" => CommandKind::Analyze,
            "summarize" => CommandKind::Summarize,
            "review" => CommandKind::Review,
            "ask" => CommandKind::Ask,
            _ => return None,
        };
        Some((command, args.filter(|value| !value.is_empty())))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_command() {
        assert_eq!(parse_directive("/codecrow analyze"), Some((CommandKind::Analyze, None)));
    }

    #[test]
    fn test_parse_with_args_on_later_line() {
        let body = "thanks!\n  /codecrow ask   why is this unsafe?  ";
        assert_eq!(
            parse_directive(body),
            Some((CommandKind::Ask, Some("why is this unsafe?".to_string())))
        );
    }

    #[test]
    fn test_unknown_command_ignored() {
        assert_eq!(parse_directive("/codecrow deploy"), None);
        assert_eq!(parse_directive("/codecrowanalyze"), None);
        assert_eq!(parse_directive("please /codecrow analyze"), None);
    }
}
