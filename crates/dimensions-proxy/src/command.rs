//! Chat-line command parsing.

/// Marker character used when none is configured.
pub const DEFAULT_MARKER: char = '/';

/// A parsed command line.
///
/// `name` is the first token with the marker stripped, lower-cased. `args`
/// holds every whitespace-separated token of the raw line, so `args[0]` still
/// carries the marker and the original casing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    /// Whether `raw` starts with `marker` and is worth parsing.
    pub fn is_command(raw: &str, marker: char) -> bool {
        raw.starts_with(marker)
    }
}

/// Parse a raw chat line.
///
/// Returns `None` for empty lines, lines that do not begin with `marker`,
/// and a bare marker with no name.
pub fn parse_command(raw: &str, marker: char) -> Option<Command> {
    let rest = raw.strip_prefix(marker)?;
    let name = rest.split(char::is_whitespace).next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }

    Some(Command {
        name: name.to_lowercase(),
        args: raw.split_whitespace().map(str::to_string).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_command() {
        let cmd = parse_command("/who", '/').unwrap();
        assert_eq!(cmd.name, "who");
        assert_eq!(cmd.args, vec!["/who"]);
    }

    #[test]
    fn test_name_lowercased_but_first_arg_kept_verbatim() {
        let cmd = parse_command("/Dimensions extra", '/').unwrap();
        assert_eq!(
            cmd,
            Command {
                name: "dimensions".into(),
                args: vec!["/Dimensions".into(), "extra".into()],
            }
        );
    }

    #[test]
    fn test_repeated_whitespace_collapses_in_args() {
        let cmd = parse_command("/void  now\tplease", '/').unwrap();
        assert_eq!(cmd.name, "void");
        assert_eq!(cmd.args, vec!["/void", "now", "please"]);
    }

    #[test]
    fn test_empty_and_markerless_lines_are_not_commands() {
        assert_eq!(parse_command("", '/'), None);
        assert_eq!(parse_command("who", '/'), None);
        assert_eq!(parse_command(" /who", '/'), None);
        assert_eq!(parse_command("/", '/'), None);
        assert_eq!(parse_command("/ who", '/'), None);
        assert!(!Command::is_command("hello there", '/'));
    }

    #[test]
    fn test_custom_marker() {
        let cmd = parse_command("!Lobby", '!').unwrap();
        assert_eq!(cmd.name, "lobby");
        assert_eq!(cmd.args, vec!["!Lobby"]);
        assert_eq!(parse_command("/lobby", '!'), None);
    }

    #[test]
    fn test_non_ascii_marker() {
        let cmd = parse_command("§who", '§').unwrap();
        assert_eq!(cmd.name, "who");
    }
}
