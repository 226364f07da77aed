//! Command line parsing and representation.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors building a [`CommandSpec`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandLineError {
    /// The command line contained no program.
    #[error("command line can not be empty")]
    Empty,

    /// A quote was opened and never closed.
    #[error("unbalanced quotes in '{0}'")]
    UnbalancedQuotes(String),

    /// A zero timeout would kill every command before it starts.
    #[error("command timeout must be greater than zero")]
    ZeroTimeout,
}

/// Exit codes that count as normal completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCodes {
    /// Only the listed codes are normal.
    Only(Vec<i32>),
    /// Every exit code is reported back to the caller.
    Any,
}

impl ExitCodes {
    /// Check whether `code` counts as normal completion.
    pub fn accepts(&self, code: i32) -> bool {
        match self {
            Self::Only(codes) => codes.contains(&code),
            Self::Any => true,
        }
    }
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self::Only(vec![0])
    }
}

/// An external command with its wall-clock bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (looked up on `PATH` when not absolute).
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Maximum execution time. Always non-zero.
    pub timeout: Duration,
    /// Exit codes treated as success.
    pub exit_codes: ExitCodes,
    /// The command text as configured, used in diagnostics.
    command_line: String,
}

impl CommandSpec {
    /// Parse a shell-style command line.
    ///
    /// Arguments are split on whitespace. Single or double quotes group
    /// text containing whitespace; quotes are removed and no escapes are
    /// interpreted. No shell is involved, so pipes and redirects are passed
    /// through as literal arguments (wrap them in `sh -c '...'` instead).
    pub fn parse(command_line: &str, timeout: Duration) -> Result<Self, CommandLineError> {
        if timeout.is_zero() {
            return Err(CommandLineError::ZeroTimeout);
        }

        let mut tokens = split_command_line(command_line)?.into_iter();
        let program = tokens.next().ok_or(CommandLineError::Empty)?;

        Ok(Self {
            program,
            args: tokens.collect(),
            timeout,
            exit_codes: ExitCodes::default(),
            command_line: command_line.trim().to_string(),
        })
    }

    /// Build a command from an already split program and arguments.
    pub fn new<I, S>(
        program: impl Into<String>,
        args: I,
        timeout: Duration,
    ) -> Result<Self, CommandLineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if timeout.is_zero() {
            return Err(CommandLineError::ZeroTimeout);
        }

        let program = program.into();
        if program.is_empty() {
            return Err(CommandLineError::Empty);
        }

        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let command_line = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Self {
            program,
            args,
            timeout,
            exit_codes: ExitCodes::default(),
            command_line,
        })
    }

    /// Replace the set of exit codes treated as success.
    pub fn success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.exit_codes = ExitCodes::Only(codes.into_iter().collect());
        self
    }

    /// Report every exit code back instead of failing on non-zero.
    pub fn accept_any_exit_code(mut self) -> Self {
        self.exit_codes = ExitCodes::Any;
        self
    }

    /// The command text as configured.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line)
    }
}

/// Split a command line into words, honoring single and double quotes.
pub fn split_command_line(line: &str) -> Result<Vec<String>, CommandLineError> {
    #[derive(PartialEq)]
    enum State {
        Normal,
        InSingle,
        InDouble,
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut state = State::Normal;

    for c in line.chars() {
        match state {
            State::InSingle if c == '\'' => state = State::Normal,
            State::InDouble if c == '"' => state = State::Normal,
            State::InSingle | State::InDouble => current.push(c),
            State::Normal => match c {
                '\'' => {
                    state = State::InSingle;
                    quoted = true;
                }
                '"' => {
                    state = State::InDouble;
                    quoted = true;
                }
                c if c.is_whitespace() => {
                    if quoted || !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                        quoted = false;
                    }
                }
                c => current.push(c),
            },
        }
    }

    if state != State::Normal {
        return Err(CommandLineError::UnbalancedQuotes(line.to_string()));
    }
    if quoted || !current.is_empty() {
        tokens.push(current);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_parse_simple() {
        let spec = CommandSpec::parse("nginx -s reload", TIMEOUT).unwrap();
        assert_eq!(spec.program, "nginx");
        assert_eq!(spec.args, vec!["-s", "reload"]);
        assert_eq!(spec.command_line(), "nginx -s reload");
        assert_eq!(spec.timeout, TIMEOUT);
        assert_eq!(spec.exit_codes, ExitCodes::Only(vec![0]));
    }

    #[test]
    fn test_parse_quoted_arguments() {
        let spec = CommandSpec::parse(
            r#"sh -c 'haproxy -c -f /etc/haproxy/haproxy.cfg' "two words""#,
            TIMEOUT,
        )
        .unwrap();
        assert_eq!(spec.program, "sh");
        assert_eq!(
            spec.args,
            vec!["-c", "haproxy -c -f /etc/haproxy/haproxy.cfg", "two words"]
        );
    }

    #[test]
    fn test_parse_collapses_whitespace() {
        let tokens = split_command_line("  nginx\t -t  \n").unwrap();
        assert_eq!(tokens, vec!["nginx", "-t"]);
    }

    #[test]
    fn test_parse_adjacent_quotes_join() {
        let tokens = split_command_line(r#"echo pre"fix 1"'s'"#).unwrap();
        assert_eq!(tokens, vec!["echo", "prefix 1s"]);
    }

    #[test]
    fn test_parse_empty_quotes_keep_argument() {
        let tokens = split_command_line(r#"printf "" x"#).unwrap();
        assert_eq!(tokens, vec!["printf", "", "x"]);
    }

    #[test]
    fn test_parse_other_quote_is_literal() {
        let tokens = split_command_line(r#"echo "it's""#).unwrap();
        assert_eq!(tokens, vec!["echo", "it's"]);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(
            CommandSpec::parse("   ", TIMEOUT),
            Err(CommandLineError::Empty)
        );
    }

    #[test]
    fn test_parse_unbalanced() {
        let result = CommandSpec::parse("sh -c 'echo hi", TIMEOUT);
        assert!(matches!(result, Err(CommandLineError::UnbalancedQuotes(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert_eq!(
            CommandSpec::parse("true", Duration::ZERO),
            Err(CommandLineError::ZeroTimeout)
        );
        assert_eq!(
            CommandSpec::new("true", Vec::<String>::new(), Duration::ZERO),
            Err(CommandLineError::ZeroTimeout)
        );
    }

    #[test]
    fn test_new_builds_command_line() {
        let spec = CommandSpec::new("nginx", ["-s", "reload"], TIMEOUT).unwrap();
        assert_eq!(spec.command_line(), "nginx -s reload");
        assert_eq!(spec.to_string(), "nginx -s reload");
        assert_eq!(spec, CommandSpec::parse("nginx -s reload", TIMEOUT).unwrap());
    }

    #[test]
    fn test_exit_code_policy() {
        let spec = CommandSpec::parse("grep -q x f", TIMEOUT)
            .unwrap()
            .success_codes([0, 1]);
        assert!(spec.exit_codes.accepts(1));
        assert!(!spec.exit_codes.accepts(2));

        let spec = spec.accept_any_exit_code();
        assert!(spec.exit_codes.accepts(2));
        assert!(spec.exit_codes.accepts(-1));
    }
}
