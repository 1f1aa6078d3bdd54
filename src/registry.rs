//! Command registry: the table of callbacks a [`crate::server::Server`]
//! dispatches against, and the substring-prefix lookup rules used both for
//! command-line dispatch and TAB completion.

use crate::args::is_sub_string;
use crate::sink::OutputSink;
use anyhow::Result;
use std::fmt;

/// Signature every registered command callback implements. `args` is the
/// whitespace-tokenized argument list (command name already stripped);
/// `sink` is where the callback's `printf`/`march`/`wheel` output goes for
/// the duration of this one dispatch (see [`crate::sink::OutputSink`]) —
/// passed explicitly rather than reached for ambiently, per the design
/// notes' preference for an explicit writer handle over task-local state.
pub type CommandFn = Box<dyn Fn(&[String], &OutputSink) -> Result<()> + Send + Sync>;

/// One entry in the registry.
pub struct Command {
    pub name: String,
    pub usage: String,
    pub description: String,
    pub min_args: usize,
    pub max_args: usize,
    pub show_usage: bool,
    callback: CommandFn,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("description", &self.description)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish()
    }
}

/// Outcome of attempting to register a command; registration failures are
/// non-fatal, the caller is expected to log and move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    EmptyName,
    EmptyDescription,
    EmptyUsage,
    WhitespaceInName(String),
    MinGreaterThanMax { min: usize, max: usize },
    Duplicate(String),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::EmptyName => write!(f, "command name cannot be empty"),
            RegisterError::EmptyDescription => write!(f, "command description cannot be empty"),
            RegisterError::EmptyUsage => write!(f, "command usage cannot be empty"),
            RegisterError::WhitespaceInName(name) => {
                write!(f, "command name '{name}' cannot contain whitespace")
            }
            RegisterError::MinGreaterThanMax { min, max } => {
                write!(f, "minArgs ({min}) cannot be greater than maxArgs ({max})")
            }
            RegisterError::Duplicate(name) => write!(f, "command '{name}' is already registered"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Outcome of looking up a typed token against the registry.
pub enum Lookup<'a> {
    NotFound,
    Ambiguous(Vec<&'a Command>),
    Found(&'a Command),
}

/// Result of validating an argument count against a command's declared
/// min/max.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCountResult {
    Valid,
    Invalid,
}

#[derive(Default)]
pub struct Registry {
    commands: Vec<Command>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { commands: Vec::new() }
    }

    /// Registers a command, appending it after existing entries unless
    /// `prepend` is set (used for the built-in `batch`/`history`/`help`/
    /// `quit` commands, which must sort first).
    pub fn add_command(
        &mut self,
        name: &str,
        usage: &str,
        description: &str,
        min_args: usize,
        max_args: usize,
        show_usage: bool,
        callback: CommandFn,
        prepend: bool,
    ) -> Result<(), RegisterError> {
        if name.is_empty() {
            return Err(RegisterError::EmptyName);
        }
        if description.is_empty() {
            return Err(RegisterError::EmptyDescription);
        }
        if usage.is_empty() && max_args > 0 {
            return Err(RegisterError::EmptyUsage);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(RegisterError::WhitespaceInName(name.to_string()));
        }
        if min_args > max_args {
            return Err(RegisterError::MinGreaterThanMax {
                min: min_args,
                max: max_args,
            });
        }
        if self.commands.iter().any(|c| c.name == name) {
            return Err(RegisterError::Duplicate(name.to_string()));
        }
        let command = Command {
            name: name.to_string(),
            usage: usage.to_string(),
            description: description.to_string(),
            min_args,
            max_args,
            show_usage,
            callback,
        };
        if prepend {
            self.commands.insert(0, command);
        } else {
            self.commands.push(command);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Looks up `typed` against every registered command name using
    /// substring-prefix matching (see [`is_sub_string`]); an exact match
    /// always wins outright even if a shorter abbreviation would also have
    /// matched another, longer command name.
    pub fn lookup(&self, typed: &str) -> Lookup<'_> {
        if let Some(exact) = self.commands.iter().find(|c| c.name == typed) {
            return Lookup::Found(exact);
        }
        let matches: Vec<&Command> = self
            .commands
            .iter()
            .filter(|c| is_sub_string(typed, &c.name, 0))
            .collect();
        match matches.len() {
            0 => Lookup::NotFound,
            1 => Lookup::Found(matches[0]),
            _ => Lookup::Ambiguous(matches),
        }
    }

    /// Invokes `command`'s callback with `args` after validating the
    /// argument count.
    pub fn dispatch(&self, command: &Command, args: &[String], sink: &OutputSink) -> Result<ArgCountResult> {
        if self.check_arg_count(command, args.len()) == ArgCountResult::Invalid {
            return Ok(ArgCountResult::Invalid);
        }
        (command.callback)(args, sink)?;
        Ok(ArgCountResult::Valid)
    }

    pub fn check_arg_count(&self, command: &Command, count: usize) -> ArgCountResult {
        if count < command.min_args || count > command.max_args {
            ArgCountResult::Invalid
        } else {
            ArgCountResult::Valid
        }
    }
}

/// True if `token` is one of PSHELL's recognized help tokens (`?`, `-h`,
/// `--h`, `-help`, `--help`), matching `isHelp()` from the upstream source.
pub fn is_help(token: &str) -> bool {
    matches!(token, "?" | "-h" | "--h" | "-help" | "--help")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> CommandFn {
        Box::new(|_args, _sink| Ok(()))
    }

    #[test]
    fn rejects_bad_registrations() {
        let mut reg = Registry::new();
        assert_eq!(
            reg.add_command("", "u", "d", 0, 0, true, noop(), false),
            Err(RegisterError::EmptyName)
        );
        assert_eq!(
            reg.add_command("a b", "u", "d", 0, 0, true, noop(), false),
            Err(RegisterError::WhitespaceInName("a b".to_string()))
        );
        assert_eq!(
            reg.add_command("cmd", "u", "d", 3, 1, true, noop(), false),
            Err(RegisterError::MinGreaterThanMax { min: 3, max: 1 })
        );
    }

    #[test]
    fn rejects_duplicates() {
        let mut reg = Registry::new();
        reg.add_command("status", "status", "show status", 0, 0, true, noop(), false)
            .unwrap();
        assert_eq!(
            reg.add_command("status", "status", "again", 0, 0, true, noop(), false),
            Err(RegisterError::Duplicate("status".to_string()))
        );
    }

    #[test]
    fn lookup_is_monotonic_and_disambiguates_exact_matches() {
        let mut reg = Registry::new();
        reg.add_command("set", "set", "set a value", 0, 2, true, noop(), false)
            .unwrap();
        reg.add_command("setVerbose", "setVerbose", "toggle verbosity", 0, 1, true, noop(), false)
            .unwrap();

        assert!(matches!(reg.lookup("set"), Lookup::Found(c) if c.name == "set"));
        assert!(matches!(reg.lookup("setV"), Lookup::Found(c) if c.name == "setVerbose"));
        assert!(matches!(reg.lookup("nope"), Lookup::NotFound));
    }

    #[test]
    fn lookup_reports_ambiguity() {
        let mut reg = Registry::new();
        reg.add_command("start", "start", "start", 0, 0, true, noop(), false)
            .unwrap();
        reg.add_command("stop", "stop", "stop", 0, 0, true, noop(), false)
            .unwrap();
        reg.add_command("status", "status", "status", 0, 0, true, noop(), false)
            .unwrap();
        match reg.lookup("st") {
            Lookup::Ambiguous(matches) => assert_eq!(matches.len(), 3),
            _ => panic!("expected ambiguous lookup"),
        }
    }

    #[test]
    fn arg_count_validation() {
        let mut reg = Registry::new();
        reg.add_command("echo", "echo <word>", "echo a word", 1, 1, true, noop(), false)
            .unwrap();
        let cmd = match reg.lookup("echo") {
            Lookup::Found(c) => c,
            _ => panic!("expected found"),
        };
        assert_eq!(reg.check_arg_count(cmd, 0), ArgCountResult::Invalid);
        assert_eq!(reg.check_arg_count(cmd, 1), ArgCountResult::Valid);
        assert_eq!(reg.check_arg_count(cmd, 2), ArgCountResult::Invalid);
    }

    #[test]
    fn prepend_puts_builtins_first() {
        let mut reg = Registry::new();
        reg.add_command("user", "user", "user cmd", 0, 0, true, noop(), false)
            .unwrap();
        reg.add_command("help", "help", "show help", 0, 1, true, noop(), true)
            .unwrap();
        assert_eq!(reg.iter().next().unwrap().name, "help");
    }

    #[test]
    fn help_tokens() {
        assert!(is_help("?"));
        assert!(is_help("-h"));
        assert!(is_help("--h"));
        assert!(is_help("-help"));
        assert!(is_help("--help"));
        assert!(!is_help("help"));
        assert!(!is_help("hel"));
    }
}
