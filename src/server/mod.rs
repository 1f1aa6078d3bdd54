//! Server: the dispatcher a host process builds up with [`Server::add_command`]
//! calls and then runs over one of four transports (UDP, TCP, UNIX, or
//! LOCAL — in-process with no socket at all).
//!
//! `mod.rs` holds everything transport-independent: the registry, the
//! command-line dispatch algorithm (`process_line`, a direct port of
//! `_processCommand`), the built-in commands, and the bind-retry/lockfile
//! dance shared by the socket transports. Each transport submodule
//! (`udp`, `tcp`, `unix`, `local`) only supplies the accept/read/write loop
//! around that shared core.

pub mod local;
pub mod tcp;
pub mod udp;
pub mod unix;

use crate::args::tokenize;
use crate::config::{load_server_config, load_startup_file, ServerConfigOverrides};
use crate::message::{Message, MsgType, DEFAULT_PAYLOAD_SIZE};
use crate::registry::{is_help, ArgCountResult, Command, CommandFn, Lookup, RegisterError, Registry};
use crate::sink::OutputSink;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, warn};

/// How a server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Udp,
    Tcp,
    Unix,
    /// In-process only: no socket, the host calls [`Server::run_command`]
    /// directly, but the line editor/dispatch path is identical.
    Local,
}

/// Blocking/non-blocking dispatch mode, matching `BLOCKING`/`NON_BLOCKING`.
/// A `NonBlocking` server's transport loop hands each accepted command off
/// to a worker task instead of running it inline — see §5 of the design:
/// this crate is single-threaded-cooperative per server by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Blocking,
    NonBlocking,
}

/// How the first command-line argument is interpreted — plain dispatch, or
/// "aggregator" mode where the first argument selects a sub-server name
/// and the rest of the line is forwarded to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstArgPos {
    Normal,
    Aggregator,
}

const HISTORY_CAPACITY: usize = 64;

/// The dispatcher. Build one with [`Server::new`], register commands with
/// [`Server::add_command`], then hand it to the transport loop matching its
/// [`ServerType`] (see [`udp::run`], [`tcp::run`], [`unix::run`],
/// [`local::run`]).
pub struct Server {
    pub name: String,
    pub server_type: ServerType,
    pub dispatch_mode: DispatchMode,
    registry: Registry,
    title: String,
    banner: Option<String>,
    prompt: String,
    idle_timeout_secs: Option<u64>,
    first_arg_pos: FirstArgPos,
    payload_size: usize,
    history: Mutex<VecDeque<String>>,
    command_dispatched: Mutex<bool>,
}

impl Server {
    pub fn new(name: impl Into<String>, server_type: ServerType) -> Self {
        let name = name.into();
        let mut server = Server {
            title: name.clone(),
            name,
            server_type,
            dispatch_mode: DispatchMode::Blocking,
            registry: Registry::new(),
            banner: None,
            prompt: "PSHELL> ".to_string(),
            idle_timeout_secs: None,
            first_arg_pos: FirstArgPos::Normal,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            command_dispatched: Mutex::new(false),
        };
        server.add_native_commands();
        server
    }

    /// Applies `PSHELL_CONFIG_DIR`/`/etc/pshell`-resolved overrides for
    /// this server's name, logging (not failing) if none are found or the
    /// file can't be read.
    pub fn apply_config_file(&mut self) {
        match load_server_config(&self.name) {
            Ok(Some(overrides)) => self.apply_overrides(overrides),
            Ok(None) => {}
            Err(e) => warn!("could not load config for server '{}': {e}", self.name),
        }
    }

    fn apply_overrides(&mut self, overrides: ServerConfigOverrides) {
        if let Some(title) = overrides.title {
            self.title = title;
        }
        if let Some(banner) = overrides.banner {
            self.banner = Some(banner);
        }
        if let Some(prompt) = overrides.prompt {
            self.prompt = prompt;
        }
        if let Some(timeout_minutes) = overrides.timeout {
            // The config file's `timeout` key is in minutes (spec §6); the
            // original converts with `ONE_MINUTE * _gIdleSessionTimeout`.
            self.idle_timeout_secs = timeout_minutes.map(|minutes| minutes * 60);
        }
        // host/port/type overrides are consumed by the transport-specific
        // bind call, not stored here; callers read `load_server_config`
        // directly when constructing the bind address.
    }

    pub fn set_first_arg_pos(&mut self, mode: FirstArgPos) {
        self.first_arg_pos = mode;
    }

    pub fn set_payload_size(&mut self, size: usize) {
        self.payload_size = size;
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        self.idle_timeout_secs.map(std::time::Duration::from_secs)
    }

    /// Registration is non-fatal on failure per the spec's error model:
    /// logs the problem and returns it without panicking, so a host that
    /// registers many commands at startup can keep going.
    pub fn add_command(
        &mut self,
        name: &str,
        usage: &str,
        description: &str,
        min_args: usize,
        max_args: usize,
        show_usage: bool,
        callback: CommandFn,
    ) -> Result<(), RegisterError> {
        let result = self
            .registry
            .add_command(name, usage, description, min_args, max_args, show_usage, callback, false);
        if let Err(e) = &result {
            error!("failed to register command '{name}': {e}");
        }
        result
    }

    fn add_native_commands(&mut self) {
        // batch/history/help/quit are only meaningful on an interactive
        // transport (TCP/LOCAL); UDP/UNIX servers still carry them so the
        // introspection queries see a consistent command set, but a
        // UDP/UNIX dispatch of `quit`/`help` is simply a no-op beyond
        // printing, since there's no persistent session to tear down.
        let _ = self.registry.add_command(
            "help",
            "help",
            "show a list of available commands",
            0,
            1,
            true,
            Box::new(|_args, _sink| Ok(())),
            true,
        );
        let _ = self.registry.add_command(
            "history",
            "history",
            "show a list of previously entered commands",
            0,
            0,
            false,
            Box::new(|_args, _sink| Ok(())),
            true,
        );
        let _ = self.registry.add_command(
            "batch",
            "batch {-show | -list | <index> | <filename>}",
            "run a batch file of commands",
            1,
            1,
            true,
            Box::new(|_args, _sink| Ok(())),
            true,
        );
        let _ = self.registry.add_command(
            "quit",
            "quit",
            "exit the interactive session",
            0,
            0,
            false,
            Box::new(|_args, _sink| Ok(())),
            true,
        );
    }

    /// Appends `command` to the ring buffer history, deduplicating against
    /// the immediately-previous entry (not the whole history) and evicting
    /// the oldest entry once capacity is reached.
    fn record_history(&self, command: &str) {
        if command.is_empty() {
            return;
        }
        let mut history = self.history.lock().unwrap();
        if history.back().map(String::as_str) == Some(command) {
            return;
        }
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(command.to_string());
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// Bare command names, in registration order — seeds a
    /// [`crate::line_editor::LineEditor`]'s TAB-completion keyword set for
    /// the interactive transports.
    pub(crate) fn command_names(&self) -> Vec<String> {
        self.registry.iter().map(|c| c.name.clone()).collect()
    }

    fn render_help(&self) -> String {
        let mut out = String::new();
        for command in self.registry.iter() {
            out.push_str(&format!("{:<20} - {}\n", command.usage, command.description));
        }
        out
    }

    fn render_history(&self) -> String {
        let mut out = String::new();
        for (i, command) in self.history().iter().enumerate() {
            out.push_str(&format!("{:4}  {}\n", i + 1, command));
        }
        out
    }

    /// Loads and runs this server's startup file (if any), in-process,
    /// before the transport loop starts accepting external input.
    pub fn run_startup_file(&self, sink: &OutputSink) {
        match load_startup_file(&self.name) {
            Ok(lines) => {
                for line in lines {
                    let _ = self.process_line(&line, sink, false);
                }
            }
            Err(e) => warn!("could not load startup file for '{}': {e}", self.name),
        }
    }

    /// The dispatch algorithm: tokenizes `line`, resolves the command by
    /// substring-prefix lookup (exact match always wins), validates the
    /// help token / argument count, and invokes the callback.
    ///
    /// Returns the `MsgType` a query/reply transport should report back,
    /// and whether the caller should tear the session down (`quit`).
    ///
    /// Guards against re-entrant dispatch: a command callback that itself
    /// tries to trigger another dispatch on the same server (instead of
    /// calling another command's logic directly) is rejected rather than
    /// recursing, mirroring `_gCommandDispatched` upstream.
    pub fn process_line(&self, line: &str, sink: &OutputSink, interactive: bool) -> DispatchOutcome {
        {
            let mut dispatched = self.command_dispatched.lock().unwrap();
            if *dispatched {
                warn!("command dispatch already in progress for server '{}'", self.name);
                return DispatchOutcome {
                    msg_type: MsgType::COMMAND_NOT_FOUND,
                    quit: false,
                };
            }
            *dispatched = true;
        }
        let outcome = self.process_line_inner(line, sink, interactive);
        *self.command_dispatched.lock().unwrap() = false;
        outcome
    }

    fn process_line_inner(&self, line: &str, sink: &OutputSink, interactive: bool) -> DispatchOutcome {
        let tokens = tokenize(line);
        if tokens.is_empty() {
            return DispatchOutcome {
                msg_type: MsgType::COMMAND_COMPLETE,
                quit: false,
            };
        }
        if interactive {
            self.record_history(line.trim());
        }

        let command_token = tokens[0].as_str();
        if is_help(command_token) {
            sink.printf(&self.render_help());
            return DispatchOutcome {
                msg_type: MsgType::COMMAND_COMPLETE,
                quit: false,
            };
        }

        match self.registry.lookup(command_token) {
            Lookup::NotFound => {
                sink.printf(&format!("PSHELL_ERROR: Command: '{command_token}' not found"));
                DispatchOutcome {
                    msg_type: MsgType::COMMAND_NOT_FOUND,
                    quit: false,
                }
            }
            Lookup::Ambiguous(matches) => {
                let names: Vec<&str> = matches.iter().map(|c| c.name.as_str()).collect();
                sink.printf(&format!(
                    "PSHELL_ERROR: Ambiguous command abbreviation: '{command_token}', matches: {}",
                    names.join(", ")
                ));
                DispatchOutcome {
                    msg_type: MsgType::COMMAND_NOT_FOUND,
                    quit: false,
                }
            }
            Lookup::Found(command) => {
                // Mode 1 (default) drops the leading command token from
                // argv; mode 0 (aggregator) passes the full line through
                // unchanged, since the aggregator's own callback needs the
                // original command name to forward the line to a child
                // server. Either way the help-token check below looks at
                // whatever landed in position 1 of the original line.
                let args: &[String] = match self.first_arg_pos {
                    FirstArgPos::Normal => &tokens[1..],
                    FirstArgPos::Aggregator => &tokens[..],
                };
                let help_pos = match self.first_arg_pos {
                    FirstArgPos::Normal => 0,
                    FirstArgPos::Aggregator => 1,
                };
                self.dispatch_found(command, args, help_pos, sink)
            }
        }
    }

    fn dispatch_found(&self, command: &Command, args: &[String], help_pos: usize, sink: &OutputSink) -> DispatchOutcome {
        if let Some(first) = args.get(help_pos) {
            if is_help(first) {
                sink.printf(&format!("usage: {}", command.usage));
                return DispatchOutcome {
                    msg_type: MsgType::COMMAND_COMPLETE,
                    quit: false,
                };
            }
        }

        match command.name.as_str() {
            "help" => sink.printf(&self.render_help()),
            "history" => sink.printf(&self.render_history()),
            "quit" => {
                return DispatchOutcome {
                    msg_type: MsgType::COMMAND_COMPLETE,
                    quit: true,
                }
            }
            "batch" => self.dispatch_batch(args, sink),
            _ => {
                if self.registry.check_arg_count(command, args.len()) == ArgCountResult::Invalid {
                    sink.printf(&format!(
                        "PSHELL_ERROR: invalid number of arguments for command '{}', usage: {}",
                        command.name, command.usage
                    ));
                    return DispatchOutcome {
                        msg_type: MsgType::COMMAND_INVALID_ARG_COUNT,
                        quit: false,
                    };
                }
                match self.registry.dispatch(command, args, sink) {
                    Ok(ArgCountResult::Valid) => {}
                    Ok(ArgCountResult::Invalid) => {
                        return DispatchOutcome {
                            msg_type: MsgType::COMMAND_INVALID_ARG_COUNT,
                            quit: false,
                        }
                    }
                    Err(e) => {
                        error!("command '{}' failed: {e}", command.name);
                        sink.printf(&format!("PSHELL_ERROR: {e}"));
                    }
                }
            }
        }
        DispatchOutcome {
            msg_type: MsgType::COMMAND_COMPLETE,
            quit: false,
        }
    }

    fn dispatch_batch(&self, args: &[String], sink: &OutputSink) {
        use crate::config::{find_batch_files, load_batch_file, resolve_batch_file};
        match args.first().map(String::as_str) {
            Some("-list") => {
                for (i, path) in find_batch_files().iter().enumerate() {
                    sink.printf(&format!("{:4}  {}", i + 1, path.display()));
                }
            }
            Some("-show") => {
                // Showing file contents without running them.
                for path in find_batch_files() {
                    if let Ok(lines) = load_batch_file(&path) {
                        sink.printf(&format!("# {}", path.display()));
                        for line in lines {
                            sink.printf(&line);
                        }
                    }
                }
            }
            Some(arg) => match resolve_batch_file(arg) {
                Ok(Some(path)) => match load_batch_file(&path) {
                    Ok(lines) => {
                        for line in lines {
                            self.process_line(&line, sink, false);
                        }
                    }
                    Err(e) => sink.printf(&format!("PSHELL_ERROR: {e}")),
                },
                Ok(None) => sink.printf(&format!("PSHELL_ERROR: no unique batch file matches '{arg}'")),
                Err(e) => sink.printf(&format!("PSHELL_ERROR: {e}")),
            },
            None => sink.printf("PSHELL_ERROR: batch requires an argument"),
        }
    }

    /// Handles the eight introspection query message types (`queryVersion`,
    /// `queryPayloadSize`, `queryName`, `queryTitle`, `queryBanner`,
    /// `queryPrompt`, `queryCommands1/2`), writing directly into `sink` —
    /// these are machine-readable responses for the control client's
    /// `extract*` helper functions, not human-facing output.
    pub fn process_query(&self, msg_type: MsgType, sink: &OutputSink) {
        let max_len = self.registry.iter().map(|c| c.name.len()).max().unwrap_or(0);
        match msg_type {
            MsgType::QUERY_VERSION => sink.printf_no_newline("1"),
            MsgType::QUERY_PAYLOAD_SIZE => sink.printf_no_newline(&self.payload_size.to_string()),
            MsgType::QUERY_NAME => sink.printf_no_newline(&self.name),
            MsgType::QUERY_TITLE => sink.printf_no_newline(&self.title),
            MsgType::QUERY_BANNER => sink.printf_no_newline(&self.welcome_banner()),
            MsgType::QUERY_PROMPT => sink.printf_no_newline(&self.prompt),
            // Human "name  -  description" listing, one per line.
            MsgType::QUERY_COMMANDS1 => {
                for command in self.registry.iter() {
                    sink.printf(&format!("{:<width$}  -  {}", command.name, command.description, width = max_len));
                }
            }
            // Slash-separated bare names, fed to the control client's
            // TAB-completion keyword set.
            MsgType::QUERY_COMMANDS2 => {
                for command in self.registry.iter() {
                    sink.printf_no_newline(&format!("{}/", command.name));
                }
            }
            _ => {}
        }
    }

    /// For in-process callers that want to run a command directly without
    /// going through any transport at all.
    pub fn run_command(&self, line: &str) -> String {
        let sink = OutputSink::buffered();
        self.process_line(line, &sink, false);
        sink.take_buffer()
    }

    pub fn welcome_banner(&self) -> String {
        match &self.banner {
            Some(banner) => banner.clone(),
            None => format!(
                "{} server: {}, type: {:?}\n",
                self.title, self.name, self.server_type
            ),
        }
    }
}

/// What [`Server::process_line`] produced: the reply message type a
/// query/reply transport should send back, and whether the session should
/// be torn down (the `quit` built-in was invoked).
pub struct DispatchOutcome {
    pub msg_type: MsgType,
    pub quit: bool,
}

/// Shared request handler for the datagram transports (UDP/UNIX): one of
/// the eight introspection queries is answered directly, otherwise the
/// payload is tokenized and run through the ordinary dispatch path. Returns
/// the `msgType` the caller should reply with.
pub(crate) fn dispatch_datagram(server: &Server, request: &Message, sink: &OutputSink) -> MsgType {
    match request.msg_type {
        MsgType::QUERY_VERSION
        | MsgType::QUERY_PAYLOAD_SIZE
        | MsgType::QUERY_NAME
        | MsgType::QUERY_TITLE
        | MsgType::QUERY_BANNER
        | MsgType::QUERY_PROMPT
        | MsgType::QUERY_COMMANDS1
        | MsgType::QUERY_COMMANDS2 => {
            server.process_query(request.msg_type, sink);
            MsgType::COMMAND_COMPLETE
        }
        _ => server.process_line(&request.payload, sink, false).msg_type,
    }
}

/// Unified handle for the three socket-based transports (UDP, TCP, UNIX),
/// so a host that picks a [`ServerType`] at runtime can run the matching
/// loop without matching on the enum itself a second time.
///
/// Mirrors the teacher's own `IpcTransport` trait, which gives each of its
/// backends (TCP, UNIX, shared memory, POSIX mq) a common async entry
/// point behind one interface. LOCAL has no socket and no accept loop to
/// share this shape with, so it stays a plain synchronous function
/// ([`local::run`]) rather than a fourth impl of this trait.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn run(self, server: &mut Server) -> Result<()>;
}

/// Binds `host:port` and serves request/reply datagrams with no session
/// state between them.
pub struct UdpTransport {
    pub host: String,
    pub port: u16,
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn run(self, server: &mut Server) -> Result<()> {
        udp::run(server, &self.host, self.port).await
    }
}

/// Binds `host:port` and serves one interactive telnet-style session at a
/// time.
pub struct TcpTransport {
    pub host: String,
    pub port: u16,
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn run(self, server: &mut Server) -> Result<()> {
        tcp::run(server, &self.host, self.port).await
    }
}

/// Binds a UNIX datagram socket under the coordination directory.
pub struct UnixTransport;

#[async_trait::async_trait]
impl Transport for UnixTransport {
    async fn run(self, server: &mut Server) -> Result<()> {
        unix::run(server).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_reports_not_found() {
        let server = Server::new("demo", ServerType::Local);
        let sink = OutputSink::buffered();
        let outcome = server.process_line("bogus", &sink, false);
        assert_eq!(outcome.msg_type, MsgType::COMMAND_NOT_FOUND);
        assert_eq!(sink.take_buffer(), "PSHELL_ERROR: Command: 'bogus' not found\n");
    }

    #[test]
    fn ambiguous_command_reports_exact_upstream_wording() {
        let mut server = Server::new("demo", ServerType::Local);
        server
            .add_command("hello", "hello", "greets", 0, 0, true, Box::new(|_args, _sink| Ok(())))
            .unwrap();
        let sink = OutputSink::buffered();
        // "hel" is a prefix of both "hello" and the built-in "help".
        let outcome = server.process_line("hel", &sink, false);
        assert_eq!(outcome.msg_type, MsgType::COMMAND_NOT_FOUND);
        assert!(sink.take_buffer().contains("PSHELL_ERROR: Ambiguous command abbreviation: 'hel'"));
    }

    #[test]
    fn server_config_timeout_is_interpreted_as_minutes() {
        let mut server = Server::new("demo", ServerType::Local);
        server.apply_overrides(ServerConfigOverrides {
            timeout: Some(Some(10)),
            ..Default::default()
        });
        assert_eq!(server.idle_timeout(), Some(std::time::Duration::from_secs(600)));
    }

    #[test]
    fn registered_command_dispatches() {
        let mut server = Server::new("demo", ServerType::Local);
        server
            .add_command(
                "echo",
                "echo <word>",
                "echo a word",
                1,
                1,
                true,
                Box::new(|args, _sink| {
                    println!("{}", args[0]);
                    Ok(())
                }),
            )
            .unwrap();
        let sink = OutputSink::buffered();
        let outcome = server.process_line("echo hi", &sink, false);
        assert_eq!(outcome.msg_type, MsgType::COMMAND_COMPLETE);
    }

    #[test]
    fn invalid_arg_count_is_reported() {
        let mut server = Server::new("demo", ServerType::Local);
        server
            .add_command("echo", "echo <word>", "echo a word", 1, 1, true, Box::new(|_args, _sink| Ok(())))
            .unwrap();
        let sink = OutputSink::buffered();
        let outcome = server.process_line("echo", &sink, false);
        assert_eq!(outcome.msg_type, MsgType::COMMAND_INVALID_ARG_COUNT);
    }

    #[test]
    fn quit_signals_session_teardown() {
        let server = Server::new("demo", ServerType::Local);
        let sink = OutputSink::buffered();
        let outcome = server.process_line("quit", &sink, false);
        assert!(outcome.quit);
    }

    #[test]
    fn help_lists_registered_commands() {
        let mut server = Server::new("demo", ServerType::Local);
        server
            .add_command("status", "status", "show status", 0, 0, true, Box::new(|_args, _sink| Ok(())))
            .unwrap();
        let sink = OutputSink::buffered();
        server.process_line("help", &sink, false);
        assert!(sink.take_buffer().contains("status"));
    }

    #[test]
    fn history_records_interactive_commands_deduplicating_repeats() {
        let mut server = Server::new("demo", ServerType::Local);
        server
            .add_command("status", "status", "show status", 0, 0, true, Box::new(|_args, _sink| Ok(())))
            .unwrap();
        let sink = OutputSink::buffered();
        server.process_line("status", &sink, true);
        server.process_line("status", &sink, true);
        assert_eq!(server.history(), vec!["status".to_string()]);
    }
}
