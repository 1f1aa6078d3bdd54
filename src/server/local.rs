//! LOCAL transport: no socket at all. The calling process's own stdin/stdout
//! is put into raw terminal mode and driven directly through the line
//! editor, synchronously, on the caller's thread — there's nothing here for
//! an async executor to poll.

use super::{DispatchOutcome, Server};
use crate::line_editor::{Event, LineEditor, SerialKind};
use anyhow::{Context, Result};
use nix::sys::signal::{raise, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

fn crlf(s: &str) -> String {
    s.replace('\n', "\r\n")
}

/// Restores the terminal's original mode on drop, even if `run` returns
/// early via `?`.
struct RawModeGuard {
    original: Termios,
}

impl RawModeGuard {
    fn enable() -> Result<Self> {
        let fd = std::io::stdin().as_raw_fd();
        let original = termios::tcgetattr(fd).context("reading terminal attributes")?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(fd, SetArg::TCSANOW, &raw).context("entering raw terminal mode")?;
        Ok(RawModeGuard { original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let fd = std::io::stdin().as_raw_fd();
        let _ = termios::tcsetattr(fd, SetArg::TCSANOW, &self.original);
    }
}

/// Runs the LOCAL transport to completion: reads stdin byte by byte until
/// `quit` is entered or stdin reaches EOF.
///
/// Idle-session timeout isn't wired up here: unlike the socket transports,
/// there's no `select`-style primitive over a single blocking stdin read
/// without pulling in a polling dependency, and an interactive developer
/// terminal is the dominant LOCAL use case, where an idle timeout is rarely
/// configured anyway.
pub fn run(server: &mut Server) -> Result<()> {
    let _raw = RawModeGuard::enable()?;
    let mut stdin = std::io::stdin();
    let stdout = std::io::stdout();

    let mut editor = LineEditor::new(server.prompt().to_string(), SerialKind::Tty);
    editor.set_tab_completions(server.command_names());

    {
        let mut out = stdout.lock();
        out.write_all(crlf(&server.welcome_banner()).as_bytes())?;
        out.write_all(&editor.prompt_bytes())?;
        out.flush()?;
    }

    let mut byte = [0u8; 1];
    loop {
        let n = stdin.read(&mut byte).context("reading LOCAL session input")?;
        if n == 0 {
            return Ok(());
        }

        let (out, event) = editor.feed(byte[0]);
        if !out.0.is_empty() {
            let mut w = stdout.lock();
            w.write_all(&out.0)?;
            w.flush()?;
        }

        match event {
            Event::None => {}
            Event::Interrupt => {
                let _ = raise(Signal::SIGINT);
            }
            Event::CommandReady(line) => {
                let sink = crate::sink::OutputSink::streaming(Box::new(|s| {
                    let mut w = std::io::stdout();
                    let _ = w.write_all(crlf(s).as_bytes());
                    let _ = w.flush();
                }));
                let DispatchOutcome { quit, .. } = server.process_line(&line, &sink, true);
                if quit {
                    return Ok(());
                }
                let mut w = stdout.lock();
                w.write_all(&editor.prompt_bytes())?;
                w.flush()?;
            }
        }
    }
}
