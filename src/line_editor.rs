//! Line editor: the character-by-character input state machine driving
//! interactive TCP/LOCAL sessions and the standalone control client's
//! reference line-editing behavior.
//!
//! Byte I/O and the idle-timeout `select` loop live in the caller (the TCP
//! session driver in [`crate::server::tcp`], or a TTY driver for an
//! in-process LOCAL server): this module only holds the editing state
//! machine, fed one byte at a time via [`LineEditor::feed`]. That keeps the
//! state machine testable without a real socket or terminal.

use crate::args::is_sub_string;

/// The exact 12-byte telnet IAC negotiation sequence sent once a TCP
/// session is accepted, before the welcome banner: WILL SUPPRESS-GO-AHEAD,
/// WILL ECHO, DO SUPPRESS-GO-AHEAD, DO ECHO.
pub const TELNET_NEGOTIATE: [u8; 12] = [
    0xFF, 0xFB, 0x03, 0xFF, 0xFB, 0x01, 0xFF, 0xFD, 0x03, 0xFF, 0xFD, 0x01,
];

/// TAB-completion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStyle {
    /// First TAB press completes/lists immediately.
    Fast,
    /// First TAB press only fills the longest common prefix; a second,
    /// consecutive TAB press lists the matches (standard bash behavior).
    Bash,
}

/// Outcome of feeding one byte to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// No visible effect yet beyond whatever bytes should be echoed.
    None,
    /// The command line was committed (Enter/CR) — ready to dispatch.
    CommandReady(String),
    /// Ctrl-C was received on a TTY session; the caller should raise
    /// `SIGINT`. On a socket session this is never produced — Ctrl-C is
    /// silently dropped there, matching the upstream behavior.
    Interrupt,
}

/// Bytes the editor wants written back to the peer in response to a fed
/// byte (echoed characters, cursor-movement escape sequences, TAB-completion
/// listings, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output(pub Vec<u8>);

impl Output {
    fn push_str(&mut self, s: &str) {
        self.0.extend_from_slice(s.as_bytes());
    }
    fn push_bytes(&mut self, b: &[u8]) {
        self.0.extend_from_slice(b);
    }
}

/// Whether the underlying transport is a real TTY (enabling Ctrl-C =>
/// SIGINT) or a socket (Ctrl-C silently dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialKind {
    Tty,
    Socket,
}

enum EscState {
    None,
    Esc,
    Bracket,
    /// Saw `ESC [ <digit>`; waiting for the terminating `~` of a
    /// `ESC[<n>~` sequence (Home/Delete/End on most terminals).
    Tilde(u8),
}

pub struct LineEditor {
    prompt: String,
    command: Vec<char>,
    cursor: usize,
    history: Vec<String>,
    history_pos: usize,
    tab_completions: Vec<String>,
    tab_style: TabStyle,
    tab_count: u32,
    esc_state: EscState,
    serial_kind: SerialKind,
    max_completions_per_line: usize,
}

impl LineEditor {
    pub fn new(prompt: impl Into<String>, serial_kind: SerialKind) -> Self {
        LineEditor {
            prompt: prompt.into(),
            command: Vec::new(),
            cursor: 0,
            history: Vec::new(),
            history_pos: 0,
            tab_completions: Vec::new(),
            tab_style: TabStyle::Fast,
            tab_count: 0,
            esc_state: EscState::None,
            serial_kind,
            max_completions_per_line: 6,
        }
    }

    pub fn set_tab_style(&mut self, style: TabStyle) {
        self.tab_style = style;
    }

    pub fn set_tab_completions(&mut self, keywords: Vec<String>) {
        self.tab_completions = keywords;
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn current_command(&self) -> String {
        self.command.iter().collect()
    }

    fn current_line_len(&self) -> usize {
        self.command.len()
    }

    fn clear_line(&self, out: &mut Output) {
        out.push_str(&format!(
            "\r{}{}\r{}",
            self.prompt,
            " ".repeat(self.prompt.len() + self.current_line_len()),
            self.prompt
        ));
    }

    fn show_command(&self, out: &mut Output) {
        let rendered: String = self.command.iter().collect();
        out.push_str(&format!("\r{}{}", self.prompt, rendered));
        // Reposition the cursor if it isn't at the end.
        let back = self.command.len().saturating_sub(self.cursor);
        if back > 0 {
            out.push_str(&"\x08".repeat(back));
        }
    }

    /// Feeds one input byte to the state machine, returning any bytes that
    /// should be written back to the peer and the resulting [`Event`].
    pub fn feed(&mut self, byte: u8) -> (Output, Event) {
        let mut out = Output::default();

        match self.esc_state {
            EscState::None => {}
            EscState::Esc => {
                self.esc_state = EscState::None;
                match byte {
                    b'[' | b'O' => {
                        self.esc_state = EscState::Bracket;
                        return (out, Event::None);
                    }
                    _ => return (out, Event::None),
                }
            }
            EscState::Bracket => {
                self.esc_state = EscState::None;
                match byte {
                    b'A' => self.history_up(&mut out),
                    b'B' => self.history_down(&mut out),
                    b'C' => self.cursor_right(&mut out),
                    b'D' => self.cursor_left(&mut out),
                    b'H' => self.beginning_of_line(&mut out),
                    b'F' => self.end_of_line(&mut out),
                    b'1' | b'3' | b'4' => {
                        // Numeric parameter: hold it and wait for the
                        // terminating `~` instead of acting immediately,
                        // otherwise the `~` byte falls through as printable
                        // input.
                        self.esc_state = EscState::Tilde(byte);
                    }
                    _ => {}
                }
                return (out, Event::None);
            }
            EscState::Tilde(param) => {
                self.esc_state = EscState::None;
                if byte == b'~' {
                    match param {
                        b'1' => self.beginning_of_line(&mut out),
                        b'3' => self.delete_under_cursor(&mut out),
                        b'4' => self.end_of_line(&mut out),
                        _ => {}
                    }
                }
                return (out, Event::None);
            }
        }

        let event = match byte {
            27 => {
                self.esc_state = EscState::Esc;
                self.tab_count = 0;
                Event::None
            }
            9 => {
                self.handle_tab(&mut out);
                Event::None
            }
            13 | 10 => {
                self.tab_count = 0;
                let command: String = self.command.drain(..).collect();
                self.cursor = 0;
                let trimmed = command.trim().to_string();
                if !trimmed.is_empty() && self.history.last() != Some(&trimmed) {
                    self.history.push(trimmed.clone());
                }
                self.history_pos = self.history.len();
                out.push_str("\r\n");
                Event::CommandReady(trimmed)
            }
            11 => {
                self.tab_count = 0;
                self.command.truncate(self.cursor);
                out.push_str("\x1b[K");
                Event::None
            }
            21 => {
                self.tab_count = 0;
                self.command.clear();
                self.cursor = 0;
                self.clear_line(&mut out);
                Event::None
            }
            127 | 8 => {
                self.tab_count = 0;
                if self.cursor > 0 {
                    self.command.remove(self.cursor - 1);
                    self.cursor -= 1;
                    self.show_command(&mut out);
                    out.push_str(" \x08");
                }
                Event::None
            }
            1 => {
                self.tab_count = 0;
                self.beginning_of_line(&mut out);
                Event::None
            }
            5 => {
                self.tab_count = 0;
                self.end_of_line(&mut out);
                Event::None
            }
            3 if self.serial_kind == SerialKind::Tty => {
                self.tab_count = 0;
                Event::Interrupt
            }
            32..=126 => {
                self.tab_count = 0;
                let ch = byte as char;
                self.command.insert(self.cursor, ch);
                self.cursor += 1;
                self.show_command(&mut out);
                Event::None
            }
            _ => Event::None,
        };

        (out, event)
    }

    fn beginning_of_line(&mut self, out: &mut Output) {
        self.cursor = 0;
        out.push_bytes(b"\r");
        out.push_str(&self.prompt);
    }

    fn end_of_line(&mut self, out: &mut Output) {
        self.cursor = self.command.len();
        self.show_command(out);
    }

    fn cursor_left(&mut self, out: &mut Output) {
        if self.cursor > 0 {
            self.cursor -= 1;
            out.push_bytes(b"\x08");
        }
    }

    fn cursor_right(&mut self, out: &mut Output) {
        if self.cursor < self.command.len() {
            out.push_str(&self.command[self.cursor].to_string());
            self.cursor += 1;
        }
    }

    fn delete_under_cursor(&mut self, out: &mut Output) {
        if self.cursor < self.command.len() {
            self.command.remove(self.cursor);
            self.show_command(out);
        }
    }

    fn history_up(&mut self, out: &mut Output) {
        if self.history_pos > 0 {
            self.history_pos -= 1;
            self.command = self.history[self.history_pos].chars().collect();
            self.cursor = self.command.len();
            self.show_command(out);
        }
    }

    fn history_down(&mut self, out: &mut Output) {
        if self.history_pos + 1 < self.history.len() {
            self.history_pos += 1;
            self.command = self.history[self.history_pos].chars().collect();
        } else {
            self.history_pos = self.history.len();
            self.command.clear();
        }
        self.cursor = self.command.len();
        self.show_command(out);
    }

    /// Completion applies only to the first whitespace-delimited token.
    fn completing_first_token(&self) -> bool {
        self.command.is_empty() || !self.current_command().trim_start().contains(' ')
    }

    fn matches(&self) -> Vec<&str> {
        let typed = self.current_command();
        self.tab_completions
            .iter()
            .filter(|kw| is_sub_string(&typed, kw, 0))
            .map(String::as_str)
            .collect()
    }

    fn longest_common_prefix(&self, matches: &[&str]) -> String {
        let typed = self.current_command();
        let mut result = typed.clone();
        'outer: loop {
            let next_idx = result.chars().count();
            let mut next_char: Option<char> = None;
            for m in matches {
                let mc: Vec<char> = m.chars().collect();
                if next_idx >= mc.len() {
                    break 'outer;
                }
                match next_char {
                    None => next_char = Some(mc[next_idx]),
                    Some(c) if c == mc[next_idx] => {}
                    _ => break 'outer,
                }
            }
            match next_char {
                Some(c) => result.push(c),
                None => break,
            }
        }
        result
    }

    fn show_completions(&self, matches: &[&str], out: &mut Output) {
        out.push_str("\r\n");
        let max_len = matches.iter().map(|m| m.len()).max().unwrap_or(0) + 2;
        for (i, m) in matches.iter().enumerate() {
            out.push_str(&format!("{:<width$}", m, width = max_len));
            if (i + 1) % self.max_completions_per_line == 0 {
                out.push_str("\r\n");
            }
        }
        out.push_str("\r\n");
        self.show_command(out);
    }

    fn handle_tab(&mut self, out: &mut Output) {
        if !self.completing_first_token() {
            return;
        }
        self.tab_count += 1;
        let matches = self.matches();
        match self.tab_style {
            TabStyle::Fast => {
                if self.tab_count == 1 {
                    self.apply_completion(&matches, out);
                }
            }
            TabStyle::Bash => {
                if self.tab_count == 1 {
                    let prefix = self.longest_common_prefix(&matches);
                    self.command = prefix.chars().collect();
                    self.cursor = self.command.len();
                    self.show_command(out);
                } else {
                    self.show_completions(&matches, out);
                    self.tab_count = 0;
                }
            }
        }
    }

    fn apply_completion(&mut self, matches: &[&str], out: &mut Output) {
        match matches.len() {
            0 => {}
            1 => {
                self.command = matches[0].chars().collect();
                self.command.push(' ');
                self.cursor = self.command.len();
                self.show_command(out);
            }
            _ => {
                let prefix = self.longest_common_prefix(matches);
                self.command = prefix.chars().collect();
                self.cursor = self.command.len();
                self.show_completions(matches, out);
            }
        }
    }

    /// Message written out when the idle-timeout deadline (tracked by the
    /// caller's `select` loop) elapses.
    pub fn idle_timeout_message(&self) -> &'static str {
        match self.serial_kind {
            SerialKind::Tty => "\r\nIdle session timeout\r\n",
            SerialKind::Socket => "\nIdle session timeout\n",
        }
    }

    pub fn prompt_bytes(&self) -> Vec<u8> {
        self.prompt.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(editor: &mut LineEditor, s: &str) {
        for b in s.bytes() {
            editor.feed(b);
        }
    }

    #[test]
    fn commits_command_on_enter() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        feed_str(&mut editor, "status");
        let (_, event) = editor.feed(b'\r');
        assert_eq!(event, Event::CommandReady("status".to_string()));
    }

    #[test]
    fn history_deduplicates_against_previous() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        feed_str(&mut editor, "status");
        editor.feed(b'\r');
        feed_str(&mut editor, "status");
        editor.feed(b'\r');
        assert_eq!(editor.history(), ["status"]);
    }

    #[test]
    fn empty_command_not_added_to_history() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        editor.feed(b'\r');
        assert!(editor.history().is_empty());
    }

    #[test]
    fn ctrl_c_on_socket_is_ignored() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        let (_, event) = editor.feed(3);
        assert_eq!(event, Event::None);
    }

    #[test]
    fn ctrl_c_on_tty_interrupts() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Tty);
        let (_, event) = editor.feed(3);
        assert_eq!(event, Event::Interrupt);
    }

    #[test]
    fn backspace_removes_previous_char() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        feed_str(&mut editor, "stats");
        editor.feed(127);
        assert_eq!(editor.current_command(), "stat");
    }

    #[test]
    fn fast_tab_single_match_appends_space() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        editor.set_tab_completions(vec!["status".to_string(), "stop".to_string()]);
        feed_str(&mut editor, "stat");
        editor.feed(9);
        assert_eq!(editor.current_command(), "status ");
    }

    #[test]
    fn fast_tab_multi_match_fills_common_prefix() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        editor.set_tab_completions(vec!["start".to_string(), "stop".to_string(), "status".to_string()]);
        feed_str(&mut editor, "st");
        editor.feed(9);
        assert_eq!(editor.current_command(), "st");
    }

    #[test]
    fn bash_tab_requires_second_press_to_list() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        editor.set_tab_style(TabStyle::Bash);
        editor.set_tab_completions(vec!["start".to_string(), "stop".to_string()]);
        feed_str(&mut editor, "st");
        let (out1, _) = editor.feed(9);
        assert!(out1.0.is_empty() || editor.current_command() == "st");
        let (out2, _) = editor.feed(9);
        assert!(!out2.0.is_empty());
    }

    #[test]
    fn home_key_moves_cursor_without_inserting_tilde() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        feed_str(&mut editor, "stats");
        feed_str(&mut editor, "\x1b[1~");
        assert_eq!(editor.current_command(), "stats");
        editor.feed(b'x');
        assert_eq!(editor.current_command(), "xstats");
    }

    #[test]
    fn end_key_moves_cursor_without_inserting_tilde() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        feed_str(&mut editor, "stats");
        feed_str(&mut editor, "\x1b[1~");
        feed_str(&mut editor, "\x1b[4~");
        assert_eq!(editor.current_command(), "stats");
        editor.feed(b'x');
        assert_eq!(editor.current_command(), "statsx");
    }

    #[test]
    fn delete_key_removes_char_under_cursor() {
        let mut editor = LineEditor::new("demo> ", SerialKind::Socket);
        feed_str(&mut editor, "stats");
        feed_str(&mut editor, "\x1b[1~");
        feed_str(&mut editor, "\x1b[3~");
        assert_eq!(editor.current_command(), "tats");
    }
}
