use std::io::Write;

use scrolltosco_storage::{Turn, TurnRole};

use super::format::{BODY_INDENT, format_content, format_line};
use super::{PresentationFrame, SessionObserver, SessionUpdate};
use crate::chat::SessionState;
use unicode_width::UnicodeWidthStr;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const TYPING_PLACEHOLDER: &str = "…";

fn role_header(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "You:",
        TurnRole::Assistant => "Assistant:",
    }
}

fn body_width(width: usize) -> usize {
    width.saturating_sub(UnicodeWidthStr::width(BODY_INDENT))
}

fn indent_lines(lines: Vec<String>) -> impl Iterator<Item = String> {
    lines.into_iter().map(|line| {
        if line.is_empty() {
            line
        } else {
            format!("{BODY_INDENT}{line}")
        }
    })
}

/// Renders one message as a role header followed by its indented body.
pub fn render_turn_block(role: TurnRole, content: &str, width: usize) -> String {
    let mut block = String::from(role_header(role));
    block.push('\n');
    for line in indent_lines(format_content(content, body_width(width))) {
        block.push_str(&line);
        block.push('\n');
    }
    block
}

/// Renders a whole frame. The live buffer uses the same block layout as a committed reply.
pub fn render_frame(frame: &PresentationFrame, width: usize) -> String {
    let mut rendered = frame
        .turns
        .iter()
        .map(|turn| render_turn_block(turn.role, &turn.content, width))
        .collect::<Vec<_>>()
        .join("\n");

    let pending = match (&frame.live, frame.state) {
        (Some(live), _) => Some(render_turn_block(TurnRole::Assistant, live, width)),
        (None, SessionState::Sending(_)) => Some(render_turn_block(
            TurnRole::Assistant,
            TYPING_PLACEHOLDER,
            width,
        )),
        (None, _) => None,
    };

    if let Some(pending) = pending {
        if !rendered.is_empty() {
            rendered.push('\n');
        }
        rendered.push_str(&pending);
    }
    rendered
}

/// Transcript-style shell: prints each reply line by line as it streams in.
///
/// Only complete source lines of the live buffer are printed, so nothing printed ever needs to
/// be taken back; the committed turn supplies whatever tail is left.
pub struct InlineShell<W: Write> {
    out: W,
    width: usize,
    echo_user_turns: bool,
    live_open: bool,
    live_lines_emitted: usize,
}

impl<W: Write> InlineShell<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out,
            width,
            echo_user_turns: true,
            live_open: false,
            live_lines_emitted: 0,
        }
    }

    /// Skips user turns, for terminals where the typed line is already visible.
    pub fn without_user_echo(mut self) -> Self {
        self.echo_user_turns = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_raw(&mut self, text: &str) {
        if let Err(error) = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush())
        {
            tracing::warn!(error = %error, "inline shell failed to write");
        }
    }

    fn write_source_lines(&mut self, content: &str, upto: Option<usize>) {
        let width = body_width(self.width);
        let source_lines = content.split('\n').collect::<Vec<_>>();
        let end = upto.unwrap_or(source_lines.len());

        let mut text = String::new();
        for line in source_lines
            .iter()
            .take(end)
            .skip(self.live_lines_emitted)
        {
            for formatted in indent_lines(format_line(line, width)) {
                text.push_str(&formatted);
                text.push('\n');
            }
        }
        self.live_lines_emitted = self.live_lines_emitted.max(end);
        self.write_raw(&text);
    }

    fn open_live(&mut self) {
        if !self.live_open {
            self.live_open = true;
            self.live_lines_emitted = 0;
            self.write_raw(&format!("{}\n", role_header(TurnRole::Assistant)));
        }
    }

    fn close_live(&mut self, note: Option<&str>) {
        if self.live_open {
            if let Some(note) = note {
                self.write_raw(&format!("{BODY_INDENT}({note})\n"));
            }
            self.write_raw("\n");
        }
        self.live_open = false;
        self.live_lines_emitted = 0;
    }

    fn handle_commit(&mut self, turn: &Turn) {
        match turn.role {
            TurnRole::User if !self.echo_user_turns => {}
            TurnRole::Assistant if self.live_open => {
                self.write_source_lines(&turn.content, None);
                self.close_live(None);
            }
            role => {
                let block = render_turn_block(role, &turn.content, self.width);
                self.write_raw(&format!("{block}\n"));
            }
        }
    }
}

impl<W: Write> SessionObserver for InlineShell<W> {
    fn on_update(&mut self, update: &SessionUpdate) {
        match update {
            SessionUpdate::LiveContent { content, .. } => {
                self.open_live();
                let complete_lines = content.matches('\n').count();
                self.write_source_lines(content, Some(complete_lines));
            }
            SessionUpdate::TurnCommitted(turn) => self.handle_commit(turn),
            SessionUpdate::StateChanged { current, .. } => match current {
                SessionState::Erroring(_) => self.close_live(Some("response interrupted")),
                SessionState::Idle => self.close_live(Some("response discarded")),
                SessionState::Sending(_) | SessionState::Streaming(_) => {}
            },
        }
    }
}

/// Full-redraw shell: keeps its own frame snapshot and repaints it on every update.
pub struct ModalShell<W: Write> {
    out: W,
    width: usize,
    frame: PresentationFrame,
}

impl<W: Write> ModalShell<W> {
    pub fn new(out: W, width: usize) -> Self {
        Self {
            out,
            width,
            frame: PresentationFrame::default(),
        }
    }

    pub fn frame(&self) -> &PresentationFrame {
        &self.frame
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn repaint(&mut self) {
        let rendered = render_frame(&self.frame, self.width);
        let result = self
            .out
            .write_all(CLEAR_SCREEN.as_bytes())
            .and_then(|_| self.out.write_all(rendered.as_bytes()))
            .and_then(|_| self.out.flush());
        if let Err(error) = result {
            tracing::warn!(error = %error, "modal shell failed to repaint");
        }
    }
}

impl<W: Write> SessionObserver for ModalShell<W> {
    fn on_update(&mut self, update: &SessionUpdate) {
        self.frame.apply(update);
        self.repaint();
    }
}
