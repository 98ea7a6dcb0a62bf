//! # Terminal printing
//!
//! Re-render a growing markdown text in place, so tokens from [DecodeSteps] show up as they are decoded.

use std::io::{self, stdout, Write};

use anyhow::Result;
use log::warn;
use termimad::crossterm::{cursor, ExecutableCommand, QueueableCommand};
use termimad::crossterm::terminal::Clear;
use termimad::crossterm::terminal::ClearType::FromCursorDown;
use termimad::{FmtLine, FmtText, MadSkin};

use crate::decoding::{CausalLm, DecodeSteps, Tokenizer};

struct RenderedMarkdown {
    text: String,
    line_widths: Vec<usize>,
}

impl RenderedMarkdown {
    fn render(skin: &MadSkin, markdown: &str, wrap_width: Option<usize>) -> Self {
        let fmt_text = FmtText::from(skin, markdown, wrap_width);
        Self {
            text: fmt_text.to_string(),
            line_widths: fmt_text.lines.iter().map(FmtLine::visible_length).collect(),
        }
    }

    fn rows(&self) -> u16 {
        u16::try_from(self.line_widths.len()).unwrap_or(u16::MAX)
    }

    fn last_columns(&self) -> u16 {
        let width = self.line_widths.last().copied().unwrap_or(0);
        u16::try_from(width).unwrap_or(u16::MAX)
    }
}

/// Prints markdown at a cursor anchor, wiping whatever it printed there before.
pub struct AnchoredMarkdownPrinter {
    pub skin: MadSkin,
    pub wrap_width: Option<usize>,
    anchor: Option<(u16, u16)>,
    hide_cursor: bool,
}

impl Default for AnchoredMarkdownPrinter {
    fn default() -> Self {
        Self {
            skin: MadSkin::default(),
            wrap_width: None,
            anchor: None,
            hide_cursor: false,
        }
    }
}

impl AnchoredMarkdownPrinter {
    #[inline]
    pub fn activated(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn hide_cursor(&mut self, hide_cursor: bool) -> io::Result<()> {
        if self.hide_cursor != hide_cursor {
            if hide_cursor {
                stdout().execute(cursor::Hide)?;
            } else {
                stdout().execute(cursor::Show)?;
            }
        }
        self.hide_cursor = hide_cursor;
        Ok(())
    }

    /// Anchor at the current cursor position. Does nothing if already activated.
    pub fn activate(&mut self, hide_cursor: bool) -> io::Result<()> {
        if self.activated() {
            warn!("markdown printer is already activated");
            return Ok(());
        }
        self.anchor = Some(cursor::position()?);
        self.hide_cursor(hide_cursor)
    }

    pub fn deactivate(&mut self) -> io::Result<()> {
        if !self.activated() {
            warn!("markdown printer is already deactivated");
            return Ok(());
        }
        self.anchor = None;
        self.hide_cursor(false)
    }

    pub fn print(&mut self, markdown: &str) -> io::Result<()> {
        let rendered = RenderedMarkdown::render(&self.skin, markdown, self.wrap_width);
        self.print_rendered(&rendered)
    }

    fn print_rendered(&mut self, rendered: &RenderedMarkdown) -> io::Result<()> {
        let (column, row) = self.anchor.ok_or_else(|| io::Error::new(
            io::ErrorKind::Other,
            "markdown printer must be activated before printing",
        ))?;
        let mut out = stdout();
        out.queue(cursor::MoveTo(column, row))?
            .queue(Clear(FromCursorDown))?;
        write!(out, "{}", rendered.text)?;
        out.flush()?;
        // positions are relative to the visible terminal, so the anchor drifts up once the output scrolls
        let (end_column, end_row) = cursor::position()?;
        self.anchor = Some((
            end_column.saturating_sub(rendered.last_columns()),
            end_row.saturating_sub(rendered.rows()),
        ));
        Ok(())
    }
}

impl Drop for AnchoredMarkdownPrinter {
    fn drop(&mut self) {
        if self.activated() {
            if let Err(e) = self.deactivate() {
                warn!("cannot restore terminal cursor: {}", e);
            }
        }
    }
}

/// Accumulates markdown chunks and re-renders the whole buffer on every print.
#[derive(Default)]
pub struct IncrementalMarkdownPrinter {
    pub anchored_printer: AnchoredMarkdownPrinter,
    buffer: String,
    rendered: Option<RenderedMarkdown>,
}

impl IncrementalMarkdownPrinter {
    pub fn activate(&mut self, hide_cursor: bool) -> io::Result<()> {
        self.anchored_printer.activate(hide_cursor)
    }

    pub fn activated(&self) -> bool {
        self.anchored_printer.activated()
    }

    pub fn deactivate(&mut self) -> io::Result<()> {
        self.anchored_printer.deactivate()
    }

    /// Everything pushed so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn push_str(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        self.rendered = None;
    }

    pub fn push_and_print(&mut self, chunk: &str) -> io::Result<()> {
        self.push_str(chunk);
        self.print()
    }

    pub fn print(&mut self) -> io::Result<()> {
        let printer = &mut self.anchored_printer;
        let rendered = self.rendered.get_or_insert_with(
            || RenderedMarkdown::render(&printer.skin, &self.buffer, printer.wrap_width)
        );
        printer.print_rendered(rendered)
    }
}

/// Print every decoded token as it arrives and return the generated text.
///
/// The printer is activated if it is not yet, and left activated. A decoding error stops printing and is returned.
pub fn print_decode_steps<M: CausalLm, T: Tokenizer>(printer: &mut IncrementalMarkdownPrinter,
                                                     steps: DecodeSteps<'_, M, T>) -> Result<String> {
    if !printer.activated() {
        printer.activate(true)?;
    }
    let mut generated = String::new();
    for token in steps {
        let token = token?;
        generated.push_str(&token.text);
        printer.push_and_print(&token.text)?;
    }
    Ok(generated)
}
