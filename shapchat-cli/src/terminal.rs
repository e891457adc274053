//! Terminal renderer

use colored::Colorize;
use std::io::{self, Write};

use shapchat_core::error::Result;
use shapchat_core::render::{NoticeLevel, Renderer};

/// Renders the conversation as colored text on a terminal.
///
/// Stream updates carry the full text so far; only the part not yet printed is
/// written, so the response appears incrementally.
pub struct TerminalRenderer<W> {
    out: W,
    printed: usize,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn write_delta(&mut self, text: &str) -> Result<()> {
        if let Some(delta) = text.get(self.printed..) {
            write!(self.out, "{}", delta)?;
            self.printed = text.len();
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn prompt(&mut self, label: &str) -> Result<()> {
        write!(self.out, "{}", label.cyan().bold())?;
        self.out.flush()?;
        Ok(())
    }

    fn notice(&mut self, level: NoticeLevel, text: &str) -> Result<()> {
        let line = match level {
            NoticeLevel::Info => text.normal(),
            NoticeLevel::Success => text.green(),
            NoticeLevel::Warning => text.yellow(),
            NoticeLevel::Error => text.red(),
        };
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn stream_started(&mut self) -> Result<()> {
        self.printed = 0;
        write!(self.out, "{} ", "(Assistant):".green().bold())?;
        self.out.flush()?;
        Ok(())
    }

    fn stream_update(&mut self, text: &str) -> Result<()> {
        self.write_delta(text)
    }

    fn stream_finished(&mut self, text: &str) -> Result<()> {
        self.write_delta(text)?;
        writeln!(self.out)?;
        self.printed = 0;
        Ok(())
    }

    fn stream_aborted(&mut self) -> Result<()> {
        writeln!(self.out, " {}", "[interrupted]".dimmed())?;
        self.printed = 0;
        Ok(())
    }

    fn message(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{} {}", "(Assistant):".green().bold(), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(renderer: TerminalRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn test_stream_prints_each_part_once() {
        colored::control::set_override(false);
        let mut renderer = TerminalRenderer::new(Vec::new());

        renderer.stream_started().unwrap();
        renderer.stream_update("Income").unwrap();
        renderer.stream_update("Income drives").unwrap();
        renderer.stream_finished("Income drives it.").unwrap();

        assert_eq!(rendered(renderer), "(Assistant): Income drives it.\n");
    }

    #[test]
    fn test_notices_and_abort() {
        colored::control::set_override(false);
        let mut renderer = TerminalRenderer::new(Vec::new());

        renderer.notice(NoticeLevel::Error, "Invalid choice").unwrap();
        renderer.stream_started().unwrap();
        renderer.stream_update("Par").unwrap();
        renderer.stream_aborted().unwrap();

        let out = rendered(renderer);
        assert!(out.starts_with("Invalid choice\n"));
        assert!(out.ends_with("Par [interrupted]\n"));
    }
}
