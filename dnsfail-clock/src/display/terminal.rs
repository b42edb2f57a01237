//! A display surface that prints frames as colored text.
//!
//! Used on development machines and in containers where no LED panel is
//! attached; the frame content is identical to what the panel shows.

use super::{DisplaySurface, DrawError, Frame};
use colored::Colorize;
use std::io::{self, ErrorKind, Write};

const CLEAR_AND_HOME: &str = "\x1b[2J\x1b[H";

/// Renders frames to any writer, typically stdout.
pub struct TerminalSurface<W: Write + Send> {
    out: W,
    brightness: u8,
    redraw_in_place: bool,
}

impl TerminalSurface<io::Stdout> {
    /// A surface on stdout that repaints the screen for each frame.
    pub fn stdout(brightness: u8) -> Self {
        Self::new(io::stdout(), brightness, true)
    }
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W, brightness: u8, redraw_in_place: bool) -> Self {
        Self {
            out,
            brightness,
            redraw_in_place,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        if self.redraw_in_place {
            self.out.write_all(CLEAR_AND_HOME.as_bytes())?;
        }
        for line in &frame.lines {
            let color = line.color.dimmed(self.brightness);
            // Panel columns are roughly twice as dense as terminal cells.
            let indent = " ".repeat((line.x / 2) as usize);
            writeln!(
                self.out,
                "{}{}",
                indent,
                line.text.truecolor(color.0, color.1, color.2).bold()
            )?;
        }
        self.out.flush()
    }
}

fn classify(e: io::Error) -> DrawError {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
            DrawError::HandleLost(e)
        }
        _ => DrawError::Redraw(e),
    }
}

impl<W: Write + Send> DisplaySurface for TerminalSurface<W> {
    fn draw(&mut self, frame: &Frame) -> Result<(), DrawError> {
        self.write_frame(frame).map_err(classify)
    }

    fn clear(&mut self) -> Result<(), DrawError> {
        if self.redraw_in_place {
            self.out
                .write_all(CLEAR_AND_HOME.as_bytes())
                .and_then(|_| self.out.flush())
                .map_err(classify)?;
        }
        Ok(())
    }
}
