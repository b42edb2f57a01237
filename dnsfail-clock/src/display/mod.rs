//! What goes on the matrix, and the surface it is drawn to.
//!
//! A [`Frame`] is a list of positioned text lines for a 64x32 panel. Drawing
//! it is delegated to a [`DisplaySurface`], so the render loop never touches
//! hardware directly.

pub mod render;
pub mod terminal;

use crate::common::Timestamp;
use crate::formatter::format_elapsed;
use thiserror::Error;

pub const PANEL_WIDTH: u32 = 64;
pub const PANEL_HEIGHT: u32 = 32;

const HEADER_GLYPH_WIDTH: u32 = 6;
const TIME_GLYPH_WIDTH: u32 = 5;

/// A 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const WHITE: Rgb = Rgb(255, 255, 255);
    pub const RED: Rgb = Rgb(255, 0, 0);

    /// Scales every channel by `percent` (clamped to 0..=100).
    pub fn dimmed(self, percent: u8) -> Rgb {
        let scale = |c: u8| ((c as u16 * percent.min(100) as u16) / 100) as u8;
        Rgb(scale(self.0), scale(self.1), scale(self.2))
    }
}

/// One line of text with its baseline position on the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextLine {
    pub x: u32,
    pub y: u32,
    pub color: Rgb,
    pub text: String,
}

impl TextLine {
    fn centered(text: &str, glyph_width: u32, y: u32, color: Rgb) -> Self {
        let width = text.chars().count() as u32 * glyph_width;
        Self {
            x: PANEL_WIDTH.saturating_sub(width) / 2,
            y,
            color,
            text: text.to_string(),
        }
    }
}

/// Everything drawn in one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub lines: Vec<TextLine>,
}

impl Frame {
    /// The standard screen: a two-line white header above the elapsed time in red.
    pub fn elapsed(now: Timestamp, origin: Timestamp) -> Self {
        let (days_line, clock_line) = format_elapsed(now, origin);
        Self {
            lines: vec![
                TextLine::centered("DAYS SINCE", HEADER_GLYPH_WIDTH, 8, Rgb::WHITE),
                TextLine::centered("DNS", HEADER_GLYPH_WIDTH, 16, Rgb::WHITE),
                TextLine::centered(&days_line, TIME_GLYPH_WIDTH, 24, Rgb::RED),
                TextLine::centered(&clock_line, TIME_GLYPH_WIDTH, 31, Rgb::RED),
            ],
        }
    }
}

/// Why a draw failed.
#[derive(Debug, Error)]
pub enum DrawError {
    /// This frame was lost; the next one may succeed.
    #[error("redraw failed: {0}")]
    Redraw(#[source] std::io::Error),
    /// The display itself is gone. Nothing further can be drawn.
    #[error("display handle lost: {0}")]
    HandleLost(#[source] std::io::Error),
}

/// A surface frames can be drawn on.
pub trait DisplaySurface: Send {
    /// Draws `frame`, replacing whatever was shown.
    fn draw(&mut self, frame: &Frame) -> Result<(), DrawError>;

    /// Blanks the display.
    fn clear(&mut self) -> Result<(), DrawError>;
}
