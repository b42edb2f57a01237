//! The moving parts around the timer: the button input and the reset sound.

pub mod button;
pub mod input_line;
pub mod notifier;
