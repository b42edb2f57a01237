//! Access to the digital input the reset button is wired to.

use anyhow::Result;

/// A single digital input.
///
/// `read_line` returns the raw logic level: `true` for high (the button's
/// idle state with the pull-up) and `false` for low (pressed, active-low).
pub trait InputLine: Send {
    fn read_line(&mut self) -> Result<bool>;
}

impl<F> InputLine for F
where
    F: FnMut() -> Result<bool> + Send,
{
    fn read_line(&mut self) -> Result<bool> {
        self()
    }
}

/// A line on a Linux GPIO character device.
///
/// The line is requested as an input with the internal pull-up enabled, so it
/// idles high and the button pulls it low. It is released when dropped.
#[cfg(target_os = "linux")]
pub struct CdevInputLine {
    request: gpiocdev::Request,
    offset: u32,
}

/// Bias applied to the button line when it is requested.
#[cfg(target_os = "linux")]
pub const BUTTON_BIAS: gpiocdev::line::Bias = gpiocdev::line::Bias::PullUp;

#[cfg(target_os = "linux")]
impl CdevInputLine {
    const CONSUMER: &'static str = "dnsfail";

    /// Requests line `pin` on the chip at `chip_path` as a pulled-up input.
    pub fn open(chip_path: &str, pin: u32) -> Result<Self> {
        use anyhow::Context;

        let request = gpiocdev::Request::builder()
            .on_chip(chip_path)
            .with_consumer(Self::CONSUMER)
            .with_line(pin)
            .as_input()
            .with_bias(BUTTON_BIAS)
            .request()
            .with_context(|| format!("requesting GPIO line {} on {} as input", pin, chip_path))?;
        Ok(Self {
            request,
            offset: pin,
        })
    }
}

/// Maps a line value to the raw logic level. Lines are requested active-high,
/// so `Active` means the line is electrically high.
#[cfg(target_os = "linux")]
fn level_of(value: gpiocdev::line::Value) -> bool {
    value == gpiocdev::line::Value::Active
}

#[cfg(target_os = "linux")]
impl InputLine for CdevInputLine {
    fn read_line(&mut self) -> Result<bool> {
        use anyhow::Context;

        let value = self
            .request
            .value(self.offset)
            .context("reading GPIO line")?;
        Ok(level_of(value))
    }
}

/// Opens the configured input line.
///
/// Failing here is not fatal for the application: the caller runs without
/// button resets.
pub fn open_input_line(chip_path: &str, pin: u32) -> Result<Box<dyn InputLine>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(CdevInputLine::open(chip_path, pin)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        anyhow::bail!(
            "GPIO line {} on {} is only available on Linux",
            pin,
            chip_path
        )
    }
}
