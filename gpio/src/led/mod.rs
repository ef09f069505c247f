use std::fmt::{Debug, Formatter};
use log::trace;
use crate::{GpioBusOutput, GpioResult};

/// A three-channel RGB LED driven through a GPIO bus ordered red, green, blue.
///
/// The bus carries the LED's polarity (the Pi Cap LED is common-anode, so its bus is set to a low
/// active level), so `true` always means "lit" here.
pub struct RgbLed<'a> {
    channels: &'a dyn GpioBusOutput<3>,
}

impl Debug for RgbLed<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RgbLed({:?})", self.channels)
    }
}

impl<'a> RgbLed<'a> {
    pub fn new(channels: &'a dyn GpioBusOutput<3>) -> Self {
        RgbLed { channels }
    }

    pub fn set_rgb(&self, red: bool, green: bool, blue: bool) -> GpioResult<()> {
        trace!("LED: red={} green={} blue={}", red, green, blue);
        self.channels.write(&[red, green, blue])
    }

    /// Shows whether anything is being touched: red when on, dark when off.
    pub fn set_intent(&self, on: bool) -> GpioResult<()> {
        self.set_rgb(on, false, false)
    }

    pub fn off(&self) -> GpioResult<()> {
        self.set_rgb(false, false, false)
    }
}
