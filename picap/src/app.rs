//! The touch dispatch loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use eyre::{eyre, WrapErr};
use log::{debug, error, info};
use picap_gpio::led::RgbLed;
use picap_gpio::touch::{TouchResult, TouchSensor, ELECTRODE_COUNT};
use crate::phrases::Phrases;
use crate::speech::Speaker;

/// Polls the touch sensor, speaks on every new touch and keeps the LED in step.
///
/// A touch that starts and ends entirely between two polls is never seen. With the default
/// 10 ms interval that is well below how long a finger stays on a pad.
pub struct App<'a> {
    sensor: &'a mut dyn TouchSensor,
    led: &'a RgbLed<'a>,
    speaker: &'a dyn Speaker,
    phrases: &'a Phrases,
    shutdown: &'a AtomicBool,
    poll_interval: Duration,
}

impl<'a> App<'a> {
    pub fn new(
        sensor: &'a mut dyn TouchSensor,
        led: &'a RgbLed<'a>,
        speaker: &'a dyn Speaker,
        phrases: &'a Phrases,
        shutdown: &'a AtomicBool,
        poll_interval: Duration,
    ) -> App<'a> {
        App {
            sensor,
            led,
            speaker,
            phrases,
            shutdown,
            poll_interval,
        }
    }

    /// Runs poll cycles until shutdown is requested.
    ///
    /// Leaves the LED as it is; [`supervise`] switches it off.
    pub fn run(&mut self) -> TouchResult<()> {
        info!("Polling every {:?}.", self.poll_interval);
        while !self.shutdown.load(Ordering::SeqCst) {
            self.update()?;
            thread::sleep(self.poll_interval);
        }
        debug!("Shutdown requested, leaving the main loop.");
        Ok(())
    }

    /// Runs one poll cycle. Returns whether the sensor reported a change.
    ///
    /// New touches are spoken in ascending electrode order, and the LED is updated after all of
    /// them. Once shutdown is requested no further phrase is started.
    pub fn update(&mut self) -> TouchResult<bool> {
        if !self.sensor.has_changed()? {
            return Ok(false);
        }
        self.sensor.refresh()?;

        let mut any_touched = false;
        for electrode in 0..ELECTRODE_COUNT {
            if self.sensor.is_touched(electrode) {
                any_touched = true;
            }

            if self.sensor.is_new_touch(electrode) {
                if self.shutdown.load(Ordering::SeqCst) {
                    debug!("Shutdown requested, electrode {} stays silent.", electrode);
                    continue;
                }
                let phrase = self.phrases.get(electrode).unwrap_or_default();
                info!("Speaking: {}", phrase);
                self.speaker.speak(phrase);
            } else if self.sensor.is_new_release(electrode) {
                debug!("Electrode {} released.", electrode);
            }
        }

        self.led.set_intent(any_touched)?;
        Ok(true)
    }
}

/// Starts the sensor, loads the phrases and runs the dispatch loop until shutdown.
///
/// Phrases are only loaded once the sensor is up. Once the loop has been entered the LED is
/// switched off on the way out, whether the loop ended on shutdown or on a sensor error.
pub fn supervise(
    sensor: &mut dyn TouchSensor,
    led: &RgbLed,
    speaker: &dyn Speaker,
    load_phrases: impl FnOnce() -> Phrases,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) -> eyre::Result<()> {
    if let Err(e) = sensor.begin() {
        error!("Error setting up MPR121: {}", e);
        return Err(eyre!("error setting up MPR121: {}", e));
    }
    debug!("{:?} initialized.", sensor);

    let phrases = load_phrases();

    info!("Ready. Touch an electrode, or press Ctrl+C to quit.");
    let result = App::new(sensor, led, speaker, &phrases, shutdown, poll_interval).run();

    // Whatever ended the loop, leave the LED dark
    if let Err(e) = led.off() {
        error!("Failed to switch the LED off: {}", e);
    }

    result.wrap_err("Touch sensor failed")?;

    info!("Interrupted, shut down cleanly.");
    Ok(())
}
