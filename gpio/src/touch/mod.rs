mod mpr121;

use std::fmt::Debug;
use embedded_hal::i2c;
use thiserror::Error;
use crate::GpioError;
pub use mpr121::*;

/// The number of touch electrodes on the panel.
pub const ELECTRODE_COUNT: usize = 12;

const ELECTRODE_MASK: u16 = (1 << ELECTRODE_COUNT) - 1;

/// Errors reported by a touch controller.
///
/// The first five variants describe why the controller could not be brought up, and use the
/// wording printed to the console on a failed start.
#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum TouchError {
    #[error("incorrect address")]
    AddressUnknown,
    #[error("readback failure")]
    ReadbackFail,
    #[error("overcurrent on REXT pin")]
    Overcurrent,
    #[error("electrode out of range")]
    OutOfRange,
    #[error("not initialised")]
    NotInitialized,
    #[error("unknown error")]
    Unknown,
    #[error("I2C bus error: {0:?}")]
    Bus(i2c::ErrorKind),
    #[error(transparent)]
    Gpio(#[from] GpioError),
}

pub type TouchResult<T> = Result<T, TouchError>;

/// A capacitive touch controller with [`ELECTRODE_COUNT`] electrodes.
///
/// The per-electrode queries answer from the snapshot taken by the last
/// [`refresh`](TouchSensor::refresh), so they never touch the hardware.
pub trait TouchSensor: Debug {
    /// Brings the controller up. Every other call fails or reports nothing until this succeeds.
    fn begin(&mut self) -> TouchResult<()>;

    /// Whether the touch status changed since the last refresh.
    fn has_changed(&mut self) -> TouchResult<bool>;

    /// Pulls the latest touch status into the snapshot.
    fn refresh(&mut self) -> TouchResult<()>;

    /// Whether the electrode is touched in the current snapshot.
    fn is_touched(&self, electrode: usize) -> bool;

    /// Whether the electrode went from untouched to touched with the last refresh.
    fn is_new_touch(&self, electrode: usize) -> bool;

    /// Whether the electrode went from touched to untouched with the last refresh.
    fn is_new_release(&self, electrode: usize) -> bool;

    /// The number of electrodes touched in the current snapshot.
    fn touch_count(&self) -> usize;
}

/// The current and previous touch status words, one bit per electrode.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TouchSnapshot {
    current: u16,
    previous: u16,
}

impl TouchSnapshot {
    /// Shifts the current status into history and stores the new one.
    ///
    /// Bits above the electrode range (such as the proximity channel) are dropped.
    pub fn update(&mut self, status: u16) {
        self.previous = self.current;
        self.current = status & ELECTRODE_MASK;
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    pub fn is_touched(&self, electrode: usize) -> bool {
        electrode < ELECTRODE_COUNT && self.current & (1 << electrode) != 0
    }

    fn was_touched(&self, electrode: usize) -> bool {
        electrode < ELECTRODE_COUNT && self.previous & (1 << electrode) != 0
    }

    pub fn is_new_touch(&self, electrode: usize) -> bool {
        self.is_touched(electrode) && !self.was_touched(electrode)
    }

    pub fn is_new_release(&self, electrode: usize) -> bool {
        !self.is_touched(electrode) && self.was_touched(electrode)
    }

    pub fn touch_count(&self) -> usize {
        self.current.count_ones() as usize
    }
}
