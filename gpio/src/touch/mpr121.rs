//! Driver for the NXP MPR121 12-electrode capacitive touch controller, as fitted to the
//! Bare Conductive Pi Cap.
//!
//! The controller is started with a fixed set of register values (see [`Mpr121Settings`]) and
//! then only its touch status registers are read. Change detection uses the IRQ line when one
//! is given, or compares the status registers with the last snapshot otherwise.
use std::fmt::{Debug, Formatter};
use log::{debug, info, warn};
use embedded_hal::i2c::{self, I2c};
use crate::touch::{TouchError, TouchResult, TouchSensor, TouchSnapshot, ELECTRODE_COUNT, ELECTRODE_MASK};
use crate::GpioInput;

// Register map
const TS1: u8 = 0x00;
const TS2: u8 = 0x01;
const OORS1: u8 = 0x02;
const MHDR: u8 = 0x2B;
const E0TTH: u8 = 0x41;
const E0RTH: u8 = 0x42;
const DTR: u8 = 0x5B;
const AFE1: u8 = 0x5C;
const AFE2: u8 = 0x5D;
const ECR: u8 = 0x5E;
const ACCR0: u8 = 0x7B;
const SRST: u8 = 0x80;

const SOFT_RESET: u8 = 0x63;
const AFE2_RESET_VALUE: u8 = 0x24;
const OVERCURRENT_BIT: u8 = 0x80;

/// The baseline filter of one data direction.
///
/// `mhd` is not used for the touched direction, whose register block has no MHD entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BaselineFilter {
    pub mhd: u8,
    pub nhd: u8,
    pub ncl: u8,
    pub fdl: u8,
}

/// Register values applied when the controller is started.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mpr121Settings {
    pub touch_threshold: u8,
    pub release_threshold: u8,
    pub rising: BaselineFilter,
    pub falling: BaselineFilter,
    pub touched: BaselineFilter,
    pub proximity_rising: BaselineFilter,
    pub proximity_falling: BaselineFilter,
    pub proximity_touched: BaselineFilter,
    pub debounce: u8,
    pub afe1: u8,
    pub afe2: u8,
    /// Electrode configuration, written last as it switches the controller to run mode.
    pub electrode_config: u8,
    /// ACCR0, ACCR1, USL, LSL and TL.
    pub autoconfig: [u8; 5],
}

impl Default for Mpr121Settings {
    fn default() -> Self {
        Mpr121Settings {
            touch_threshold: 40,
            release_threshold: 20,
            rising: BaselineFilter { mhd: 0x01, nhd: 0x01, ncl: 0x10, fdl: 0x20 },
            falling: BaselineFilter { mhd: 0x01, nhd: 0x01, ncl: 0x10, fdl: 0x20 },
            touched: BaselineFilter { mhd: 0x00, nhd: 0x01, ncl: 0x10, fdl: 0xFF },
            proximity_rising: BaselineFilter { mhd: 0x0F, nhd: 0x0F, ncl: 0x00, fdl: 0x00 },
            proximity_falling: BaselineFilter { mhd: 0x01, nhd: 0x01, ncl: 0xFF, fdl: 0xFF },
            proximity_touched: BaselineFilter { mhd: 0x00, nhd: 0x00, ncl: 0x00, fdl: 0x00 },
            debounce: 0x11,
            afe1: 0xFF,
            afe2: 0x30,
            // Baseline tracking enabled, proximity off, all 12 electrodes on
            electrode_config: 0xCC,
            autoconfig: [0x00; 5],
        }
    }
}

impl Mpr121Settings {
    /// The values of the consecutive filter registers starting at MHDR.
    fn filter_registers(&self) -> [u8; 22] {
        let [r, f, t, pr, pf, pt] = [
            self.rising,
            self.falling,
            self.touched,
            self.proximity_rising,
            self.proximity_falling,
            self.proximity_touched,
        ];
        [
            r.mhd, r.nhd, r.ncl, r.fdl,
            f.mhd, f.nhd, f.ncl, f.fdl,
            t.nhd, t.ncl, t.fdl,
            pr.mhd, pr.nhd, pr.ncl, pr.fdl,
            pf.mhd, pf.nhd, pf.ncl, pf.fdl,
            pt.nhd, pt.ncl, pt.fdl,
        ]
    }
}

/// The address the Pi Cap straps its MPR121 to.
pub const MPR121_DEFAULT_ADDRESS: u8 = 0x5C;

pub struct Mpr121<'a, I2C> {
    i2c: I2C,
    address: u8,
    settings: Mpr121Settings,
    irq: Option<&'a dyn GpioInput>,
    snapshot: TouchSnapshot,
    pending: Option<u16>,
    initialized: bool,
}

impl<'a, I2C: I2c> Mpr121<'a, I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Mpr121 {
            i2c,
            address,
            settings: Mpr121Settings::default(),
            irq: None,
            snapshot: TouchSnapshot::default(),
            pending: None,
            initialized: false,
        }
    }

    /// Replaces the register values applied by [`begin`](TouchSensor::begin).
    pub fn with_settings(mut self, settings: Mpr121Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Uses the controller's IRQ output for change detection.
    ///
    /// The input should report `true` while the line is asserted, i.e. it should be configured
    /// with a low active level.
    pub fn with_irq(mut self, irq: &'a dyn GpioInput) -> Self {
        self.irq = Some(irq);
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn reset(&mut self) -> TouchResult<()> {
        self.write_register(SRST, SOFT_RESET).map_err(no_answer)?;

        let afe2 = self.read_register(AFE2).map_err(no_answer)?;
        if afe2 != AFE2_RESET_VALUE {
            debug!("MPR121 AFE2 read back {:#04x} after reset", afe2);
            return Err(TouchError::ReadbackFail);
        }

        if self.read_register(TS2).map_err(no_answer)? & OVERCURRENT_BIT != 0 {
            return Err(TouchError::Overcurrent);
        }

        Ok(())
    }

    fn apply_settings(&mut self) -> Result<(), I2C::Error> {
        let settings = self.settings;

        // Most registers only accept writes in stop mode
        self.write_register(ECR, 0x00)?;

        for (i, value) in settings.filter_registers().into_iter().enumerate() {
            self.write_register(MHDR + i as u8, value)?;
        }

        for electrode in 0..=ELECTRODE_COUNT as u8 {
            self.write_register(E0TTH + electrode * 2, settings.touch_threshold)?;
            self.write_register(E0RTH + electrode * 2, settings.release_threshold)?;
        }

        self.write_register(DTR, settings.debounce)?;
        self.write_register(AFE1, settings.afe1)?;
        self.write_register(AFE2, settings.afe2)?;

        for (i, value) in settings.autoconfig.into_iter().enumerate() {
            self.write_register(ACCR0 + i as u8, value)?;
        }

        self.write_register(ECR, settings.electrode_config)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.address, &[register, value])
    }

    fn read_register(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut value = [0u8];
        self.i2c.write_read(self.address, &[register], &mut value)?;
        Ok(value[0])
    }

    /// Reads both touch status registers, which also releases the IRQ line.
    fn read_touch_status(&mut self) -> TouchResult<u16> {
        let mut status = [0u8; 2];
        self.i2c.write_read(self.address, &[TS1], &mut status).map_err(bus_error)?;
        if status[1] & OVERCURRENT_BIT != 0 {
            warn!("MPR121 reports overcurrent on REXT pin");
        }
        Ok(u16::from_le_bytes(status) & ELECTRODE_MASK)
    }

    fn ensure_initialized(&self) -> TouchResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(TouchError::NotInitialized)
        }
    }
}

/// During start-up a failed transfer means nothing acknowledged the address.
fn no_answer<E: i2c::Error>(err: E) -> TouchError {
    debug!("MPR121 did not answer: {:?}", err);
    TouchError::AddressUnknown
}

fn bus_error<E: i2c::Error>(err: E) -> TouchError {
    TouchError::Bus(err.kind())
}

impl<I2C> Debug for Mpr121<'_, I2C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mpr121(@ {:#04x}, IRQ: {:?})", self.address, self.irq)
    }
}

impl<I2C: I2c> TouchSensor for Mpr121<'_, I2C> {
    /// Resets the controller, applies its settings and starts measuring all electrodes.
    ///
    /// # Errors
    /// - `TouchError::AddressUnknown` if the address is not one the MPR121 can be strapped to,
    ///   or nothing answers on it.
    /// - `TouchError::ReadbackFail` if the controller does not read back its reset values.
    /// - `TouchError::Overcurrent` if the REXT pin is shorted.
    /// - `TouchError::OutOfRange` if an electrode reports out of range after starting.
    fn begin(&mut self) -> TouchResult<()> {
        self.initialized = false;
        self.snapshot = TouchSnapshot::default();
        self.pending = None;

        if !(0x5A..=0x5D).contains(&self.address) {
            return Err(TouchError::AddressUnknown);
        }

        self.reset()?;
        self.apply_settings().map_err(no_answer)?;

        let mut oor = [0u8; 2];
        self.i2c.write_read(self.address, &[OORS1], &mut oor).map_err(no_answer)?;
        if u16::from_le_bytes(oor) & ELECTRODE_MASK != 0 {
            return Err(TouchError::OutOfRange);
        }

        self.initialized = true;
        info!("MPR121 @ {:#04x} started, IRQ: {:?}", self.address, self.irq);
        Ok(())
    }

    fn has_changed(&mut self) -> TouchResult<bool> {
        self.ensure_initialized()?;

        if let Some(irq) = self.irq {
            return Ok(irq.read()?);
        }

        let status = self.read_touch_status()?;
        if status == self.snapshot.current() {
            self.pending = None;
            Ok(false)
        } else {
            self.pending = Some(status);
            Ok(true)
        }
    }

    fn refresh(&mut self) -> TouchResult<()> {
        self.ensure_initialized()?;

        let status = match self.pending.take() {
            Some(status) => status,
            None => self.read_touch_status()?,
        };
        self.snapshot.update(status);
        Ok(())
    }

    fn is_touched(&self, electrode: usize) -> bool {
        self.initialized && self.snapshot.is_touched(electrode)
    }

    fn is_new_touch(&self, electrode: usize) -> bool {
        self.initialized && self.snapshot.is_new_touch(electrode)
    }

    fn is_new_release(&self, electrode: usize) -> bool {
        self.initialized && self.snapshot.is_new_release(electrode)
    }

    fn touch_count(&self) -> usize {
        if self.initialized { self.snapshot.touch_count() } else { 0 }
    }
}
