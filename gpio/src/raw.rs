//! GPIO driver poking the BCM283x/BCM2711 GPIO registers through a memory map.
use crate::{GpioActiveLevel, GpioBias, GpioBus, GpioBusOutput, GpioDriver, GpioError, GpioInput, GpioPin, GpioResult};
use bitvec::vec::BitVec;
use log::{debug, trace};
use memmap2::{MmapOptions, MmapRaw};
use std::fmt::{Debug, Formatter};
use std::fs::{self, OpenOptions};
use std::sync::atomic::AtomicU8;
use std::thread;
use std::time::Duration;

/// The SoC family, which decides where the GPIO block lives and how pulls are set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Soc {
    /// Pi 1 and Pi Zero.
    Bcm2835,
    /// Pi 2 and Pi 3.
    Bcm2837,
    /// Pi 4.
    Bcm2711,
}

impl Soc {
    /// Physical address of the GPIO register block, used when mapping `/dev/mem`.
    pub fn gpio_base(self) -> u64 {
        match self {
            Soc::Bcm2835 => 0x2020_0000,
            Soc::Bcm2837 => 0x3F20_0000,
            Soc::Bcm2711 => 0xFE20_0000,
        }
    }

    /// Guesses the SoC from a device tree `compatible` string.
    pub fn from_compatible(compatible: &str) -> Soc {
        if compatible.contains("bcm2711") {
            Soc::Bcm2711
        } else if compatible.contains("bcm2835") && !compatible.contains("bcm2836") && !compatible.contains("bcm2837") {
            Soc::Bcm2835
        } else {
            Soc::Bcm2837
        }
    }

    /// Reads the SoC from the running kernel's device tree.
    pub fn detect() -> Soc {
        let compatible = fs::read("/proc/device-tree/compatible")
            .map(|bytes| String::from_utf8_lossy(&bytes).replace('\0', " "))
            .unwrap_or_default();
        Soc::from_compatible(&compatible)
    }
}

pub struct RawGpioDriver {
    mmap: MmapRaw,
    soc: Soc,
    used_pins: BitVec<AtomicU8>,
}

impl RawGpioDriver {
    const PIN_COUNT: usize = 54;

    // Register offsets, in bytes
    const GPSET0: usize = 0x1c;
    const GPCLR0: usize = 0x28;
    const GPLEV0: usize = 0x34;
    const GPPUD: usize = 0x94;
    const GPPUDCLK0: usize = 0x98;
    const GPIO_PUP_PDN_CNTRL_REG0: usize = 0xe4;

    fn create(path: &str, offset: u64, soc: Soc) -> GpioResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;

        let mmap = MmapOptions::new()
                .offset(offset)
                .len(4096)
                .map_raw(&file)?;

        debug!("Mapped GPIO registers from {} for {:?}", path, soc);

        Ok(RawGpioDriver {
            mmap,
            soc,
            used_pins: BitVec::repeat(false, Self::PIN_COUNT),
        })
    }

    /// Maps the GPIO block through `/dev/gpiomem`, which needs no root privileges.
    ///
    /// The device always starts at the GPIO block, so no offset is applied.
    pub fn new_gpiomem() -> GpioResult<Self> {
        Self::create("/dev/gpiomem", 0, Soc::detect())
    }

    /// Maps the GPIO block through `/dev/mem` at the physical address of the given SoC.
    pub fn new_mem(soc: Soc) -> GpioResult<Self> {
        Self::create("/dev/mem", soc.gpio_base(), soc)
    }

    fn register(&self, offset: usize) -> *mut u32 {
        let mmap = self.mmap.as_mut_ptr() as *mut u32;
        // SAFETY: every offset used below lies within the mapped 4 KiB page.
        unsafe { mmap.add(offset / 4) }
    }

    fn check_index(pin_index: usize) -> GpioResult<()> {
        if pin_index >= Self::PIN_COUNT {
            return Err(GpioError::InvalidArgument);
        }
        Ok(())
    }

    pub(crate) fn raw_set_pin_function(&self, pin_index: usize, function: u8) -> GpioResult<()> {
        if function > 0b111 {
            return Err(GpioError::InvalidArgument);
        }
        Self::check_index(pin_index)?;

        // GPFSELn register
        let register_ptr = self.register((pin_index / 10) * 4);
        let shift = (pin_index % 10) * 3;

        // SAFETY: the pointer comes from the live mapping and is 4-byte aligned.
        unsafe {
            let mut value = register_ptr.read_volatile();
            value &= !(0b111 << shift);
            value |= (function as u32) << shift;
            register_ptr.write_volatile(value);
        }

        trace!("Set pin function: pin_index={} function={}", pin_index, function);
        Ok(())
    }

    pub(crate) fn raw_set_pin_output(&self, pin_index: usize, high: bool) -> GpioResult<()> {
        Self::check_index(pin_index)?;

        let base = if high { Self::GPSET0 } else { Self::GPCLR0 };
        let register_ptr = self.register(base + (pin_index / 32) * 4);

        // SAFETY: GPSETn/GPCLRn are write-only and only the pin's own bit is set.
        unsafe { register_ptr.write_volatile(1 << (pin_index % 32)) };

        trace!("Set pin output: pin_index={} high={}", pin_index, high);
        Ok(())
    }

    pub(crate) fn raw_get_pin_level(&self, pin_index: usize) -> GpioResult<bool> {
        Self::check_index(pin_index)?;

        let register_ptr = self.register(Self::GPLEV0 + (pin_index / 32) * 4);
        // SAFETY: GPLEVn is read-only.
        let value = unsafe { register_ptr.read_volatile() };
        Ok((value >> (pin_index % 32)) & 1 != 0)
    }

    pub(crate) fn raw_set_bias(&self, pin_index: usize, bias: GpioBias) -> GpioResult<()> {
        Self::check_index(pin_index)?;

        match self.soc {
            Soc::Bcm2711 => {
                let bias_value = match bias {
                    GpioBias::None => 0b00,
                    GpioBias::PullUp => 0b01,
                    GpioBias::PullDown => 0b10,
                };
                // GPIO_PUP_PDN_CNTRL_REGn register (yes that is a long name)
                let register_ptr = self.register(Self::GPIO_PUP_PDN_CNTRL_REG0 + (pin_index / 16) * 4);
                let shift = (pin_index % 16) * 2;
                // SAFETY: read-modify-write of the pin's own two bits.
                unsafe {
                    let mut value = register_ptr.read_volatile();
                    value &= !(0b11 << shift);
                    value |= bias_value << shift;
                    register_ptr.write_volatile(value);
                }
            }
            Soc::Bcm2835 | Soc::Bcm2837 => {
                let bias_value = match bias {
                    GpioBias::None => 0b00,
                    GpioBias::PullDown => 0b01,
                    GpioBias::PullUp => 0b10,
                };
                let pud = self.register(Self::GPPUD);
                let clock = self.register(Self::GPPUDCLK0 + (pin_index / 32) * 4);
                // The control signal needs 150 cycles of set-up and hold time around the clock.
                // SAFETY: GPPUD and GPPUDCLKn are plain control registers within the mapping.
                unsafe {
                    pud.write_volatile(bias_value);
                    thread::sleep(Duration::from_micros(5));
                    clock.write_volatile(1 << (pin_index % 32));
                    thread::sleep(Duration::from_micros(5));
                    pud.write_volatile(0);
                    clock.write_volatile(0);
                }
            }
        }

        trace!("Set pin bias: pin_index={} bias={:?}", pin_index, bias);
        Ok(())
    }

    pub(crate) fn raw_reset(&self, pin_index: usize) -> GpioResult<()> {
        self.raw_set_pin_function(pin_index, 0)?;
        self.raw_set_bias(pin_index, GpioBias::None)?;
        Ok(())
    }

    fn claim(&self, index: usize) -> GpioResult<()> {
        Self::check_index(index)?;
        if self.used_pins[index] {
            return Err(GpioError::AlreadyInUse);
        }
        self.used_pins.set_aliased(index, true);
        Ok(())
    }
}

impl Debug for RawGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawGpioDriver({:?})", self.soc)
    }
}

impl GpioDriver for RawGpioDriver {
    fn count(&self) -> GpioResult<usize> {
        Ok(Self::PIN_COUNT)
    }

    fn get_pin(&self, index: usize) -> GpioResult<Box<dyn GpioPin + '_>> {
        self.claim(index)?;
        self.raw_reset(index)?;

        Ok(Box::new(RawGpioPin {
            driver: self,
            pin_index: index,
            active_level: GpioActiveLevel::High,
            bias: GpioBias::None,
        }))
    }

    fn get_pin_bus<const N: usize>(&self, indices: [usize; N]) -> GpioResult<Box<dyn GpioBus<N> + '_>> {
        if indices.iter().any(|&index| index >= Self::PIN_COUNT) {
            return Err(GpioError::InvalidArgument);
        }

        if indices.iter().any(|&index| self.used_pins[index]) {
            return Err(GpioError::AlreadyInUse);
        }

        for &index in &indices {
            self.claim(index)?;
            self.raw_reset(index)?;
        }

        Ok(Box::new(RawGpioBus {
            driver: self,
            pin_indices: indices,
            active_level: GpioActiveLevel::High,
        }))
    }
}

struct RawGpioPin<'a> {
    driver: &'a RawGpioDriver,
    pin_index: usize,
    active_level: GpioActiveLevel,
    bias: GpioBias,
}

impl Debug for RawGpioPin<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{}]", self.driver, self.pin_index)
    }
}

impl GpioPin for RawGpioPin<'_> {
    fn as_input(&mut self) -> GpioResult<Box<dyn GpioInput + '_>> {
        self.driver.raw_set_pin_function(self.pin_index, 0)?;
        Ok(Box::new(RawGpioInput { pin: self }))
    }

    fn active_level(&self) -> GpioActiveLevel {
        self.active_level
    }

    fn set_active_level(&mut self, level: GpioActiveLevel) -> GpioResult<()> {
        self.active_level = level;
        Ok(())
    }

    fn bias(&self) -> GpioBias {
        self.bias
    }

    fn set_bias(&mut self, bias: GpioBias) -> GpioResult<()> {
        self.driver.raw_set_bias(self.pin_index, bias)?;
        self.bias = bias;
        Ok(())
    }
}

impl Drop for RawGpioPin<'_> {
    fn drop(&mut self) {
        _ = self.driver.raw_set_pin_function(self.pin_index, 0);
        self.driver.used_pins.set_aliased(self.pin_index, false);
    }
}

struct RawGpioInput<'a> {
    pin: &'a RawGpioPin<'a>,
}

impl Debug for RawGpioInput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[input]", self.pin)
    }
}

impl GpioInput for RawGpioInput<'_> {
    fn read(&self) -> GpioResult<bool> {
        Ok(self.pin.active_level.get_state(self.pin.driver.raw_get_pin_level(self.pin.pin_index)?))
    }
}

struct RawGpioBus<'a, const N: usize> {
    driver: &'a RawGpioDriver,
    pin_indices: [usize; N],
    active_level: GpioActiveLevel,
}

impl<const N: usize> Debug for RawGpioBus<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}{:?}", self.driver, self.pin_indices)
    }
}

impl<const N: usize> GpioBus<N> for RawGpioBus<'_, N> {
    fn as_output(&mut self) -> GpioResult<Box<dyn GpioBusOutput<N> + '_>> {
        for &pin_index in &self.pin_indices {
            self.driver.raw_set_pin_function(pin_index, 1)?;
        }
        Ok(Box::new(RawGpioBusOutput { bus: self }))
    }

    fn active_level(&self) -> GpioActiveLevel {
        self.active_level
    }

    fn set_active_level(&mut self, level: GpioActiveLevel) -> GpioResult<()> {
        self.active_level = level;
        Ok(())
    }
}

impl<const N: usize> Drop for RawGpioBus<'_, N> {
    fn drop(&mut self) {
        for &pin_index in &self.pin_indices {
            _ = self.driver.raw_set_pin_function(pin_index, 0);
            self.driver.used_pins.set_aliased(pin_index, false);
        }
    }
}

struct RawGpioBusOutput<'a, const N: usize> {
    bus: &'a RawGpioBus<'a, N>,
}

impl<const N: usize> Debug for RawGpioBusOutput<'_, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[output]", self.bus)
    }
}

impl<const N: usize> GpioBusOutput<N> for RawGpioBusOutput<'_, N> {
    fn write(&self, values: &[bool; N]) -> GpioResult<()> {
        for (i, &pin_index) in self.bus.pin_indices.iter().enumerate() {
            self.bus.driver.raw_set_pin_output(pin_index, self.bus.active_level.get_state(values[i]))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soc_from_device_tree() {
        assert_eq!(Soc::from_compatible("raspberrypi,4-model-b brcm,bcm2711"), Soc::Bcm2711);
        assert_eq!(Soc::from_compatible("raspberrypi,3-model-b brcm,bcm2837"), Soc::Bcm2837);
        assert_eq!(Soc::from_compatible("raspberrypi,model-zero-w brcm,bcm2835"), Soc::Bcm2835);
        assert_eq!(Soc::from_compatible(""), Soc::Bcm2837);
    }

    #[test]
    fn gpio_base_per_soc() {
        assert_eq!(Soc::Bcm2837.gpio_base(), 0x3F20_0000);
        assert_eq!(Soc::Bcm2711.gpio_base(), 0xFE20_0000);
    }
}
