mod app;
mod config;
mod lifecycle;
mod phrases;
mod speech;

use std::env::var;
use dotenv::dotenv;
use eyre::WrapErr;
use linux_embedded_hal::I2cdev;
use log::{debug, info};
use sysinfo::System;
use picap_gpio::{GpioActiveLevel, GpioBias, GpioDriver};
use picap_gpio::led::RgbLed;
use picap_gpio::raw::RawGpioDriver;
use picap_gpio::touch::Mpr121;
use crate::config::Config;
use crate::lifecycle::SHUTDOWN_REQUESTED;
use crate::phrases::Phrases;
use crate::speech::EspeakSpeaker;

fn init_logger() {
    let filters = var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();
}

fn log_system() {
    const UNKNOWN_STR: &str = "???";

    debug!(
        "Host {} running {} (kernel {}) on {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR),
        System::long_os_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
        System::cpu_arch(),
    );
}

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    init_logger();

    info!("PiCap TTS v{} starting...", env!("CARGO_PKG_VERSION"));
    log_system();

    lifecycle::install_shutdown_handler()?;

    let config = Config::load()?;
    debug!("{:?}", config);

    debug!("Initializing GPIO driver...");
    let gpio = RawGpioDriver::new_gpiomem().wrap_err("Cannot map GPIO registers")?;
    debug!("{:?} initialized.", gpio);

    debug!("Initializing MPR121...");
    let i2c = I2cdev::new(&config.i2c_bus)
        .wrap_err_with(|| format!("Cannot open I2C bus {}", config.i2c_bus.display()))?;

    let mut irq_pin = config.irq_pin.map(|pin| gpio.get_pin(pin)).transpose()?;
    if let Some(irq_pin) = irq_pin.as_mut() {
        // Open-drain, asserted low
        irq_pin.set_bias(GpioBias::PullUp)?;
        irq_pin.set_active_level(GpioActiveLevel::Low)?;
    }
    let irq = irq_pin.as_mut().map(|pin| pin.as_input()).transpose()?;

    let mut sensor = Mpr121::new(i2c, config.mpr121_address);
    if let Some(irq) = irq.as_deref() {
        sensor = sensor.with_irq(irq);
    }

    debug!("Initializing LED...");
    let mut led_bus = gpio.get_pin_bus(config.led_pins)?;
    if config.led_active_low {
        led_bus.set_active_level(GpioActiveLevel::Low)?;
    }
    let led_out = led_bus.as_output()?;
    let led = RgbLed::new(&*led_out);
    led.off()?;
    debug!("{:?} initialized.", led);

    let speaker = EspeakSpeaker::new(&config.espeak_bin, &config.player_bin)
        .with_voice(config.voice.clone());

    app::supervise(
        &mut sensor,
        &led,
        &speaker,
        || Phrases::load(&config.texts_dir),
        &SHUTDOWN_REQUESTED,
        config.poll_interval(),
    )
}
