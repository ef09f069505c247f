use std::env::var_os;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use eyre::{eyre, WrapErr};
use serde::{Serialize, Deserialize};
use picap_gpio::touch::MPR121_DEFAULT_ADDRESS;

/// Runtime configuration.
///
/// Read from the JSON file named by `CONFIG_FILE` (default `picap.json`) when it exists, then
/// overridden field by field from `PICAP_*` environment variables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The i2c-dev device the MPR121 sits on.
    pub i2c_bus: PathBuf,
    pub mpr121_address: u8,
    /// BCM number of the pin wired to the MPR121 IRQ output, if any.
    pub irq_pin: Option<usize>,
    /// BCM numbers of the red, green and blue LED pins.
    pub led_pins: [usize; 3],
    pub led_active_low: bool,
    /// Directory holding `TEXT000.txt` to `TEXT011.txt`.
    pub texts_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub espeak_bin: String,
    pub player_bin: String,
    pub voice: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            i2c_bus: PathBuf::from("/dev/i2c-1"),
            mpr121_address: MPR121_DEFAULT_ADDRESS,
            irq_pin: Some(4),
            led_pins: [6, 5, 26],
            led_active_low: true,
            texts_dir: PathBuf::from("texts"),
            poll_interval_ms: 10,
            espeak_bin: "espeak".to_string(),
            player_bin: "aplay".to_string(),
            voice: None,
        }
    }
}

impl Config {
    /// Loads the config file if present and applies environment overrides.
    pub fn load() -> eyre::Result<Self> {
        let config_str = var_os("CONFIG_FILE");
        let config_str: &OsStr = config_str.as_deref().unwrap_or(OsStr::new("picap.json"));
        let mut config = Config::try_load(Path::new(config_str))?.unwrap_or_default();
        config.apply_overrides(|key| dotenv::var(key).ok())?;
        Ok(config)
    }

    /// Reads a config file, or returns `None` if there is none.
    pub fn try_load(config_path: &Path) -> eyre::Result<Option<Self>> {
        if !config_path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(config_path)
            .wrap_err_with(|| format!("Cannot open {}", config_path.display()))?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .wrap_err_with(|| format!("Invalid config file {}", config_path.display()))?;
        Ok(Some(config))
    }

    /// Overrides fields with the `PICAP_*` values found by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<()> {
        if let Some(value) = lookup("PICAP_I2C_BUS") {
            self.i2c_bus = PathBuf::from(value);
        }
        if let Some(value) = lookup("PICAP_MPR121_ADDRESS") {
            self.mpr121_address = parse_address(&value)
                .wrap_err("Invalid PICAP_MPR121_ADDRESS")?;
        }
        if let Some(value) = lookup("PICAP_IRQ_PIN") {
            self.irq_pin = match value.trim() {
                "" | "none" => None,
                pin => Some(pin.parse::<usize>().wrap_err("Invalid PICAP_IRQ_PIN")?),
            };
        }
        if let Some(value) = lookup("PICAP_LED_PINS") {
            self.led_pins = parse_pin_bus(&value).wrap_err("Invalid PICAP_LED_PINS")?;
        }
        if let Some(value) = lookup("PICAP_LED_ACTIVE_LOW") {
            self.led_active_low = value.trim().parse::<bool>().wrap_err("Invalid PICAP_LED_ACTIVE_LOW")?;
        }
        if let Some(value) = lookup("PICAP_TEXTS_DIR") {
            self.texts_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("PICAP_POLL_INTERVAL_MS") {
            self.poll_interval_ms = value.trim().parse::<u64>().wrap_err("Invalid PICAP_POLL_INTERVAL_MS")?;
        }
        if let Some(value) = lookup("PICAP_ESPEAK_BIN") {
            self.espeak_bin = value;
        }
        if let Some(value) = lookup("PICAP_PLAYER_BIN") {
            self.player_bin = value;
        }
        if let Some(value) = lookup("PICAP_VOICE") {
            self.voice = Some(value).filter(|voice| !voice.is_empty());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Parses an I2C address in decimal or `0x` hexadecimal.
fn parse_address(value: &str) -> eyre::Result<u8> {
    let value = value.trim();
    let address = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16)?,
        None => value.parse()?,
    };
    Ok(address)
}

fn parse_pin_bus<const N: usize>(pin_str: &str) -> eyre::Result<[usize; N]> {
    pin_str
        .split([',', ' ', ';'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()?
        .try_into()
        .map_err(|_| eyre!("Expected {} pins", N))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_pi_cap() {
        let config = Config::default();
        assert_eq!(config.mpr121_address, 0x5C);
        assert_eq!(config.led_pins, [6, 5, 26]);
        assert_eq!(config.irq_pin, Some(4));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let loaded = Config::try_load(Path::new("/nonexistent/picap.json")).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "texts_dir": "/srv/texts", "irq_pin": null }}"#).unwrap();

        let config = Config::try_load(file.path()).unwrap().unwrap();
        assert_eq!(config.texts_dir, PathBuf::from("/srv/texts"));
        assert_eq!(config.irq_pin, None);
        assert_eq!(config.i2c_bus, PathBuf::from("/dev/i2c-1"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(Config::try_load(file.path()).is_err());
    }

    #[test]
    fn environment_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("PICAP_MPR121_ADDRESS", "0x5a"),
                ("PICAP_IRQ_PIN", "none"),
                ("PICAP_LED_PINS", "17; 27, 22"),
                ("PICAP_LED_ACTIVE_LOW", "false"),
                ("PICAP_POLL_INTERVAL_MS", "25"),
                ("PICAP_VOICE", "en-gb"),
            ]))
            .unwrap();

        assert_eq!(config.mpr121_address, 0x5A);
        assert_eq!(config.irq_pin, None);
        assert_eq!(config.led_pins, [17, 27, 22]);
        assert!(!config.led_active_low);
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.voice.as_deref(), Some("en-gb"));
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let mut config = Config::default();
        assert!(config.apply_overrides(lookup(&[("PICAP_LED_PINS", "6,5")])).is_err());
        assert!(config.apply_overrides(lookup(&[("PICAP_MPR121_ADDRESS", "0x1ff")])).is_err());
        assert!(config.apply_overrides(lookup(&[("PICAP_IRQ_PIN", "four")])).is_err());
    }

    #[test]
    fn decimal_addresses_parse() {
        assert_eq!(parse_address("92").unwrap(), 0x5C);
        assert_eq!(parse_address(" 0X5D ").unwrap(), 0x5D);
    }
}
