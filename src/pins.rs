use std::fmt;
use std::{fs, io, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Logic level of a GPIO pin or LED.
#[derive(Debug, Default, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    #[default]
    Low,
    High,
}

impl From<bool> for Level {
    fn from(val: bool) -> Self {
        if val { Level::High } else { Level::Low }
    }
}

impl From<u8> for Level {
    fn from(val: u8) -> Self {
        if val != 0 { Level::High } else { Level::Low }
    }
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    In,
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("input"),
            Direction::Out => f.write_str("output"),
        }
    }
}

/// Edge transitions an input can be watched for.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Rising,
    Falling,
    Both,
}

impl Trigger {
    /// Whether an observed edge kind (`Rising` or `Falling`) qualifies
    /// under this trigger.
    pub fn matches(self, edge: Trigger) -> bool {
        match self {
            Trigger::Both => matches!(edge, Trigger::Rising | Trigger::Falling),
            other => other == edge,
        }
    }
}

/// Pull resistor hint accepted by `setup`. Validated but not applied;
/// see the advisory warning emitted at configuration time.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullUpDown {
    Off,
    Up,
    Down,
}

/// Onboard status LEDs exposed under `/sys/class/leds`.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Led {
    Red,
    Green,
}

impl Led {
    pub fn sysfs_name(self) -> &'static str {
        match self {
            Led::Red => "orangepi:red:status",
            Led::Green => "orangepi:green:pwr",
        }
    }
}

/// Pin numbering modes.
///
/// `Board` is the physical header position, `Bcm` the Broadcom-compatible
/// channel number, `Sunxi` the SoC GPIO number (see [`sunxi_pin`]).
/// `Custom` resolves through a caller-supplied [`PinMapping`].
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Board,
    Bcm,
    Sunxi,
    Custom,
}

/// Caller-supplied channel-to-pin translation used by [`Mode::Custom`].
pub trait PinMapping: Send + Sync {
    fn resolve(&self, channel: u32) -> Option<u32>;
}

impl PinMapping for FxHashMap<u32, u32> {
    fn resolve(&self, channel: u32) -> Option<u32> {
        self.get(&channel).copied()
    }
}

/// Loads a custom channel-to-pin mapping from a JSON object of the form
/// `{"11": 21, "12": 22}`.
pub fn load_mapping<P: AsRef<Path>>(path: P) -> Result<FxHashMap<u32, u32>> {
    let contents = fs::read_to_string(&path)?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Translates a sunxi pin label such as `"PA06"` or `"PG7"` into the SoC
/// GPIO number used by the control surface.
pub fn sunxi_pin(label: &str) -> Result<u32> {
    let unknown = || Error::UnknownChannel(label.to_string());

    let normalized = label.trim().to_ascii_uppercase();
    let bytes = normalized.as_bytes();
    if bytes.len() < 3 || bytes[0] != b'P' || !bytes[1].is_ascii_uppercase() {
        return Err(unknown());
    }

    let port = u32::from(bytes[1] - b'A');
    let index: u32 = normalized[2..].parse().map_err(|_| unknown())?;
    if index >= 32 {
        return Err(unknown());
    }
    Ok(port * 32 + index)
}

/// Resolves a logical channel to its physical GPIO number under `mode`.
pub(crate) fn resolve(
    mode: Mode,
    custom: Option<&dyn PinMapping>,
    channel: u32,
) -> Result<u32> {
    let pin = match mode {
        Mode::Board => board_pin(channel),
        Mode::Bcm => bcm_pin(channel),
        // sunxi channels already are SoC GPIO numbers
        Mode::Sunxi => Some(channel),
        Mode::Custom => custom.and_then(|m| m.resolve(channel)),
    };
    pin.ok_or_else(|| Error::UnknownChannel(channel.to_string()))
}

// Physical header position to SoC GPIO number, Orange Pi Zero 26-pin header.
fn board_pin(channel: u32) -> Option<u32> {
    let pin = match channel {
        3 => 12,
        5 => 11,
        7 => 6,
        8 => 198,
        10 => 199,
        11 => 1,
        12 => 7,
        13 => 0,
        15 => 3,
        16 => 19,
        18 => 18,
        19 => 15,
        21 => 16,
        22 => 2,
        23 => 14,
        24 => 13,
        26 => 10,
        _ => return None,
    };
    Some(pin)
}

// Broadcom-compatible channel number to SoC GPIO number.
fn bcm_pin(channel: u32) -> Option<u32> {
    let pin = match channel {
        2 => 12,
        3 => 11,
        4 => 6,
        7 => 10,
        8 => 13,
        9 => 16,
        10 => 15,
        11 => 14,
        14 => 198,
        15 => 199,
        17 => 1,
        18 => 7,
        22 => 3,
        23 => 19,
        24 => 18,
        25 => 2,
        27 => 0,
        _ => return None,
    };
    Some(pin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sunxi_labels_follow_port_formula() {
        assert_eq!(sunxi_pin("PA0").unwrap(), 0);
        assert_eq!(sunxi_pin("PA06").unwrap(), 6);
        assert_eq!(sunxi_pin("pg7").unwrap(), 6 * 32 + 7);
        assert_eq!(sunxi_pin(" PL3 ").unwrap(), 11 * 32 + 3);
    }

    #[test]
    fn sunxi_rejects_malformed_labels() {
        for label in ["", "PA", "A6", "P06", "PA32", "PAxx"] {
            assert!(matches!(sunxi_pin(label), Err(Error::UnknownChannel(_))));
        }
    }

    #[test]
    fn board_and_bcm_tables_agree_on_shared_pins() {
        // channel 12 on the physical header is BCM 18, both land on PA07
        assert_eq!(board_pin(12), Some(7));
        assert_eq!(bcm_pin(18), Some(7));
        assert_eq!(board_pin(2), None);
    }

    #[test]
    fn custom_mapping_resolves_through_the_table() {
        let mut map = FxHashMap::default();
        map.insert(11u32, 21u32);
        assert_eq!(resolve(Mode::Custom, Some(&map), 11).unwrap(), 21);
        assert!(resolve(Mode::Custom, Some(&map), 12).is_err());
    }

    #[test]
    fn trigger_matching_honors_both() {
        assert!(Trigger::Both.matches(Trigger::Rising));
        assert!(Trigger::Both.matches(Trigger::Falling));
        assert!(Trigger::Rising.matches(Trigger::Rising));
        assert!(!Trigger::Rising.matches(Trigger::Falling));
    }
}
