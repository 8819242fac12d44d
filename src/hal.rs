//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer for the fault indicator LEDs
//! ==============================================================================
//!
//! purpose:
//!     every node has three LEDs: green (healthy), amber (voltage fault) and
//!     red (current fault). the arbiter only ever talks to `IndicatorDriver`.
//!     the ingest process has a separate row of three mode LEDs (ADC / SD /
//!     UDP) behind `ModeDriver`. each trait has two implementations:
//!
//!     - mock (default build): keeps the lamp state in memory and logs writes.
//!     - real (feature = "hardware"): drives BCM pins through `rppal`.
//!
//! design philosophy:
//!     - "Compile Anywhere": The monitor should compile on any Linux box.
//!     - "Edge Writes": the real driver only touches a pin whose level differs.
//!
//! relationships:
//!     - used by: indicator.rs (IndicatorArbiter owns a Box<dyn IndicatorDriver>)
//!     - used by: command.rs (CommandPanel owns a Box<dyn ModeDriver>)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;
use serde::Serialize;

use crate::command::OperatingMode;
use crate::config::IndicatorConfig;
use crate::domain::NUM_NODES;

/// requested tri-color state for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Lamp {
    pub green: bool,
    /// voltage fault
    pub amber: bool,
    /// current fault
    pub red: bool,
}

impl Lamp {
    pub fn channels(self) -> [bool; 3] {
        [self.green, self.amber, self.red]
    }
}

pub trait IndicatorDriver: Send {
    /// set the tri-state for node `node` (0-based)
    fn set_lamp(&mut self, node: usize, lamp: Lamp) -> Result<()>;
}

/// the selected measurement source, shown on the ingest side
pub trait ModeDriver: Send {
    /// light exactly the LED for `mode`
    fn set_mode(&mut self, mode: OperatingMode) -> Result<()>;
}

/// [adc, sd, udp] levels for `mode`
pub fn mode_levels(mode: OperatingMode) -> [bool; 3] {
    [
        mode == OperatingMode::Adc,
        mode == OperatingMode::Sd,
        mode == OperatingMode::Udp,
    ]
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Hal {
    pins: [[u8; 3]; NUM_NODES],
    lamps: [Lamp; NUM_NODES],
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn new(config: &IndicatorConfig) -> Result<Self> {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Ok(Self {
            pins: config.pins,
            lamps: [Lamp::default(); NUM_NODES],
        })
    }

    pub fn lamps(&self) -> [Lamp; NUM_NODES] {
        self.lamps
    }
}

#[cfg(not(feature = "hardware"))]
impl IndicatorDriver for Hal {
    fn set_lamp(&mut self, node: usize, lamp: Lamp) -> Result<()> {
        if node >= NUM_NODES {
            anyhow::bail!("node index {} out of range", node);
        }
        self.lamps[node] = lamp;
        tracing::debug!(
            "[MOCK LED] Node {} pins {:?} -> G:{} A:{} R:{}",
            node + 1,
            self.pins[node],
            lamp.green as u8,
            lamp.amber as u8,
            lamp.red as u8
        );
        Ok(())
    }
}

#[cfg(not(feature = "hardware"))]
pub struct ModeLeds {
    pins: [u8; 3],
    lit: Option<OperatingMode>,
}

#[cfg(not(feature = "hardware"))]
impl ModeLeds {
    /// all three LEDs start dark until a mode is selected
    pub fn new(config: &IndicatorConfig) -> Result<Self> {
        Ok(Self { pins: config.mode_pins, lit: None })
    }

    pub fn lit(&self) -> Option<OperatingMode> {
        self.lit
    }
}

#[cfg(not(feature = "hardware"))]
impl ModeDriver for ModeLeds {
    fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
        self.lit = Some(mode);
        let [adc, sd, udp] = mode_levels(mode);
        tracing::debug!(
            "[MOCK LED] Mode pins {:?} -> ADC:{} SD:{} UDP:{}",
            self.pins,
            adc as u8,
            sd as u8,
            udp as u8
        );
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Hal {
    pins: Vec<[rppal::gpio::OutputPin; 3]>,
}

#[cfg(feature = "hardware")]
impl Hal {
    /// claims every indicator pin as an output and drives it low
    pub fn new(config: &IndicatorConfig) -> Result<Self> {
        use rppal::gpio::Gpio;

        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        let gpio = Gpio::new()?;
        let mut pins = Vec::with_capacity(NUM_NODES);
        for [g, a, r] in config.pins {
            pins.push([
                gpio.get(g)?.into_output_low(),
                gpio.get(a)?.into_output_low(),
                gpio.get(r)?.into_output_low(),
            ]);
        }
        Ok(Self { pins })
    }
}

#[cfg(feature = "hardware")]
impl IndicatorDriver for Hal {
    fn set_lamp(&mut self, node: usize, lamp: Lamp) -> Result<()> {
        let outputs = self
            .pins
            .get_mut(node)
            .ok_or_else(|| anyhow::anyhow!("node index {} out of range", node))?;

        for (pin, level) in outputs.iter_mut().zip(lamp.channels()) {
            if pin.is_set_high() != level {
                if level {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
            }
        }
        Ok(())
    }
}

#[cfg(feature = "hardware")]
pub struct ModeLeds {
    pins: [rppal::gpio::OutputPin; 3],
}

#[cfg(feature = "hardware")]
impl ModeLeds {
    pub fn new(config: &IndicatorConfig) -> Result<Self> {
        use rppal::gpio::Gpio;

        let gpio = Gpio::new()?;
        let [adc, sd, udp] = config.mode_pins;
        Ok(Self {
            pins: [
                gpio.get(adc)?.into_output_low(),
                gpio.get(sd)?.into_output_low(),
                gpio.get(udp)?.into_output_low(),
            ],
        })
    }
}

#[cfg(feature = "hardware")]
impl ModeDriver for ModeLeds {
    fn set_mode(&mut self, mode: OperatingMode) -> Result<()> {
        for (pin, level) in self.pins.iter_mut().zip(mode_levels(mode)) {
            if level {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        Ok(())
    }
}

#[cfg(all(test, not(feature = "hardware")))]
mod tests {
    use super::*;

    #[test]
    fn test_mock_hal_tracks_lamps() {
        let mut hal = Hal::new(&IndicatorConfig::default()).unwrap();
        let red = Lamp { red: true, ..Default::default() };
        hal.set_lamp(2, red).unwrap();
        assert_eq!(hal.lamps()[2], red);
        assert_eq!(hal.lamps()[0], Lamp::default());
    }

    #[test]
    fn test_mode_leds_light_exactly_one() {
        assert_eq!(mode_levels(OperatingMode::Adc), [true, false, false]);
        assert_eq!(mode_levels(OperatingMode::Udp), [false, false, true]);

        let mut leds = ModeLeds::new(&IndicatorConfig::default()).unwrap();
        assert_eq!(leds.lit(), None);
        leds.set_mode(OperatingMode::Sd).unwrap();
        assert_eq!(leds.lit(), Some(OperatingMode::Sd));
    }

    #[test]
    fn test_mock_hal_rejects_unknown_node() {
        let mut hal = Hal::new(&IndicatorConfig::default()).unwrap();
        assert!(hal.set_lamp(NUM_NODES, Lamp::default()).is_err());
    }
}
