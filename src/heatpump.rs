//! The heat pump collaborator.
//!
//! Serial framing and device command encoding live behind [HeatPump]; the
//! bridge only ever sees typed settings. Setters stage values which the
//! device applies on the next [HeatPump::update].

use log::debug;
use rand::Rng;

use crate::link::{Link, LinkError};
use crate::protocol::settings::*;


#[allow(async_fn_in_trait)]
pub trait HeatPump: Link {
    fn is_connected(&self) -> bool;

    /// Push staged settings to the device and read its current state back.
    async fn update(&mut self) -> Result<(), LinkError>;

    /// Last state read from the device.
    fn settings(&self) -> DeviceSettings;

    fn set_power(&mut self, power: Power);

    fn set_mode(&mut self, mode: Mode);

    fn set_fan(&mut self, fan: Fan);

    fn set_vane(&mut self, vane: Vane);

    fn set_wide_vane(&mut self, wide_vane: WideVane);

    fn set_temperature(&mut self, celsius: f32);

    /// Stage every known setting of `settings`. Unknown (`None`) fields are left alone.
    fn set_settings(&mut self, settings: &DeviceSettings) {
        if let Some(power) = settings.power {
            self.set_power(power);
        }
        if let Some(mode) = settings.mode {
            self.set_mode(mode);
        }
        if let Some(fan) = settings.fan {
            self.set_fan(fan);
        }
        if let Some(vane) = settings.vane {
            self.set_vane(vane);
        }
        if let Some(wide_vane) = settings.wide_vane {
            self.set_wide_vane(wide_vane);
        }
        if let Some(celsius) = settings.temperature {
            self.set_temperature(celsius);
        }
    }
}


/// In-memory heat pump.
///
/// Behaves like the real device as seen through the collaborator contract:
/// nothing is known until the first successful update, staged settings take
/// effect on `update()`, and the room temperature drifts towards the set point
/// while the unit is operating.
pub struct SimulatedHeatPump {
    connected: bool,
    synced: bool,
    current: DeviceSettings,
    staged: DeviceSettings,

    /// Probability in `[0, 1]` that a connect or update fails.
    pub failure_rate: f64,

    /// Fail this many connects/updates before succeeding again.
    pub fail_next: u32,

    /// Accept power commands without ever applying them.
    pub ignore_power: bool,

    /// Number of `set_power` calls seen.
    pub power_writes: u32,
}

impl SimulatedHeatPump {
    pub fn new(room_temperature: f32) -> Self {
        let current = DeviceSettings {
            power: Some(Power::Off),
            mode: Some(Mode::Auto),
            fan: Some(Fan::Auto),
            vane: Some(Vane::Auto),
            wide_vane: Some(WideVane::Center),
            temperature: Some(21.0),
            room_temperature: Some(room_temperature),
            operating: false,
            connected: false
        };

        Self {
            connected: false,
            synced: false,
            staged: current.clone(),
            current,
            failure_rate: 0.0,
            fail_next: 0,
            ignore_power: false,
            power_writes: 0
        }
    }

    fn io(&mut self) -> Result<(), LinkError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(LinkError::Transport("simulated failure".to_string()));
        }

        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate.min(1.0)) {
            return Err(LinkError::Transport("simulated random failure".to_string()));
        }

        Ok(())
    }

    fn simulate(&mut self) {
        let (Some(set_point), Some(room)) = (self.current.temperature, self.current.room_temperature) else {
            return;
        };

        let powered = self.current.power == Some(Power::On);
        let delta = set_point - room;

        self.current.operating = powered && delta.abs() > 0.5;

        if self.current.operating {
            self.current.room_temperature = Some(room + delta.clamp(-0.1, 0.1));
        }
    }
}

impl Default for SimulatedHeatPump {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl Link for SimulatedHeatPump {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.io()?;
        self.connected = true;
        self.current.connected = true;
        Ok(())
    }

    async fn reset(&mut self) {
        self.connected = false;
        self.current.connected = false;
    }
}

impl HeatPump for SimulatedHeatPump {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn update(&mut self) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }

        self.io()?;

        let power = if self.ignore_power { self.current.power } else { self.staged.power };

        self.current = DeviceSettings {
            power,
            room_temperature: self.current.room_temperature,
            operating: self.current.operating,
            connected: true,
            ..self.staged.clone()
        };
        self.staged.power = self.current.power;
        self.synced = true;

        self.simulate();

        debug!("simulated heat pump updated: {:?}", self.current);

        Ok(())
    }

    fn settings(&self) -> DeviceSettings {
        if self.synced {
            self.current.clone()
        } else {
            DeviceSettings {
                connected: self.connected,
                ..DeviceSettings::default()
            }
        }
    }

    fn set_power(&mut self, power: Power) {
        self.power_writes += 1;
        self.staged.power = Some(power);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.staged.mode = Some(mode);
    }

    fn set_fan(&mut self, fan: Fan) {
        self.staged.fan = Some(fan);
    }

    fn set_vane(&mut self, vane: Vane) {
        self.staged.vane = Some(vane);
    }

    fn set_wide_vane(&mut self, wide_vane: WideVane) {
        self.staged.wide_vane = Some(wide_vane);
    }

    fn set_temperature(&mut self, celsius: f32) {
        self.staged.temperature = Some(celsius);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nothing_known_before_first_update() {
        let mut hp = SimulatedHeatPump::default();
        assert_eq!(hp.settings(), DeviceSettings::default());

        hp.connect().await.unwrap();
        assert!(hp.settings().connected);
        assert_eq!(hp.settings().power, None);

        hp.update().await.unwrap();
        assert_eq!(hp.settings().power, Some(Power::Off));
        assert_eq!(hp.settings().mode, Some(Mode::Auto));
    }

    #[tokio::test]
    async fn test_staged_settings_apply_on_update() {
        let mut hp = SimulatedHeatPump::default();
        hp.connect().await.unwrap();

        hp.set_power(Power::On);
        hp.set_mode(Mode::Cool);
        hp.set_temperature(18.0);
        assert_eq!(hp.settings().power, None);

        hp.update().await.unwrap();
        let settings = hp.settings();
        assert_eq!(settings.power, Some(Power::On));
        assert_eq!(settings.mode, Some(Mode::Cool));
        assert_eq!(settings.temperature, Some(18.0));
        assert!(settings.operating);
        assert!(settings.room_temperature.unwrap() < 20.0);
    }

    #[tokio::test]
    async fn test_update_requires_connection() {
        let mut hp = SimulatedHeatPump::default();
        assert!(matches!(hp.update().await, Err(LinkError::NotConnected)));

        hp.fail_next = 1;
        assert!(hp.connect().await.is_err());
        assert!(hp.connect().await.is_ok());

        hp.reset().await;
        assert!(!hp.is_connected());
    }

    #[tokio::test]
    async fn test_ignored_power() {
        let mut hp = SimulatedHeatPump::default();
        hp.ignore_power = true;
        hp.connect().await.unwrap();

        hp.set_power(Power::On);
        hp.update().await.unwrap();

        assert_eq!(hp.settings().power, Some(Power::Off));
        assert_eq!(hp.power_writes, 1);
    }
}
