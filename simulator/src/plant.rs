use serde_json::{Map, Value};

use plant_common::{Command, CommandKind, FieldNames};

const AMBIENT_C: f64 = 25.0;
const SUPPLY_VOLTAGE: f64 = 12.0;
const MAX_POWER_W: f64 = 60.0;
// °C per second gained per watt, and lost per degree above ambient.
const HEAT_GAIN: f64 = 0.02;
const HEAT_LOSS: f64 = 0.02;
// Watts per °C of error in closed loop.
const PROPORTIONAL_GAIN: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Open,
    Closed,
}

/// First-order thermal model of the heater plant.
#[derive(Debug, Clone)]
pub struct PlantModel {
    running: bool,
    mode: ControlMode,
    reference_c: f64,
    power_setting_w: f64,
    temperature_c: f64,
    power_w: f64,
}

impl Default for PlantModel {
    fn default() -> Self {
        Self {
            running: false,
            mode: ControlMode::Open,
            reference_c: 0.0,
            power_setting_w: 0.0,
            temperature_c: AMBIENT_C,
            power_w: 0.0,
        }
    }
}

impl PlantModel {
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    pub fn power_w(&self) -> f64 {
        self.power_w
    }

    pub fn apply(&mut self, command: &Command) {
        match (command.kind(), command.value()) {
            (CommandKind::Start, _) => self.running = true,
            (CommandKind::Stop, _) => self.running = false,
            (CommandKind::CloseLoop, _) => self.mode = ControlMode::Closed,
            (CommandKind::OpenLoop, _) => self.mode = ControlMode::Open,
            (CommandKind::SetReferenceTemp, Some(value)) => self.reference_c = value,
            (CommandKind::SetPower, Some(value)) => self.power_setting_w = value,
            _ => {}
        }
        self.power_w = self.commanded_power();
    }

    pub fn step(&mut self, dt_secs: f64) {
        self.power_w = self.commanded_power();
        let delta =
            HEAT_GAIN * self.power_w - HEAT_LOSS * (self.temperature_c - AMBIENT_C);
        self.temperature_c += delta * dt_secs;
    }

    fn commanded_power(&self) -> f64 {
        if !self.running {
            return 0.0;
        }
        let demand = match self.mode {
            ControlMode::Open => self.power_setting_w,
            ControlMode::Closed => PROPORTIONAL_GAIN * (self.reference_c - self.temperature_c),
        };
        demand.clamp(0.0, MAX_POWER_W)
    }

    /// Telemetry object keyed the way the given device vocabulary expects.
    pub fn payload(&self, fields: &FieldNames) -> Value {
        let (voltage, current) = if self.power_w > 0.0 {
            (SUPPLY_VOLTAGE, self.power_w / SUPPLY_VOLTAGE)
        } else {
            (0.0, 0.0)
        };

        let mut map = Map::new();
        map.insert(fields.temperature.clone(), round2(self.temperature_c).into());
        if let Some(key) = &fields.reference_temperature {
            map.insert(key.clone(), round2(self.reference_c).into());
        }
        map.insert(fields.voltage.clone(), round2(voltage).into());
        map.insert(fields.current.clone(), round2(current).into());
        map.insert(fields.power.clone(), round2(self.power_w).into());
        Value::Object(map)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
