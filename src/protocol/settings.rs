use strum_macros::{Display, EnumString, IntoStaticStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Power {
    Off,
    On
}

impl Power {
    pub fn is_on(self) -> bool {
        self == Power::On
    }
}

impl From<bool> for Power {
    fn from(on: bool) -> Self {
        if on { Power::On } else { Power::Off }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Mode {
    Heat,
    Dry,
    Cool,
    Fan,
    Auto
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum Fan {
    #[strum(serialize = "AUTO")]
    Auto,
    #[strum(serialize = "QUIET")]
    Quiet,
    #[strum(serialize = "1")]
    Speed1,
    #[strum(serialize = "2")]
    Speed2,
    #[strum(serialize = "3")]
    Speed3,
    #[strum(serialize = "4")]
    Speed4
}

/// Vertical vane position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum Vane {
    #[strum(serialize = "AUTO")]
    Auto,
    #[strum(serialize = "1")]
    Position1,
    #[strum(serialize = "2")]
    Position2,
    #[strum(serialize = "3")]
    Position3,
    #[strum(serialize = "4")]
    Position4,
    #[strum(serialize = "5")]
    Position5,
    #[strum(serialize = "SWING")]
    Swing
}

/// Horizontal vane position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
pub enum WideVane {
    #[strum(serialize = "<<")]
    FarLeft,
    #[strum(serialize = "<")]
    Left,
    #[strum(serialize = "|")]
    Center,
    #[strum(serialize = ">")]
    Right,
    #[strum(serialize = ">>")]
    FarRight,
    #[strum(serialize = "<>")]
    Split,
    #[strum(serialize = "SWING")]
    Swing
}


/// Ordered string <-> index table for one setting category.
///
/// The position of a value in the table is its register index, so the
/// orderings below are part of the register map and must not change.
pub struct Table<T: 'static> {
    values: &'static [T]
}

impl<T> Table<T> where
    T: Copy + PartialEq + Into<&'static str>
{
    pub const fn new(values: &'static [T]) -> Self {
        Self { values }
    }

    pub fn index_of(&self, value: T) -> Option<u16> {
        self.values.iter()
            .position(|v| *v == value)
            .map(|idx| idx as u16)
    }

    pub fn get(&self, index: u16) -> Option<T> {
        self.values.get(index as usize).copied()
    }

    pub fn label(&self, index: u16) -> Option<&'static str> {
        self.get(index).map(Into::into)
    }
}

pub const POWER_TABLE: Table<Power> = Table::new(&[Power::Off, Power::On]);

pub const MODE_TABLE: Table<Mode> = Table::new(&[Mode::Heat, Mode::Dry, Mode::Cool, Mode::Fan, Mode::Auto]);

pub const FAN_TABLE: Table<Fan> = Table::new(&[
    Fan::Auto, Fan::Quiet, Fan::Speed1, Fan::Speed2, Fan::Speed3, Fan::Speed4
]);

pub const VANE_TABLE: Table<Vane> = Table::new(&[
    Vane::Auto, Vane::Position1, Vane::Position2, Vane::Position3, Vane::Position4, Vane::Position5, Vane::Swing
]);

pub const WIDE_VANE_TABLE: Table<WideVane> = Table::new(&[
    WideVane::FarLeft, WideVane::Left, WideVane::Center, WideVane::Right, WideVane::FarRight, WideVane::Split, WideVane::Swing
]);


/// Snapshot of the heat pump state as known to the bridge.
///
/// Setting fields are `None` until the device has reported them
/// (or when it reported a value outside the known tables).
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSettings {
    pub power: Option<Power>,

    pub mode: Option<Mode>,

    pub fan: Option<Fan>,

    pub vane: Option<Vane>,

    pub wide_vane: Option<WideVane>,

    /// Set point, °C
    pub temperature: Option<f32>,

    // read-only, observed

    /// Room temperature, °C
    pub room_temperature: Option<f32>,

    pub operating: bool,

    pub connected: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            power: None,
            mode: None,
            fan: None,
            vane: None,
            wide_vane: None,
            temperature: None,
            room_temperature: None,
            operating: false,
            connected: false
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bijection<T>(table: &Table<T>) where
        T: Copy + PartialEq + std::fmt::Debug + Into<&'static str> + std::str::FromStr
    {
        let len = table.values.len() as u16;

        for index in 0..len {
            let value = table.get(index).unwrap();
            assert_eq!(table.index_of(value), Some(index));

            let label: &'static str = value.into();
            assert_eq!(table.label(index), Some(label));

            let parsed = label.parse::<T>().ok().unwrap();
            assert_eq!(table.index_of(parsed), Some(index));
        }

        assert_eq!(table.get(len), None);
        assert_eq!(table.label(u16::MAX), None);
        assert!("BOGUS".parse::<T>().is_err());
        assert!("".parse::<T>().is_err());
    }

    #[test]
    fn test_tables_are_bijective() {
        assert_bijection(&POWER_TABLE);
        assert_bijection(&MODE_TABLE);
        assert_bijection(&FAN_TABLE);
        assert_bijection(&VANE_TABLE);
        assert_bijection(&WIDE_VANE_TABLE);
    }

    #[test]
    fn test_table_order() {
        let modes: Vec<&str> = MODE_TABLE.values.iter().map(|m| (*m).into()).collect();
        assert_eq!(modes, ["HEAT", "DRY", "COOL", "FAN", "AUTO"]);

        let fans: Vec<&str> = FAN_TABLE.values.iter().map(|f| (*f).into()).collect();
        assert_eq!(fans, ["AUTO", "QUIET", "1", "2", "3", "4"]);

        let vanes: Vec<&str> = VANE_TABLE.values.iter().map(|v| (*v).into()).collect();
        assert_eq!(vanes, ["AUTO", "1", "2", "3", "4", "5", "SWING"]);

        let wide: Vec<&str> = WIDE_VANE_TABLE.values.iter().map(|v| (*v).into()).collect();
        assert_eq!(wide, ["<<", "<", "|", ">", ">>", "<>", "SWING"]);

        assert_eq!(POWER_TABLE.index_of(Power::Off), Some(0));
        assert_eq!(POWER_TABLE.index_of(Power::On), Some(1));
    }

    #[test]
    fn test_labels_are_case_sensitive() {
        assert!("cool".parse::<Mode>().is_err());
        assert_eq!("COOL".parse::<Mode>().unwrap(), Mode::Cool);
    }
}
