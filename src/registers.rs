use std::collections::HashMap;
use std::sync::LazyLock;

/// The field-bus register family, which also determines the Modbus function used to access it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
pub enum RegisterKind {
    /// Single bit, readable and writable.
    #[strum(serialize = "coil")]
    CoilStatus,
    /// Single bit, read-only.
    #[strum(serialize = "discrete")]
    InputStatus,
    /// 16-bit word, read-only.
    #[strum(serialize = "input")]
    InputRegister,
    /// 16-bit word, readable and writable.
    #[strum(serialize = "holding")]
    HoldingRegister,
}

impl RegisterKind {
    // Convenience aliases for the nicely tabulated `for_each_register` macro definition below.
    pub const CS: Self = Self::CoilStatus;
    pub const IS: Self = Self::InputStatus;
    pub const IR: Self = Self::InputRegister;
    pub const HR: Self = Self::HoldingRegister;

    const ALL: [Self; 4] = [Self::CS, Self::IS, Self::IR, Self::HR];

    const fn bit(self) -> u8 {
        match self {
            Self::CoilStatus => 1 << 0,
            Self::InputStatus => 1 << 1,
            Self::InputRegister => 1 << 2,
            Self::HoldingRegister => 1 << 3,
        }
    }

    pub const fn is_bit(self) -> bool {
        matches!(self, Self::CoilStatus | Self::InputStatus)
    }

    pub const fn is_writable(self) -> bool {
        matches!(self, Self::CoilStatus | Self::HoldingRegister)
    }
}

impl serde::Serialize for RegisterKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.into())
    }
}

/// A set of [`RegisterKind`]s an operation is willing to accept.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct KindMask(u8);

impl KindMask {
    pub const COILS: Self = Self::of(RegisterKind::CoilStatus);
    pub const HOLDINGS: Self = Self::of(RegisterKind::HoldingRegister);
    /// Anything that reads back as a single bit.
    pub const BITS: Self = Self(RegisterKind::CS.bit() | RegisterKind::IS.bit());
    /// Anything that reads back as a 16-bit word.
    pub const WORDS: Self = Self(RegisterKind::IR.bit() | RegisterKind::HR.bit());
    pub const ANY: Self = Self(Self::BITS.0 | Self::WORDS.0);

    pub const fn of(kind: RegisterKind) -> Self {
        Self(kind.bit())
    }

    pub const fn contains(self, kind: RegisterKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl std::ops::BitOr for KindMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for KindMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds = RegisterKind::ALL.into_iter().filter(|k| self.contains(*k));
        match kinds.next() {
            None => f.write_str("-"),
            Some(first) => {
                f.write_str(first.into())?;
                for kind in kinds {
                    f.write_str("|")?;
                    f.write_str(kind.into())?;
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for KindMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// The controller hardware family.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Model {
    Mega,
    Inverter,
}

impl Model {
    const ALL: [Self; 2] = [Self::Mega, Self::Inverter];

    const fn bit(self) -> u8 {
        match self {
            Self::Mega => 1 << 0,
            Self::Inverter => 1 << 1,
        }
    }
}

impl serde::Serialize for Model {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.into())
    }
}

/// The set of [`Model`]s exposing a register.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Models(u8);

impl Models {
    pub const MEGA: Self = Self::of(Model::Mega);
    pub const INVERTER: Self = Self::of(Model::Inverter);
    pub const ALL: Self = Self(Self::MEGA.0 | Self::INVERTER.0);
    const M_: Self = Self::MEGA;
    const _I: Self = Self::INVERTER;
    const MI: Self = Self::ALL;

    pub const fn of(model: Model) -> Self {
        Self(model.bit())
    }

    pub const fn contains(self, model: Model) -> bool {
        self.0 & model.bit() != 0
    }
}

impl std::ops::BitOr for Models {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = Model::ALL
            .into_iter()
            .filter(|m| self.contains(*m))
            .map(<&'static str>::from)
            .collect::<Vec<_>>();
        if names.is_empty() { f.write_str("-") } else { f.write_str(&names.join("|")) }
    }
}

impl std::fmt::Debug for Models {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl serde::Serialize for Models {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq as _;
        let models = Model::ALL.into_iter().filter(|m| self.contains(*m));
        let mut seq = serializer.serialize_seq(None)?;
        for model in models {
            seq.serialize_element(&model)?;
        }
        seq.end()
    }
}

#[derive(Clone, Copy, Debug, serde::Serialize)]
pub struct RegisterDefinition {
    pub name: &'static str,
    pub kind: RegisterKind,
    pub address: u16,
    /// Nominal raw value as documented by the vendor. Informational only.
    pub default_value: i32,
    /// Divisor turning the raw value into the displayed one.
    pub scale: u16,
    pub models: Models,
    pub system: &'static str,
    pub subsystem: &'static str,
    pub description: &'static str,
}

impl RegisterDefinition {
    pub const fn is_supported_by(&self, model: Model) -> bool {
        self.models.contains(model)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("register `{0}` is defined more than once")]
    DuplicateName(&'static str),
}

/// An immutable table of register definitions indexed by name.
pub struct Catalog {
    definitions: &'static [RegisterDefinition],
    by_name: HashMap<&'static str, usize>,
}

impl Catalog {
    pub fn new(definitions: &'static [RegisterDefinition]) -> Result<Self, CatalogError> {
        let mut by_name = HashMap::with_capacity(definitions.len());
        for (index, definition) in definitions.iter().enumerate() {
            if by_name.insert(definition.name, index).is_some() {
                return Err(CatalogError::DuplicateName(definition.name));
            }
        }
        Ok(Self { definitions, by_name })
    }

    /// The catalog of all registers known for Thermia controllers.
    pub fn builtin() -> &'static Catalog {
        static BUILTIN: LazyLock<Catalog> = LazyLock::new(|| match Catalog::new(REGISTERS) {
            Ok(catalog) => catalog,
            Err(e) => unreachable!("{e}, but REGISTERS is checked for this at compile time"),
        });
        &BUILTIN
    }

    /// Find a register by its exact name, as long as its kind is one of `kinds`.
    pub fn lookup(&self, name: &str, kinds: KindMask) -> Option<&'static RegisterDefinition> {
        self.get(name).filter(|definition| kinds.contains(definition.kind))
    }

    /// Find a register by its exact name regardless of its kind.
    pub fn get(&self, name: &str) -> Option<&'static RegisterDefinition> {
        let definitions = self.definitions;
        self.by_name.get(name).map(|&index| &definitions[index])
    }

    pub fn iter(&self) -> std::slice::Iter<'static, RegisterDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

macro_rules! for_each_register {
    ($m:ident) => {
        $m! {
            // name, kind, address, default, scale, models, system, subsystem, description
            "enableHeatpumpHeat", CS, 3, 1, 1, MI, "heatpump", "heating", "Enable heating";
            "enableHeatpumpCooling", CS, 4, 0, 1, MI, "heatpump", "cooling", "Enable cooling";
            "enableHeatpumpHotWater", CS, 5, 1, 1, MI, "heatpump", "hotwater", "Enable hot water production";
            "enableHeatpumpPool", CS, 6, 0, 1, MI, "heatpump", "pool", "Enable pool heating";
            "enableHeatpumpHotWaterBoost", CS, 8, 0, 1, MI, "heatpump", "hotwater", "Temporarily raise the hot water stop temperature";
            "enableHeatpumpExternalHeaterBlock", CS, 12, 0, 1, M_, "heatpump", "heating", "Block the external additional heater";
            "enableHeatpumpSmartGridLock", CS, 14, 0, 1, _I, "heatpump", "control", "Smart grid blocking, compressor is not allowed to start";
            "enableHeatpumpResetAllAlarms", CS, 50, 0, 1, M_, "heatpump", "alarms", "Reset all alarms, write 1 to trigger";
            "enableHeatpumpResetHistoricAlarms", CS, 51, 0, 1, MI, "heatpump", "alarms", "Clear the alarm history";
            "alarmHeatpumpActiveClassA", IS, 0, 0, 1, MI, "heatpump", "alarms", "Any class A alarm is active, heat pump is stopped";
            "alarmHeatpumpActiveClassB", IS, 1, 0, 1, MI, "heatpump", "alarms", "Any class B alarm is active, heat pump runs with limitations";
            "alarmHeatpumpActiveClassC", IS, 2, 0, 1, MI, "heatpump", "alarms", "Any class C alarm is active, informational";
            "alarmHeatpumpBrineInSensor", IS, 10, 0, 1, MI, "heatpump", "brine", "Brine in temperature sensor is faulty";
            "alarmHeatpumpBrineOutSensor", IS, 11, 0, 1, MI, "heatpump", "brine", "Brine out temperature sensor is faulty";
            "alarmHeatpumpCondenserInSensor", IS, 12, 0, 1, MI, "heatpump", "condenser", "Condenser in temperature sensor is faulty";
            "alarmHeatpumpCondenserOutSensor", IS, 13, 0, 1, MI, "heatpump", "condenser", "Condenser out temperature sensor is faulty";
            "alarmHeatpumpOutdoorSensor", IS, 14, 0, 1, MI, "heatpump", "sensors", "Outdoor temperature sensor is faulty";
            "alarmHeatpumpHighPressureSwitch", IS, 16, 0, 1, MI, "heatpump", "compressor", "High pressure switch tripped";
            "alarmHeatpumpLowPressureLevel", IS, 17, 0, 1, MI, "heatpump", "compressor", "Low pressure level alarm";
            "alarmHeatpumpMotorCircuitBreaker", IS, 19, 0, 1, M_, "heatpump", "compressor", "Motor circuit breaker tripped";
            "alarmHeatpumpLowFlowBrine", IS, 20, 0, 1, MI, "heatpump", "brine", "Low brine flow";
            "alarmHeatpumpInverterCommunication", IS, 27, 0, 1, _I, "heatpump", "compressor", "Communication with the compressor inverter failed";
            "statusHeatpumpCompressorRunning", IS, 40, 0, 1, MI, "heatpump", "compressor", "Compressor is running";
            "statusHeatpumpBrinePumpRunning", IS, 41, 0, 1, MI, "heatpump", "brine", "Brine pump is running";
            "valueHeatpumpSupplyLineTemperature", IR, 5, 0, 10, MI, "heatpump", "heating", "Supply line temperature (°C)";
            "valueHeatpumpReturnLineTemperature", IR, 6, 0, 10, MI, "heatpump", "heating", "Return line temperature (°C)";
            "valueHeatpumpCondenserInTemperature", IR, 8, 0, 10, MI, "heatpump", "condenser", "Condenser in temperature (°C)";
            "valueHeatpumpCondenserOutTemperature", IR, 9, 0, 10, MI, "heatpump", "condenser", "Condenser out temperature (°C)";
            "valueHeatpumpBrineOutTemperature", IR, 11, 0, 10, MI, "heatpump", "brine", "Brine out temperature (°C)";
            "valueHeatpumpOutdoorTemperature", IR, 13, 0, 10, MI, "heatpump", "sensors", "Outdoor temperature (°C)";
            "valueHeatpumpHotWaterTemperature", IR, 17, 0, 10, MI, "heatpump", "hotwater", "Hot water tank temperature (°C)";
            "valueHeatpumpDischargePipeTemperature", IR, 20, 0, 10, MI, "heatpump", "compressor", "Compressor discharge pipe temperature (°C)";
            "valueHeatpumpRoomTemperature", IR, 28, 0, 10, MI, "heatpump", "sensors", "Room sensor temperature (°C)";
            "valueHeatpumpCompressorSpeedPercent", IR, 48, 0, 1, _I, "heatpump", "compressor", "Current compressor speed (%)";
            "valueHeatpumpCompressorCurrentL1", IR, 55, 0, 100, M_, "heatpump", "electrical", "Current on phase L1 (A)";
            "valueHeatpumpCompressorCurrentL2", IR, 56, 0, 100, M_, "heatpump", "electrical", "Current on phase L2 (A)";
            "valueHeatpumpCompressorCurrentL3", IR, 57, 0, 100, M_, "heatpump", "electrical", "Current on phase L3 (A)";
            "valueHeatpumpOperationalStatus", IR, 60, 0, 1, MI, "heatpump", "control", "Operational status, bit field of running functions";
            "valueHeatpumpCompressorStarts", IR, 70, 0, 1, MI, "heatpump", "compressor", "Number of compressor starts";
            "settingHeatpumpOperationalMode", HR, 0, 3, 1, MI, "heatpump", "control", "Operational mode: 0 off, 1 standby, 2 manual, 3 auto";
            "settingHeatpumpHeatCurve", HR, 3, 50, 10, MI, "heatpump", "heating", "Heating curve slope";
            "settingHeatpumpComfortWheel", HR, 5, 200, 10, MI, "heatpump", "heating", "Comfort wheel setting (°C)";
            "settingHeatpumpMaxSupplyLineTemperature", HR, 15, 550, 10, MI, "heatpump", "heating", "Maximum supply line temperature (°C)";
            "settingHeatpumpMinSupplyLineTemperature", HR, 16, 200, 10, MI, "heatpump", "heating", "Minimum supply line temperature (°C)";
            "settingHeatpumpHotWaterStartTemperature", HR, 22, 450, 10, MI, "heatpump", "hotwater", "Start hot water production below this temperature (°C)";
            "settingHeatpumpHotWaterStopTemperature", HR, 23, 520, 10, MI, "heatpump", "hotwater", "Stop hot water production above this temperature (°C)";
            "settingHeatpumpExternalHeaterSteps", HR, 30, 3, 1, M_, "heatpump", "heating", "Number of external heater steps allowed";
            "settingHeatpumpBrineOutMinimumTemperature", HR, 40, -50, 10, MI, "heatpump", "brine", "Minimum allowed brine out temperature (°C)";
            "settingHeatpumpCompressorMaxSpeed", HR, 48, 100, 1, _I, "heatpump", "compressor", "Maximum compressor speed (%)";
            "settingHeatpumpCompressorCurrentLimit", HR, 55, 1600, 100, M_, "heatpump", "electrical", "Phase current limit (A)";
            "valueHeatpumpBrineInTemperature", HR, 100, 0, 10, MI, "heatpump", "brine", "Brine in temperature (°C)";
        }
    };
}

macro_rules! make_definitions {
    ($($name: literal, $kind: ident, $address: literal, $default: literal, $scale: literal,
       $models: ident, $system: literal, $subsystem: literal, $description: literal;)+) => {
        /// The built-in register table.
        ///
        /// The table is illustrative until it is replaced by one generated from the controller's
        /// register list. Only `valueHeatpumpBrineInTemperature` (holding 100, scale 10) and
        /// `enableHeatpumpResetAllAlarms` (coil 50, mega only) have confirmed addresses. The other
        /// rows follow the controller's naming scheme at placeholder addresses, so check them
        /// against the installed controller's documentation before writing to them.
        pub static REGISTERS: &[RegisterDefinition] = &[$(RegisterDefinition {
            name: $name,
            kind: RegisterKind::$kind,
            address: $address,
            default_value: $default,
            scale: $scale,
            models: Models::$models,
            system: $system,
            subsystem: $subsystem,
            description: $description,
        }),*];
    };
}

for_each_register!(make_definitions);

const fn same_name(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut index = 0;
    while index < a.len() {
        if a[index] != b[index] {
            return false;
        }
        index += 1;
    }
    true
}

const _: () = const {
    let mut index = 0;
    while index < REGISTERS.len() {
        let mut other = index + 1;
        while other < REGISTERS.len() {
            if same_name(REGISTERS[index].name, REGISTERS[other].name) {
                panic!("REGISTERS contains a duplicate register name!");
            }
            other += 1;
        }
        assert!(REGISTERS[index].scale > 0, "register scale must be positive");
        index += 1;
    }
};

#[cfg(test)]
mod tests {
    use super::*;

    static WITH_DUPLICATE: &[RegisterDefinition] = &[
        RegisterDefinition {
            name: "valueSame",
            kind: RegisterKind::InputRegister,
            address: 1,
            default_value: 0,
            scale: 1,
            models: Models::ALL,
            system: "",
            subsystem: "",
            description: "",
        },
        RegisterDefinition {
            name: "valueSame",
            kind: RegisterKind::CoilStatus,
            address: 2,
            default_value: 0,
            scale: 1,
            models: Models::ALL,
            system: "",
            subsystem: "",
            description: "",
        },
    ];

    #[test]
    fn builtin_indexes_every_register() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.len(), REGISTERS.len());
        for definition in REGISTERS {
            let found = catalog.get(definition.name).expect("registered name resolves");
            assert_eq!(found.address, definition.address);
            assert_eq!(found.kind, definition.kind);
        }
    }

    #[test]
    fn lookup_is_deterministic() {
        let catalog = Catalog::builtin();
        let first = catalog.lookup("valueHeatpumpBrineInTemperature", KindMask::WORDS).unwrap();
        let second = catalog.lookup("valueHeatpumpBrineInTemperature", KindMask::WORDS).unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.address, 100);
        assert_eq!(first.scale, 10);
        assert_eq!(first.kind, RegisterKind::HoldingRegister);
    }

    #[test]
    fn lookup_filters_on_kind_after_name() {
        let catalog = Catalog::builtin();
        assert!(catalog.lookup("alarmHeatpumpBrineInSensor", KindMask::BITS).is_some());
        assert!(catalog.lookup("alarmHeatpumpBrineInSensor", KindMask::COILS).is_none());
        assert!(catalog.lookup("alarmHeatpumpBrineInSensor", KindMask::WORDS).is_none());
        assert!(catalog.lookup("valueHeatpumpOutdoorTemperature", KindMask::HOLDINGS).is_none());
        assert!(catalog.lookup("valueHeatpumpOutdoorTemperature", KindMask::ANY).is_some());
        assert!(catalog.lookup("valueheatpumpoutdoortemperature", KindMask::ANY).is_none());
        assert!(catalog.lookup("", KindMask::ANY).is_none());
    }

    #[test]
    fn model_applicability() {
        let catalog = Catalog::builtin();
        let reset = catalog.get("enableHeatpumpResetAllAlarms").unwrap();
        assert_eq!(reset.kind, RegisterKind::CoilStatus);
        assert_eq!(reset.address, 50);
        assert!(reset.is_supported_by(Model::Mega));
        assert!(!reset.is_supported_by(Model::Inverter));
        let speed = catalog.get("valueHeatpumpCompressorSpeedPercent").unwrap();
        assert!(!speed.is_supported_by(Model::Mega));
        assert!(speed.is_supported_by(Model::Inverter));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let Err(CatalogError::DuplicateName(name)) = Catalog::new(WITH_DUPLICATE) else {
            panic!("duplicate name was accepted");
        };
        assert_eq!(name, "valueSame");
    }

    #[test]
    fn masks_and_sets() {
        assert!(KindMask::BITS.contains(RegisterKind::CoilStatus));
        assert!(KindMask::BITS.contains(RegisterKind::InputStatus));
        assert!(!KindMask::BITS.contains(RegisterKind::HoldingRegister));
        assert_eq!(KindMask::COILS | KindMask::HOLDINGS, KindMask(0b1001));
        assert_eq!(KindMask::BITS.to_string(), "coil|discrete");
        assert_eq!(Models::MEGA | Models::INVERTER, Models::ALL);
        assert_eq!(Models::ALL.to_string(), "mega|inverter");
        assert_eq!(Models::INVERTER.to_string(), "inverter");
    }

    #[test]
    fn model_tokens() {
        assert_eq!("mega".parse::<Model>().unwrap(), Model::Mega);
        assert_eq!("inverter".parse::<Model>().unwrap(), Model::Inverter);
        assert!("MEGA2".parse::<Model>().is_err());
        assert_eq!(Model::Inverter.to_string(), "inverter");
    }
}
