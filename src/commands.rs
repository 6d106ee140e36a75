use crate::connection::{self, Connection};
use crate::modbus;
use crate::output;
use crate::registers::Model;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not start the async runtime")]
    Runtime(#[source] std::io::Error),
    #[error("register `{0}` is not known")]
    UnknownRegister(String),
    #[error("register `{0}` is read-only")]
    ReadOnlyRegister(String),
    #[error("{0} is not an integer, pass --display to write a value in display units")]
    NotAnInteger(f64),
    #[error("{0} does not fit in a 16-bit register")]
    OutOfRange(f64),
    #[error("could not communicate with the heat pump")]
    Connection(#[source] connection::Error),
    #[error(transparent)]
    Output(#[from] output::Error),
}

/// Where the heat pump is and what it is.
#[derive(clap::Parser, Clone)]
#[group(id = "commands::Target")]
pub struct Target {
    /// Host name or IP address of the heat pump's Modbus TCP interface.
    address: String,
    /// The controller model, which determines the registers that exist.
    #[arg(value_enum)]
    model: Model,
    #[arg(long, default_value_t = modbus::DEFAULT_PORT)]
    port: u16,
}

impl Target {
    async fn open<'c>(
        &self,
        connection: &'c mut Connection,
    ) -> Result<&'c mut connection::Session, Error> {
        connection.open(&self.address, self.port, self.model).await.map_err(Error::Connection)
    }
}

/// Talking to the device is strictly sequential, so everything runs on the current thread.
fn block_on<F: std::future::Future<Output = Result<(), Error>>>(future: F) -> Result<(), Error> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)?
        .block_on(future)
}

pub mod registers {
    use super::Error;
    use crate::output;
    use crate::registers::{Catalog, Model, RegisterDefinition};

    const HEADERS: &[&str] = &[
        "Name",
        "Kind",
        "Address",
        "Default",
        "Scale",
        "Mega",
        "Inverter",
        "System",
        "Subsystem",
        "Description",
    ];

    /// Search and output known registers.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list registers whose name, classification, description or address contain this.
        filter: Option<String>,
        /// Only list registers available on this model.
        #[arg(long, short = 'm', value_enum)]
        model: Option<Model>,
        #[clap(flatten)]
        output: output::Args,
    }

    pub fn is_match(register: &RegisterDefinition, pattern: &str) -> bool {
        let pattern = pattern.to_uppercase();
        [register.name, register.system, register.subsystem, register.description]
            .iter()
            .any(|field| field.to_uppercase().contains(&pattern))
            || register.address.to_string().contains(&pattern)
    }

    fn flag(set: bool) -> String {
        if set { "1" } else { "0" }.to_string()
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output(HEADERS)?;
        for register in Catalog::builtin().iter() {
            if let Some(pattern) = &args.filter {
                if !is_match(register, pattern) {
                    continue;
                }
            }
            if let Some(model) = args.model {
                if !register.is_supported_by(model) {
                    continue;
                }
            }
            output.record(
                || {
                    vec![
                        register.name.to_string(),
                        register.kind.to_string(),
                        register.address.to_string(),
                        register.default_value.to_string(),
                        register.scale.to_string(),
                        flag(register.is_supported_by(Model::Mega)),
                        flag(register.is_supported_by(Model::Inverter)),
                        register.system.to_string(),
                        register.subsystem.to_string(),
                        register.description.to_string(),
                    ]
                },
                || register,
            )?;
        }
        Ok(output.commit()?)
    }
}

pub mod read {
    use super::{Error, Target};
    use crate::connection::{Connection, Session};
    use crate::output::{self, Output};
    use crate::registers::{Catalog, RegisterDefinition};
    use crate::scaling::Scaled;
    use tracing::warn;

    /// Read registers from the heat pump.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        target: Target,
        /// Names of the registers to read.
        #[arg(required = true)]
        names: Vec<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(serde::Serialize)]
    struct Record {
        register: &'static str,
        raw: i32,
        value: Scaled,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        super::block_on(read(args))
    }

    async fn read(args: Args) -> Result<(), Error> {
        let catalog = Catalog::builtin();
        let registers = args
            .names
            .iter()
            .map(|name| catalog.get(name).ok_or_else(|| Error::UnknownRegister(name.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let mut output = args.output.to_output(&["Register", "Raw", "Value"])?;
        let mut connection: Connection = Connection::new();
        let result = match args.target.open(&mut connection).await {
            Ok(session) => read_all(session, &registers, &mut output).await,
            Err(e) => Err(e),
        };
        connection.close().await;
        result?;
        Ok(output.commit()?)
    }

    async fn read_all(
        session: &mut Session,
        registers: &[&'static RegisterDefinition],
        output: &mut Output,
    ) -> Result<(), Error> {
        for register in registers {
            let raw = if register.kind.is_bit() {
                session.read_bit(register.name).await.map(i32::from)
            } else {
                session.read_int(register.name).await.map(i32::from)
            };
            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        message = "could not read register",
                        register = register.name,
                        error = (&e as &dyn std::error::Error)
                    );
                    continue;
                }
            };
            let value = Scaled::new(raw, register.scale);
            output.record(
                || {
                    let scaled = if register.scale > 1 { value.to_string() } else { String::new() };
                    vec![register.name.to_string(), raw.to_string(), scaled]
                },
                || Record { register: register.name, raw, value },
            )?;
        }
        Ok(())
    }
}

pub mod write {
    use super::{Error, Target};
    use crate::connection::Connection;
    use crate::output;
    use crate::registers::{Catalog, RegisterKind};
    use crate::scaling;

    /// Write a register of the heat pump.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        target: Target,
        /// Name of the coil or holding register to write.
        name: String,
        /// The raw value to write, 0 or 1 for coils.
        #[arg(allow_negative_numbers = true)]
        value: f64,
        /// Interpret the value in display units and scale it before writing.
        #[arg(long)]
        display: bool,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(serde::Serialize)]
    struct Record<'a> {
        register: &'a str,
        raw: i32,
    }

    pub fn run(args: Args) -> Result<(), Error> {
        super::block_on(write(args))
    }

    /// The raw value to send, accepting anything that is a valid signed or unsigned 16-bit word.
    pub fn raw_value(value: f64, display: bool, scale: u16) -> Result<i32, Error> {
        if !value.is_finite() {
            return Err(Error::OutOfRange(value));
        }
        let raw = if display {
            scaling::to_raw(value, scale)
        } else if value.fract() == 0.0 {
            value as i32
        } else {
            return Err(Error::NotAnInteger(value));
        };
        // Conversions saturate, so anything out of range stays out of range.
        if !(i32::from(i16::MIN)..=i32::from(u16::MAX)).contains(&raw) {
            return Err(Error::OutOfRange(value));
        }
        Ok(raw)
    }

    async fn write(args: Args) -> Result<(), Error> {
        let catalog = Catalog::builtin();
        let Some(register) = catalog.get(&args.name) else {
            return Err(Error::UnknownRegister(args.name));
        };
        if !register.kind.is_writable() {
            return Err(Error::ReadOnlyRegister(args.name));
        }
        let raw = raw_value(args.value, args.display, register.scale)?;
        let mut output = args.output.to_output(&["Register", "Raw"])?;
        let mut connection: Connection = Connection::new();
        let result = match args.target.open(&mut connection).await {
            Ok(session) if register.kind == RegisterKind::CoilStatus => {
                session.write_bit(register.name, raw != 0).await.map_err(Error::Connection)
            }
            Ok(session) => session.write_int(register.name, raw).await.map_err(Error::Connection),
            Err(e) => Err(e),
        };
        connection.close().await;
        result?;
        let raw = if register.kind == RegisterKind::CoilStatus { i32::from(raw != 0) } else { raw };
        output.record(
            || vec![register.name.to_string(), raw.to_string()],
            || Record { register: register.name, raw },
        )?;
        Ok(output.commit()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Catalog;
    use clap::Parser as _;

    #[test]
    fn model_is_validated_at_startup() {
        let args = ["read", "192.168.0.106", "mega", "valueHeatpumpBrineInTemperature"];
        assert!(read::Args::try_parse_from(args).is_ok());
        let args = ["read", "192.168.0.106", "inverter", "a", "b", "--port", "5020"];
        assert!(read::Args::try_parse_from(args).is_ok());
        let args = ["read", "192.168.0.106", "mega2", "valueHeatpumpBrineInTemperature"];
        assert!(read::Args::try_parse_from(args).is_err());
        assert!(read::Args::try_parse_from(["read", "192.168.0.106", "mega"]).is_err());
    }

    #[test]
    fn write_accepts_negative_values() {
        let name = "settingHeatpumpBrineOutMinimumTemperature";
        let args = ["write", "heatpump", "mega", name, "-50"];
        assert!(write::Args::try_parse_from(args).is_ok());
        let args = ["write", "heatpump", "mega", "settingHeatpumpHeatCurve", "5.5", "--display"];
        assert!(write::Args::try_parse_from(args).is_ok());
        assert!(write::Args::try_parse_from(["write", "heatpump", "mega", "x"]).is_err());
    }

    #[test]
    fn write_values_must_fit_a_register() {
        assert_eq!(write::raw_value(-50.0, false, 10).unwrap(), -50);
        assert_eq!(write::raw_value(65535.0, false, 1).unwrap(), 65535);
        assert_eq!(write::raw_value(-32768.0, false, 1).unwrap(), -32768);
        assert_eq!(write::raw_value(5.5, true, 10).unwrap(), 55);
        assert!(matches!(write::raw_value(5.5, false, 10), Err(Error::NotAnInteger(_))));
        assert!(matches!(write::raw_value(65536.0, false, 1), Err(Error::OutOfRange(_))));
        assert!(matches!(write::raw_value(-32769.0, false, 1), Err(Error::OutOfRange(_))));
        assert!(matches!(write::raw_value(1e20, false, 1), Err(Error::OutOfRange(_))));
        assert!(matches!(write::raw_value(-1e20, false, 1), Err(Error::OutOfRange(_))));
        assert!(matches!(write::raw_value(7000.0, true, 10), Err(Error::OutOfRange(_))));
        assert!(matches!(write::raw_value(f64::NAN, true, 10), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn register_filter() {
        let catalog = Catalog::builtin();
        let brine_in = catalog.get("valueHeatpumpBrineInTemperature").unwrap();
        assert!(registers::is_match(brine_in, "brinein"));
        assert!(registers::is_match(brine_in, "BRINE IN TEMP"));
        assert!(registers::is_match(brine_in, "100"));
        assert!(!registers::is_match(brine_in, "hotwater"));
        let hot_water = catalog.get("settingHeatpumpHotWaterStopTemperature").unwrap();
        assert!(registers::is_match(hot_water, "hotwater"));
    }
}
