//! Symbolic access to the registers of Thermia heat pump controllers over Modbus TCP.
//!
//! ```no_run
//! use thermia_modbus::{Connection, Model, scaling};
//!
//! # async fn example() -> Result<(), thermia_modbus::Error> {
//! let mut connection: Connection = Connection::new();
//! let session = connection.open("192.168.0.106", 502, Model::Mega).await?;
//! let raw = session.read_int("valueHeatpumpBrineInTemperature").await?;
//! println!("{}", scaling::Scaled::new(raw.into(), 10));
//! session.write_bit("enableHeatpumpResetAllAlarms", true).await?;
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod commands;
pub mod connection;
pub mod modbus;
pub mod output;
pub mod registers;
pub mod scaling;

pub use connection::{Connection, Error, ModbusTcp, Session, Transport};
pub use registers::{Catalog, KindMask, Model, Models, RegisterDefinition, RegisterKind};
