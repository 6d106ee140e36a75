//! Reading and writing registers by name.
//!
//! Every operation resolves the name in the session's catalog under the kinds it can handle,
//! checks the register exists on the connected model and only then performs a single Modbus
//! exchange. Values are raw: apply [`crate::scaling`] for presentation.

use crate::connection::{Connection, Error, Session, Transport};
use crate::modbus::{self, Operation, ResponseKind};
use crate::registers::{KindMask, RegisterDefinition, RegisterKind};
use tracing::debug;

impl<T: Transport> Session<T> {
    fn resolve(&self, name: &str, kinds: KindMask) -> Result<&'static RegisterDefinition, Error> {
        let Some(register) = self.catalog.lookup(name, kinds) else {
            return Err(Error::RegisterNotFound { name: name.to_string(), kinds });
        };
        if !register.is_supported_by(self.model) {
            return Err(Error::UnsupportedForModel { name: name.to_string(), model: self.model });
        }
        Ok(register)
    }

    async fn dispatch(
        &mut self,
        register: &RegisterDefinition,
        operation: Operation,
    ) -> Result<ResponseKind, modbus::Error> {
        debug!(
            message = "dispatching",
            register = register.name,
            kind = %register.kind,
            address = register.address,
            ?operation
        );
        self.transport.call(operation).await
    }

    /// Read a coil or a discrete input.
    pub async fn read_bit(&mut self, name: &str) -> Result<bool, Error> {
        let register = self.resolve(name, KindMask::BITS)?;
        let address = register.address;
        let operation = match register.kind {
            RegisterKind::CoilStatus => Operation::ReadCoils { address, count: 1 },
            _ => Operation::ReadDiscreteInputs { address, count: 1 },
        };
        let read_failure =
            |source: modbus::Error| Error::ReadFailure { name: name.to_string(), source };
        let response = self.dispatch(register, operation).await.map_err(read_failure)?;
        let short = modbus::Error::ShortResponse(operation.function_code());
        response.first_bit().ok_or_else(|| read_failure(short))
    }

    /// Read an input or a holding register.
    ///
    /// The controller reports negative quantities in two's complement, so the word is always
    /// interpreted as signed.
    pub async fn read_int(&mut self, name: &str) -> Result<i16, Error> {
        let register = self.resolve(name, KindMask::WORDS)?;
        let address = register.address;
        let operation = match register.kind {
            RegisterKind::InputRegister => Operation::ReadInputs { address, count: 1 },
            _ => Operation::ReadHoldings { address, count: 1 },
        };
        let read_failure =
            |source: modbus::Error| Error::ReadFailure { name: name.to_string(), source };
        let response = self.dispatch(register, operation).await.map_err(read_failure)?;
        let short = modbus::Error::ShortResponse(operation.function_code());
        let word = response.first_word().ok_or_else(|| read_failure(short))?;
        Ok(word as i16)
    }

    /// Write a coil. Discrete inputs are not writable and are never found by this operation.
    pub async fn write_bit(&mut self, name: &str, value: bool) -> Result<(), Error> {
        let register = self.resolve(name, KindMask::COILS)?;
        let operation = Operation::WriteCoil { address: register.address, value };
        self.dispatch(register, operation)
            .await
            .map_err(|source| Error::WriteFailure { name: name.to_string(), source })?;
        Ok(())
    }

    /// Write a holding register with an already scaled value.
    ///
    /// Only the low 16 bits of `value` are sent. Input registers are not writable and are never
    /// found by this operation.
    pub async fn write_int(&mut self, name: &str, value: i32) -> Result<(), Error> {
        let register = self.resolve(name, KindMask::HOLDINGS)?;
        let operation = Operation::WriteHolding { address: register.address, value: value as u16 };
        self.dispatch(register, operation)
            .await
            .map_err(|source| Error::WriteFailure { name: name.to_string(), source })?;
        Ok(())
    }
}

impl<T: Transport> Connection<T> {
    pub async fn read_bit(&mut self, name: &str) -> Result<bool, Error> {
        self.session()?.read_bit(name).await
    }

    pub async fn read_int(&mut self, name: &str) -> Result<i16, Error> {
        self.session()?.read_int(name).await
    }

    pub async fn write_bit(&mut self, name: &str, value: bool) -> Result<(), Error> {
        self.session()?.write_bit(name, value).await
    }

    pub async fn write_int(&mut self, name: &str, value: i32) -> Result<(), Error> {
        self.session()?.write_int(name, value).await
    }
}
