use crate::bank::{BankError, RegisterBank, Space};
use std::sync::Arc;
use thiserror::Error;
use tokio_modbus::{ExceptionCode, Request};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("bank error: {0}")]
    Bank(#[from] BankError),
    #[error("modbus exception: {0:?}")]
    Exception(ExceptionCode),
}

impl HandlerError {
    /// The exception a remote peer sees for this failure.
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            Self::Bank(BankError::OutOfBounds { .. }) => ExceptionCode::IllegalDataAddress,
            Self::Bank(BankError::EmptyRange { .. } | BankError::WrongSpace { .. }) => {
                ExceptionCode::IllegalDataValue
            }
            Self::Exception(code) => *code,
        }
    }
}

fn unsupported<T>() -> Result<T, HandlerError> {
    Err(HandlerError::Exception(ExceptionCode::IllegalFunction))
}

/// Operations a simulated endpoint answers, one per space and direction.
///
/// Every method defaults to `IllegalFunction`, so an implementation only
/// provides the spaces it actually backs. Methods take `&self`: one instance
/// is shared by all connections and must synchronize internally.
pub trait DeviceHandler: Send + Sync + 'static {
    fn read_discrete_inputs(
        &self,
        _address: u16,
        _quantity: u16,
    ) -> Result<Vec<bool>, HandlerError> {
        unsupported()
    }

    fn write_discrete_inputs(&self, _address: u16, _values: &[bool]) -> Result<(), HandlerError> {
        unsupported()
    }

    fn read_coils(&self, _address: u16, _quantity: u16) -> Result<Vec<bool>, HandlerError> {
        unsupported()
    }

    fn write_coils(&self, _address: u16, _values: &[bool]) -> Result<(), HandlerError> {
        unsupported()
    }

    fn read_input_registers(
        &self,
        _address: u16,
        _quantity: u16,
    ) -> Result<Vec<u16>, HandlerError> {
        unsupported()
    }

    fn write_input_registers(&self, _address: u16, _values: &[u16]) -> Result<(), HandlerError> {
        unsupported()
    }

    fn read_holding_registers(
        &self,
        _address: u16,
        _quantity: u16,
    ) -> Result<Vec<u16>, HandlerError> {
        unsupported()
    }

    fn write_holding_registers(&self, _address: u16, _values: &[u16]) -> Result<(), HandlerError> {
        unsupported()
    }

    /// Called after a dispatched request was answered with an exception.
    fn on_error(&self, _request: &Request<'_>, _exception: ExceptionCode) {}
}

impl<T> DeviceHandler for Arc<T>
where
    T: DeviceHandler + ?Sized,
{
    fn read_discrete_inputs(&self, address: u16, quantity: u16) -> Result<Vec<bool>, HandlerError> {
        (**self).read_discrete_inputs(address, quantity)
    }

    fn write_discrete_inputs(&self, address: u16, values: &[bool]) -> Result<(), HandlerError> {
        (**self).write_discrete_inputs(address, values)
    }

    fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<bool>, HandlerError> {
        (**self).read_coils(address, quantity)
    }

    fn write_coils(&self, address: u16, values: &[bool]) -> Result<(), HandlerError> {
        (**self).write_coils(address, values)
    }

    fn read_input_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>, HandlerError> {
        (**self).read_input_registers(address, quantity)
    }

    fn write_input_registers(&self, address: u16, values: &[u16]) -> Result<(), HandlerError> {
        (**self).write_input_registers(address, values)
    }

    fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, HandlerError> {
        (**self).read_holding_registers(address, quantity)
    }

    fn write_holding_registers(&self, address: u16, values: &[u16]) -> Result<(), HandlerError> {
        (**self).write_holding_registers(address, values)
    }

    fn on_error(&self, request: &Request<'_>, exception: ExceptionCode) {
        (**self).on_error(request, exception)
    }
}

/// Handler backing all eight operations with a shared [`RegisterBank`].
#[derive(Debug, Clone)]
pub struct BankHandler {
    bank: Arc<RegisterBank>,
}

/// The one handler construction used by every endpoint, server or client.
pub fn memory_handler(bank: Arc<RegisterBank>) -> Arc<BankHandler> {
    Arc::new(BankHandler::new(bank))
}

impl BankHandler {
    pub fn new(bank: Arc<RegisterBank>) -> Self {
        Self { bank }
    }

    pub fn bank(&self) -> &Arc<RegisterBank> {
        &self.bank
    }

    fn read_bits(
        &self,
        space: Space,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, HandlerError> {
        info!(%space, address, quantity, "read");
        Ok(self.bank.read_bits(space, address, quantity)?)
    }

    fn write_bits(&self, space: Space, address: u16, values: &[bool]) -> Result<(), HandlerError> {
        info!(%space, address, quantity = values.len(), "write");
        debug!(%space, address, ?values, "write values");
        Ok(self.bank.write_bits(space, address, values)?)
    }

    fn read_words(
        &self,
        space: Space,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, HandlerError> {
        info!(%space, address, quantity, "read");
        Ok(self.bank.read_words(space, address, quantity)?)
    }

    fn write_words(&self, space: Space, address: u16, values: &[u16]) -> Result<(), HandlerError> {
        info!(%space, address, quantity = values.len(), "write");
        debug!(%space, address, ?values, "write values");
        Ok(self.bank.write_words(space, address, values)?)
    }
}

impl DeviceHandler for BankHandler {
    fn read_discrete_inputs(&self, address: u16, quantity: u16) -> Result<Vec<bool>, HandlerError> {
        self.read_bits(Space::DiscreteInputs, address, quantity)
    }

    fn write_discrete_inputs(&self, address: u16, values: &[bool]) -> Result<(), HandlerError> {
        self.write_bits(Space::DiscreteInputs, address, values)
    }

    fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<bool>, HandlerError> {
        self.read_bits(Space::Coils, address, quantity)
    }

    fn write_coils(&self, address: u16, values: &[bool]) -> Result<(), HandlerError> {
        self.write_bits(Space::Coils, address, values)
    }

    fn read_input_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>, HandlerError> {
        self.read_words(Space::InputRegisters, address, quantity)
    }

    fn write_input_registers(&self, address: u16, values: &[u16]) -> Result<(), HandlerError> {
        self.write_words(Space::InputRegisters, address, values)
    }

    fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, HandlerError> {
        self.read_words(Space::HoldingRegisters, address, quantity)
    }

    fn write_holding_registers(&self, address: u16, values: &[u16]) -> Result<(), HandlerError> {
        self.write_words(Space::HoldingRegisters, address, values)
    }

    fn on_error(&self, request: &Request<'_>, exception: ExceptionCode) {
        warn!(?request, ?exception, "request answered with exception");
    }
}
