use crate::chunk::SubRequest;
use crate::config::ClientConfig;
use crate::function::FunctionCode;
use async_trait::async_trait;
use modsim_device::{DeviceHandler, HandlerError};
use std::borrow::Cow;
use thiserror::Error;
use tokio_modbus::client::{Client, Context};
use tokio_modbus::prelude::{ExceptionCode, Request, Response, Slave, SlaveContext};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("modbus error: {0}")]
    Modbus(#[from] tokio_modbus::Error),
    #[error("modbus exception: {0:?}")]
    Exception(ExceptionCode),
}

/// One request/response exchange with a remote unit.
#[async_trait]
pub trait Transport: Send {
    async fn call(
        &mut self,
        unit_id: u8,
        request: Request<'static>,
    ) -> Result<Response, TransportError>;
}

#[async_trait]
impl Transport for Context {
    async fn call(
        &mut self,
        unit_id: u8,
        request: Request<'static>,
    ) -> Result<Response, TransportError> {
        self.set_slave(Slave(unit_id));
        Client::call(self, request)
            .await?
            .map_err(TransportError::Exception)
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request timed out")]
    Timeout,
    #[error("local handler error: {0}")]
    Local(#[from] HandlerError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("function code {0} cannot be executed")]
    Unsupported(FunctionCode),
}

/// A plan that stopped at its first failing sub-request.
#[derive(Debug, Error)]
#[error("{source} in request {position}/{total} ({request})", position = .completed + 1)]
pub struct BatchError {
    /// Sub-requests that finished before the failure.
    pub completed: usize,
    pub total: usize,
    pub request: SubRequest,
    pub source: TransactionError,
}

/// Runs chunked plans in order against one unit.
///
/// Reads are stored into the local handler and writes take their payload from
/// it, so the local bank mirrors whatever the client last exchanged.
pub struct Executor<T, H> {
    transport: T,
    unit_id: u8,
    handler: H,
    config: ClientConfig,
}

impl<T, H> Executor<T, H>
where
    T: Transport,
    H: DeviceHandler,
{
    pub fn new(transport: T, unit_id: u8, handler: H, config: ClientConfig) -> Self {
        Self {
            transport,
            unit_id,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Sends `plan` one sub-request at a time and returns how many completed.
    ///
    /// Nothing after the first failure is sent, and earlier writes stay applied.
    pub async fn execute(&mut self, plan: &[SubRequest]) -> Result<usize, BatchError> {
        let total = plan.len();
        for (index, sub) in plan.iter().enumerate() {
            debug!(
                unit = self.unit_id,
                request = index + 1,
                total,
                function = %sub.function,
                address = sub.address,
                quantity = sub.quantity,
                "sending sub-request"
            );
            if let Err(source) = self.execute_one(sub).await {
                warn!(
                    unit = self.unit_id,
                    completed = index,
                    total,
                    error = %source,
                    "sub-request failed"
                );
                return Err(BatchError {
                    completed: index,
                    total,
                    request: *sub,
                    source,
                });
            }
        }
        Ok(total)
    }

    async fn execute_one(&mut self, sub: &SubRequest) -> Result<(), TransactionError> {
        let request = self.build_request(sub)?;
        let response = tokio::time::timeout(
            self.config.response_timeout,
            self.transport.call(self.unit_id, request),
        )
        .await
        .map_err(|_| TransactionError::Timeout)??;
        self.apply_response(sub, response)
    }

    fn build_request(&self, sub: &SubRequest) -> Result<Request<'static>, TransactionError> {
        let SubRequest {
            function,
            address,
            quantity,
        } = *sub;
        let request = match function {
            FunctionCode::ReadCoils => Request::ReadCoils(address, quantity),
            FunctionCode::ReadDiscreteInputs => Request::ReadDiscreteInputs(address, quantity),
            FunctionCode::ReadInputRegisters => Request::ReadInputRegisters(address, quantity),
            FunctionCode::ReadHoldingRegisters => Request::ReadHoldingRegisters(address, quantity),
            FunctionCode::WriteSingleCoil => {
                let values = self.handler.read_coils(address, 1)?;
                Request::WriteSingleCoil(address, first(&values)?)
            }
            FunctionCode::WriteMultipleCoils => {
                let values = self.handler.read_coils(address, quantity)?;
                Request::WriteMultipleCoils(address, Cow::Owned(values))
            }
            FunctionCode::WriteSingleRegister => {
                let values = self.handler.read_holding_registers(address, 1)?;
                Request::WriteSingleRegister(address, first(&values)?)
            }
            FunctionCode::WriteMultipleRegisters => {
                let values = self.handler.read_holding_registers(address, quantity)?;
                Request::WriteMultipleRegisters(address, Cow::Owned(values))
            }
            other => return Err(TransactionError::Unsupported(other)),
        };
        Ok(request)
    }

    fn apply_response(&self, sub: &SubRequest, response: Response) -> Result<(), TransactionError> {
        let address = sub.address;
        let quantity = usize::from(sub.quantity);
        match (sub.function, response) {
            (FunctionCode::ReadCoils, Response::ReadCoils(values)) => {
                let values = bits_for(values, quantity)?;
                self.handler.write_coils(address, &values)?;
            }
            (FunctionCode::ReadDiscreteInputs, Response::ReadDiscreteInputs(values)) => {
                let values = bits_for(values, quantity)?;
                self.handler.write_discrete_inputs(address, &values)?;
            }
            (FunctionCode::ReadInputRegisters, Response::ReadInputRegisters(values)) => {
                expect_len(values.len(), quantity)?;
                self.handler.write_input_registers(address, &values)?;
            }
            (FunctionCode::ReadHoldingRegisters, Response::ReadHoldingRegisters(values)) => {
                expect_len(values.len(), quantity)?;
                self.handler.write_holding_registers(address, &values)?;
            }
            (FunctionCode::WriteSingleCoil, Response::WriteSingleCoil(echoed, _))
            | (FunctionCode::WriteSingleRegister, Response::WriteSingleRegister(echoed, _)) => {
                expect_echo(sub, echoed, 1)?;
            }
            (FunctionCode::WriteMultipleCoils, Response::WriteMultipleCoils(echoed, count))
            | (
                FunctionCode::WriteMultipleRegisters,
                Response::WriteMultipleRegisters(echoed, count),
            ) => {
                expect_echo(sub, echoed, count)?;
            }
            (function, other) => {
                return Err(TransactionError::InvalidResponse(format!(
                    "function {function} answered with {other:?}"
                )));
            }
        }
        Ok(())
    }
}

/// A local read that came back empty is a handler failure.
fn first<V: Copy>(values: &[V]) -> Result<V, TransactionError> {
    values.first().copied().ok_or(TransactionError::Local(HandlerError::Exception(
        ExceptionCode::ServerDeviceFailure,
    )))
}

/// Bit responses are padded to whole bytes; keep exactly `quantity`.
fn bits_for(mut values: Vec<bool>, quantity: usize) -> Result<Vec<bool>, TransactionError> {
    expect_len(values.len().min(quantity), quantity)?;
    values.truncate(quantity);
    Ok(values)
}

fn expect_len(got: usize, expected: usize) -> Result<(), TransactionError> {
    if got != expected {
        return Err(TransactionError::InvalidResponse(format!(
            "expected {expected} values, got {got}"
        )));
    }
    Ok(())
}

fn expect_echo(sub: &SubRequest, address: u16, quantity: u16) -> Result<(), TransactionError> {
    if address != sub.address || quantity != sub.quantity {
        return Err(TransactionError::InvalidResponse(format!(
            "echoed address {address} quantity {quantity}, sent {} {}",
            sub.address, sub.quantity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{BatchError, Executor, TransactionError, Transport, TransportError};
    use crate::chunk::{SubRequest, chunk};
    use crate::config::ClientConfig;
    use crate::function::FunctionCode;
    use async_trait::async_trait;
    use modsim_device::{DeviceHandler, HandlerError, RegisterBank, Space, memory_handler};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_modbus::prelude::{ExceptionCode, Request, Response};

    /// Answers from its own bank and fails the request at `fail_at` (0-based).
    struct ScriptedTransport {
        remote: Arc<RegisterBank>,
        fail_at: Option<usize>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn new(remote: Arc<RegisterBank>) -> Self {
            Self {
                remote,
                fail_at: None,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(
            &mut self,
            _unit_id: u8,
            request: Request<'static>,
        ) -> Result<Response, TransportError> {
            let index = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(format!("{request:?}"));
                sent.len() - 1
            };
            if self.fail_at == Some(index) {
                return Err(TransportError::Exception(ExceptionCode::ServerDeviceFailure));
            }
            let bank = &self.remote;
            let response = match request {
                Request::ReadCoils(address, quantity) => {
                    let mut values = bank.read_bits(Space::Coils, address, quantity).unwrap();
                    // Pad like a real bit response.
                    values.resize(values.len().div_ceil(8) * 8, false);
                    Response::ReadCoils(values)
                }
                Request::ReadHoldingRegisters(address, quantity) => {
                    let values = bank.read_words(Space::HoldingRegisters, address, quantity);
                    Response::ReadHoldingRegisters(values.unwrap())
                }
                Request::WriteMultipleRegisters(address, values) => {
                    bank.write_words(Space::HoldingRegisters, address, &values).unwrap();
                    Response::WriteMultipleRegisters(address, values.len() as u16)
                }
                Request::WriteSingleCoil(address, value) => {
                    bank.write_bits(Space::Coils, address, &[value]).unwrap();
                    Response::WriteSingleCoil(address, value)
                }
                other => panic!("unexpected request {other:?}"),
            };
            Ok(response)
        }
    }

    struct SilentTransport;

    #[async_trait]
    impl Transport for SilentTransport {
        async fn call(
            &mut self,
            _unit_id: u8,
            _request: Request<'static>,
        ) -> Result<Response, TransportError> {
            std::future::pending().await
        }
    }

    struct WrongEcho;

    #[async_trait]
    impl Transport for WrongEcho {
        async fn call(
            &mut self,
            _unit_id: u8,
            _request: Request<'static>,
        ) -> Result<Response, TransportError> {
            Ok(Response::WriteMultipleRegisters(0, 1))
        }
    }

    fn holding_reads(count: u16) -> Vec<SubRequest> {
        (0..count)
            .map(|index| SubRequest {
                function: FunctionCode::ReadHoldingRegisters,
                address: index * 10,
                quantity: 10,
            })
            .collect()
    }

    #[tokio::test]
    async fn stops_at_first_failure_and_reports_it() {
        let mut transport = ScriptedTransport::new(Arc::new(RegisterBank::new()));
        transport.fail_at = Some(2);
        let sent = Arc::clone(&transport.sent);
        let local = memory_handler(Arc::new(RegisterBank::new()));
        let mut executor = Executor::new(transport, 1, local, ClientConfig::default());

        let plan = holding_reads(5);
        let err: BatchError = executor.execute(&plan).await.unwrap_err();

        assert_eq!(err.completed, 2);
        assert_eq!(err.total, 5);
        assert_eq!(err.request, plan[2]);
        assert_eq!((err.request.address, err.request.quantity), (20, 10));
        assert!(matches!(
            err.source,
            TransactionError::Transport(TransportError::Exception(
                ExceptionCode::ServerDeviceFailure
            ))
        ));
        assert_eq!(sent.lock().unwrap().len(), 3);
        assert!(err.to_string().contains("in request 3/5"));
        assert!(err.to_string().contains("address 20 quantity 10"));
    }

    #[tokio::test]
    async fn reads_are_stored_into_local_handler() {
        let remote = Arc::new(RegisterBank::with_sizes(64, 64, 64, 64));
        remote.write_words(Space::HoldingRegisters, 5, &[1, 2, 3]).unwrap();
        remote.write_bits(Space::Coils, 9, &[true]).unwrap();
        let local_bank = Arc::new(RegisterBank::with_sizes(64, 64, 64, 64));
        let mut executor = Executor::new(
            ScriptedTransport::new(remote),
            1,
            memory_handler(Arc::clone(&local_bank)),
            ClientConfig::default(),
        );

        let plan = chunk(FunctionCode::ReadHoldingRegisters, 4, 5, 6).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(executor.execute(&plan).await.unwrap(), 3);
        assert_eq!(
            local_bank.read_words(Space::HoldingRegisters, 4, 5).unwrap(),
            vec![0, 1, 2, 3, 0]
        );

        let plan = chunk(FunctionCode::ReadCoils, 8, 3, 253).unwrap();
        assert_eq!(executor.execute(&plan).await.unwrap(), 1);
        assert_eq!(
            local_bank.read_bits(Space::Coils, 8, 3).unwrap(),
            vec![false, true, false]
        );
    }

    #[tokio::test]
    async fn writes_take_payload_from_local_handler() {
        let remote = Arc::new(RegisterBank::with_sizes(64, 64, 64, 64));
        let local = memory_handler(Arc::new(RegisterBank::with_sizes(64, 64, 64, 64)));
        local.write_holding_registers(10, &[7, 8, 9, 10, 11]).unwrap();
        local.write_coils(3, &[true]).unwrap();
        let mut executor = Executor::new(
            ScriptedTransport::new(Arc::clone(&remote)),
            1,
            local,
            ClientConfig::default(),
        );

        let plan = chunk(FunctionCode::WriteMultipleRegisters, 10, 5, 10).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(executor.execute(&plan).await.unwrap(), 3);
        assert_eq!(
            remote.read_words(Space::HoldingRegisters, 10, 5).unwrap(),
            vec![7, 8, 9, 10, 11]
        );

        let plan = chunk(FunctionCode::WriteSingleCoil, 3, 1, 253).unwrap();
        executor.execute(&plan).await.unwrap();
        assert_eq!(remote.read_bits(Space::Coils, 3, 1).unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn echo_mismatch_fails_sub_request() {
        let local = memory_handler(Arc::new(RegisterBank::with_sizes(8, 8, 8, 8)));
        let mut executor = Executor::new(WrongEcho, 1, local, ClientConfig::default());
        let plan = chunk(FunctionCode::WriteMultipleRegisters, 4, 2, 253).unwrap();

        let err = executor.execute(&plan).await.unwrap_err();
        assert_eq!(err.completed, 0);
        assert!(matches!(err.source, TransactionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn local_handler_errors_stop_the_plan() {
        let local = memory_handler(Arc::new(RegisterBank::with_sizes(8, 8, 8, 8)));
        let transport = ScriptedTransport::new(Arc::new(RegisterBank::new()));
        let sent = Arc::clone(&transport.sent);
        let mut executor = Executor::new(transport, 1, local, ClientConfig::default());
        let plan = chunk(FunctionCode::WriteMultipleRegisters, 6, 4, 253).unwrap();

        let err = executor.execute(&plan).await.unwrap_err();
        assert!(matches!(err.source, TransactionError::Local(_)));
        assert!(sent.lock().unwrap().is_empty());
        assert!(executor.handler().read_holding_registers(0, 1).is_ok());
    }

    /// A handler whose coil reads always come back empty.
    struct EmptyCoils;

    impl DeviceHandler for EmptyCoils {
        fn read_coils(&self, _address: u16, _quantity: u16) -> Result<Vec<bool>, HandlerError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn empty_local_read_is_a_local_error() {
        let transport = ScriptedTransport::new(Arc::new(RegisterBank::new()));
        let sent = Arc::clone(&transport.sent);
        let mut executor = Executor::new(transport, 1, EmptyCoils, ClientConfig::default());
        let plan = chunk(FunctionCode::WriteSingleCoil, 0, 1, 253).unwrap();

        let err = executor.execute(&plan).await.unwrap_err();
        assert!(matches!(
            err.source,
            TransactionError::Local(HandlerError::Exception(ExceptionCode::ServerDeviceFailure))
        ));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let local = memory_handler(Arc::new(RegisterBank::with_sizes(8, 8, 8, 8)));
        let config = ClientConfig::default().with_response_timeout(Duration::from_millis(200));
        let mut executor = Executor::new(SilentTransport, 1, local, config);

        let err = executor.execute(&holding_reads(2)).await.unwrap_err();
        assert_eq!(err.completed, 0);
        assert!(matches!(err.source, TransactionError::Timeout));
        assert_eq!(
            err.to_string(),
            "request timed out in request 1/2 (function 3 address 0 quantity 10)"
        );
    }

    #[tokio::test]
    async fn empty_plan_completes_nothing() {
        let local = memory_handler(Arc::new(RegisterBank::with_sizes(8, 8, 8, 8)));
        let mut executor = Executor::new(SilentTransport, 1, local, ClientConfig::default());
        assert_eq!(executor.execute(&[]).await.unwrap(), 0);
    }
}
