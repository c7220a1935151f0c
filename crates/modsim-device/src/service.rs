use crate::handler::{DeviceHandler, HandlerError};
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_modbus::prelude::{ExceptionCode, Request, Response, SlaveRequest};
use tracing::{debug, warn};

/// Unit id every device accepts regardless of its own and never answers.
pub const BROADCAST_UNIT: u8 = 0;

#[derive(Debug, Default)]
pub struct ServerStats {
    requests_total: AtomicU64,
    responses_ok: AtomicU64,
    exceptions_sent: AtomicU64,
    foreign_unit: AtomicU64,
    broadcasts: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub requests_total: u64,
    pub responses_ok: u64,
    pub exceptions_sent: u64,
    pub foreign_unit: u64,
    pub broadcasts: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            responses_ok: self.responses_ok.load(Ordering::Relaxed),
            exceptions_sent: self.exceptions_sent.load(Ordering::Relaxed),
            foreign_unit: self.foreign_unit.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requests: {}, ok: {}, exceptions: {}, other unit: {}, broadcast: {}",
            self.requests_total,
            self.responses_ok,
            self.exceptions_sent,
            self.foreign_unit,
            self.broadcasts
        )
    }
}

/// Adapts a [`DeviceHandler`] to the `tokio-modbus` server loop.
///
/// Cloning shares the handler and the statistics, so one service value can be
/// handed to every accepted connection.
#[derive(Debug)]
pub struct DeviceService<H> {
    handler: H,
    unit_id: Option<u8>,
    stats: Arc<ServerStats>,
}

impl<H: Clone> Clone for DeviceService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            unit_id: self.unit_id,
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<H: DeviceHandler> DeviceService<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            unit_id: None,
            stats: Arc::new(ServerStats::default()),
        }
    }

    /// Serve as `unit_id` on a shared line: requests for other units are
    /// ignored, and broadcasts are applied without a reply.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Answers one request synchronously. `Ok(None)` sends nothing back.
    pub fn handle(&self, req: SlaveRequest<'_>) -> Result<Option<Response>, ExceptionCode> {
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);

        let mut silent = false;
        if let Some(own) = self.unit_id {
            if req.slave == BROADCAST_UNIT {
                self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
                silent = true;
            } else if req.slave != own {
                self.stats.foreign_unit.fetch_add(1, Ordering::Relaxed);
                debug!(unit = req.slave, own, "ignoring request for another unit");
                return Ok(None);
            }
        }

        match self.dispatch(&req.request) {
            Ok(_) if silent => Ok(None),
            Ok(response) => {
                self.stats.responses_ok.fetch_add(1, Ordering::Relaxed);
                Ok(Some(response))
            }
            Err(err) => {
                let exception = err.exception_code();
                warn!(unit = req.slave, error = %err, ?exception, "request failed");
                self.handler.on_error(&req.request, exception);
                if silent {
                    return Ok(None);
                }
                self.stats.exceptions_sent.fetch_add(1, Ordering::Relaxed);
                Err(exception)
            }
        }
    }

    fn dispatch(&self, request: &Request<'_>) -> Result<Response, HandlerError> {
        let handler = &self.handler;
        match request {
            Request::ReadCoils(address, quantity) => handler
                .read_coils(*address, *quantity)
                .map(Response::ReadCoils),
            Request::ReadDiscreteInputs(address, quantity) => handler
                .read_discrete_inputs(*address, *quantity)
                .map(Response::ReadDiscreteInputs),
            Request::ReadInputRegisters(address, quantity) => handler
                .read_input_registers(*address, *quantity)
                .map(Response::ReadInputRegisters),
            Request::ReadHoldingRegisters(address, quantity) => handler
                .read_holding_registers(*address, *quantity)
                .map(Response::ReadHoldingRegisters),
            Request::WriteSingleCoil(address, value) => handler
                .write_coils(*address, &[*value])
                .map(|()| Response::WriteSingleCoil(*address, *value)),
            Request::WriteMultipleCoils(address, values) => {
                let quantity = quantity_of(values.len())?;
                handler
                    .write_coils(*address, values)
                    .map(|()| Response::WriteMultipleCoils(*address, quantity))
            }
            Request::WriteSingleRegister(address, value) => handler
                .write_holding_registers(*address, &[*value])
                .map(|()| Response::WriteSingleRegister(*address, *value)),
            Request::WriteMultipleRegisters(address, values) => {
                let quantity = quantity_of(values.len())?;
                handler
                    .write_holding_registers(*address, values)
                    .map(|()| Response::WriteMultipleRegisters(*address, quantity))
            }
            _ => Err(HandlerError::Exception(ExceptionCode::IllegalFunction)),
        }
    }
}

fn quantity_of(len: usize) -> Result<u16, HandlerError> {
    u16::try_from(len).map_err(|_| HandlerError::Exception(ExceptionCode::IllegalDataValue))
}

impl<H: DeviceHandler> tokio_modbus::server::Service for DeviceService<H> {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req))
    }
}
