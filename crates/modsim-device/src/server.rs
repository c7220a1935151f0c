use crate::handler::DeviceHandler;
use crate::service::DeviceService;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_modbus::server::rtu::Server as RtuServer;
use tokio_modbus::server::tcp::{Server as TcpServer, accept_tcp_connection};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to open serial port '{path}': {source}")]
    Serial {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },
}

/// Line settings for a serial device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

/// Opens `path` as an async serial stream, shared by the device and client roles.
pub fn open_serial(path: &str, config: &SerialConfig) -> Result<SerialStream, DeviceError> {
    let builder = tokio_serial::new(path, config.baud_rate)
        .parity(config.parity)
        .data_bits(config.data_bits)
        .stop_bits(config.stop_bits)
        .flow_control(config.flow_control);
    let stream = builder
        .open_native_async()
        .map_err(|source| DeviceError::Serial {
            path: path.to_string(),
            source,
        })?;
    info!(path, baud = config.baud_rate, parity = ?config.parity, "serial port open");
    Ok(stream)
}

pub struct TcpDevice<H> {
    listener: TcpListener,
    service: DeviceService<H>,
}

impl<H> TcpDevice<H>
where
    H: DeviceHandler + Clone,
{
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        service: DeviceService<H>,
    ) -> Result<Self, DeviceError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, service))
    }

    pub fn from_listener(listener: TcpListener, service: DeviceService<H>) -> Self {
        Self { listener, service }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DeviceError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails; each connection runs on its own task.
    pub async fn run(self) -> Result<(), DeviceError> {
        let addr = self.local_addr()?;
        info!(%addr, "modbus tcp device listening");

        let service = self.service;
        let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
            let service = service.clone();
            async move {
                debug!(peer = %socket_addr, "connection accepted");
                accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(service.clone())))
            }
        };
        let on_process_error = |err: io::Error| {
            warn!(error = %err, "connection ended with error");
        };

        TcpServer::new(self.listener)
            .serve(&on_connected, on_process_error)
            .await?;
        Ok(())
    }
}

pub struct RtuDevice<H> {
    stream: SerialStream,
    service: DeviceService<H>,
}

impl<H> RtuDevice<H>
where
    H: DeviceHandler + Clone,
{
    pub fn open(
        path: &str,
        config: &SerialConfig,
        service: DeviceService<H>,
    ) -> Result<Self, DeviceError> {
        let stream = open_serial(path, config)?;
        Ok(Self::from_stream(stream, service))
    }

    pub fn from_stream(stream: SerialStream, service: DeviceService<H>) -> Self {
        Self { stream, service }
    }

    pub async fn run(self) -> Result<(), DeviceError> {
        info!("modbus rtu device serving");
        if let Err(err) = RtuServer::new(self.stream).serve_forever(self.service).await {
            warn!(error = %err, "modbus rtu device ended with error");
            return Err(err.into());
        }
        Ok(())
    }
}
