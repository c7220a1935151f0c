//! Simulated Modbus device: register bank, handler seam and serve loops.

#![forbid(unsafe_code)]

pub mod bank;
pub mod handler;
pub mod server;
pub mod service;

pub use bank::{BankError, FillPattern, RegisterBank, SPACE_SIZE, Space};
pub use handler::{BankHandler, DeviceHandler, HandlerError, memory_handler};
pub use server::{DeviceError, RtuDevice, SerialConfig, TcpDevice, open_serial};
pub use service::{BROADCAST_UNIT, DeviceService, ServerStats, StatsSnapshot};
