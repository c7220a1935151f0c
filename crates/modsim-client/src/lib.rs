//! Interactive Modbus client: command parsing, request chunking and
//! sequential execution with a local mirror of the exchanged values.

#![forbid(unsafe_code)]

pub mod chunk;
pub mod command;
pub mod config;
pub mod executor;
pub mod function;
pub mod session;

pub use chunk::{ChunkError, SubRequest, chunk};
pub use command::{Command, CommandError, parse_command, parse_line};
pub use config::{ClientConfig, ConfigError, Framing, MAX_UNIT_ID, validate_unit_id};
pub use executor::{BatchError, Executor, TransactionError, Transport, TransportError};
pub use function::{FunctionCode, MAX_FUNCTION_CODE, SizeClass};
pub use session::{BANNER, Plan, Session, SessionError, Summary};
