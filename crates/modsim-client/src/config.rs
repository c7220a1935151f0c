use crate::function::{FunctionCode, SizeClass};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Highest addressable unit id on a serial line.
pub const MAX_UNIT_ID: u8 = 247;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{direction} size limit {limit} exceeds the {framing} maximum of {max} bytes")]
    SizeLimitTooLarge {
        direction: &'static str,
        framing: Framing,
        limit: usize,
        max: usize,
    },
    #[error("{direction} size limit {limit} is below the {framing} minimum of {min} bytes")]
    SizeLimitTooSmall {
        direction: &'static str,
        framing: Framing,
        limit: usize,
        min: usize,
    },
    #[error("unit id {0} is above the maximum of 247")]
    UnitId(u8),
}

/// Transport framing, which fixes the bytes each frame spends outside the PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Unit id plus CRC around the PDU.
    Rtu,
    /// MBAP header in front of the PDU.
    Tcp,
}

impl Framing {
    pub const fn overhead(self) -> usize {
        match self {
            Self::Rtu => 3,
            Self::Tcp => 7,
        }
    }

    pub const fn max_frame_len(self) -> usize {
        match self {
            Self::Rtu => 256,
            Self::Tcp => 260,
        }
    }

    /// Smallest frame that carries one item of every supported function in
    /// the given direction.
    pub fn min_frame_len(self, write: bool) -> usize {
        let pdu = SizeClass::ALL
            .iter()
            .filter(|class| class.is_write() == write)
            .map(|class| class.pdu_len(1))
            .max()
            .unwrap_or(0);
        self.overhead() + pdu
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rtu => f.write_str("rtu"),
            Self::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub framing: Framing,
    /// Frame size limit for requests that write to the server.
    pub write_size_limit: usize,
    /// Frame size limit for requests that read from the server.
    pub read_size_limit: usize,
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_framing(Framing::Rtu)
    }
}

impl ClientConfig {
    /// Defaults with both limits at the framing's maximum frame length.
    pub fn for_framing(framing: Framing) -> Self {
        Self {
            framing,
            write_size_limit: framing.max_frame_len(),
            read_size_limit: framing.max_frame_len(),
            response_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_write_size_limit(mut self, limit: usize) -> Self {
        self.write_size_limit = limit;
        self
    }

    pub fn with_read_size_limit(mut self, limit: usize) -> Self {
        self.read_size_limit = limit;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (direction, write, limit) in [
            ("write", true, self.write_size_limit),
            ("read", false, self.read_size_limit),
        ] {
            let max = self.framing.max_frame_len();
            if limit > max {
                return Err(ConfigError::SizeLimitTooLarge {
                    direction,
                    framing: self.framing,
                    limit,
                    max,
                });
            }
            let min = self.framing.min_frame_len(write);
            if limit < min {
                return Err(ConfigError::SizeLimitTooSmall {
                    direction,
                    framing: self.framing,
                    limit,
                    min,
                });
            }
        }
        Ok(())
    }

    /// PDU bytes available to `function`, from the limit matching its direction.
    pub fn byte_budget(&self, function: FunctionCode) -> usize {
        let limit = if function.is_write_to_server() {
            self.write_size_limit
        } else {
            self.read_size_limit
        };
        limit.saturating_sub(self.framing.overhead())
    }
}

pub fn validate_unit_id(unit_id: u8) -> Result<u8, ConfigError> {
    if unit_id > MAX_UNIT_ID {
        return Err(ConfigError::UnitId(unit_id));
    }
    Ok(unit_id)
}
