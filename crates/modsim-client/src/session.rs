use crate::chunk::{ChunkError, SubRequest, chunk};
use crate::command::{Command, CommandError, parse_line};
use crate::executor::{BatchError, Executor, Transport};
use modsim_device::DeviceHandler;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const BANNER: &str =
    "Send requests by function code, address, and quantity, such as \"2 0 12\" (base 10)";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("input line is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
}

/// A parsed line and the requests it will be sent as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub command: Command,
    /// Items per request for this command's function and direction.
    pub limit: u16,
    pub requests: Vec<SubRequest>,
}

impl Plan {
    pub fn describe(&self) -> String {
        format!(
            "doing {} in {} requests, {} per request",
            self.command,
            self.requests.len(),
            self.limit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub command: Command,
    pub limit: u16,
    pub requests: usize,
    pub completed: usize,
}

/// Interactive client loop: one line, one chunked transaction.
pub struct Session<T, H> {
    executor: Executor<T, H>,
}

impl<T, H> Session<T, H>
where
    T: Transport,
    H: DeviceHandler,
{
    pub fn new(executor: Executor<T, H>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Executor<T, H> {
        &self.executor
    }

    pub fn plan(&self, line: &str) -> Result<Plan, SessionError> {
        let command = parse_line(line)?;
        let budget = self.executor.config().byte_budget(command.function);
        let limit = command
            .function
            .max_items_fitting(budget)
            .ok_or(ChunkError::InvalidFunctionCode(command.function.as_u8()))?;
        let requests = chunk(command.function, command.address, command.quantity, budget)?;
        debug!(%command, budget, limit, requests = requests.len(), "planned");
        Ok(Plan {
            command,
            limit,
            requests,
        })
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<Summary, SessionError> {
        let plan = self.plan(line)?;
        let completed = self.executor.execute(&plan.requests).await?;
        Ok(Summary {
            command: plan.command,
            limit: plan.limit,
            requests: plan.requests.len(),
            completed,
        })
    }

    /// Reads commands until end of input. Per-line failures are reported to
    /// `output` and never end the loop; only I/O errors on the streams do.
    pub async fn run<R, W>(&mut self, mut input: R, mut output: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_line(&mut output, BANNER).await?;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let plan = match std::str::from_utf8(&buf)
                .map_err(SessionError::from)
                .and_then(|line| self.plan(line))
            {
                Ok(plan) => plan,
                Err(err) => {
                    write_line(&mut output, &err.to_string()).await?;
                    continue;
                }
            };
            write_line(&mut output, &plan.describe()).await?;
            match self.executor.execute(&plan.requests).await {
                Ok(completed) => {
                    write_line(&mut output, &format!("finished {completed} requests")).await?;
                }
                Err(err) => write_line(&mut output, &err.to_string()).await?,
            }
        }
        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> io::Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
