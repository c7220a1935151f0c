use clap::Args;
use modsim_client::{
    ClientConfig, ConfigError, Executor, Framing, Session, Transport, validate_unit_id,
};
use modsim_device::{
    BankHandler, DeviceError, FillPattern, RegisterBank, SerialConfig, ServerStats,
    memory_handler,
};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_serial::{DataBits, Parity, StopBits};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Args)]
pub struct SerialArgs {
    /// Serial device path
    #[arg(short = 'l', long)]
    pub location: String,
    #[arg(short = 'r', long, default_value_t = 9600)]
    pub baud: u32,
    /// Parity: N, E or O
    #[arg(short = 'p', long, default_value = "N", value_parser = parse_parity)]
    pub parity: Parity,
    #[arg(short = 's', long, default_value = "1", value_parser = parse_stop_bits)]
    pub stop_bits: StopBits,
    #[arg(long, default_value = "8", value_parser = parse_data_bits)]
    pub data_bits: DataBits,
}

impl SerialArgs {
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig::default()
            .with_baud_rate(self.baud)
            .with_parity(self.parity)
            .with_stop_bits(self.stop_bits)
            .with_data_bits(self.data_bits)
    }
}

#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Unit id of the simulated device, or of the device the client talks to
    #[arg(long, default_value_t = 1, value_parser = parse_unit_id)]
    pub id: u8,
    /// Initial fill: `am3` zero-fills every space (its address-mod-3 pattern
    /// is not applied), `none` leaves the bank untouched
    #[arg(short = 'd', long, default_value = "am3", value_parser = parse_fill)]
    pub fill: FillPattern,
    /// Log protocol-level debug output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ClientArgs {
    /// Frame size limit in bytes for requests that write to the device
    #[arg(long = "wsl")]
    pub write_size_limit: Option<usize>,
    /// Frame size limit in bytes for requests that read from the device
    #[arg(long = "rsl")]
    pub read_size_limit: Option<usize>,
    /// Response timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub timeout: u64,
}

impl ClientArgs {
    /// Unset limits default to the framing's maximum frame length.
    pub fn client_config(&self, framing: Framing) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::for_framing(framing)
            .with_response_timeout(Duration::from_millis(self.timeout));
        if let Some(limit) = self.write_size_limit {
            config = config.with_write_size_limit(limit);
        }
        if let Some(limit) = self.read_size_limit {
            config = config.with_read_size_limit(limit);
        }
        config.validate()?;
        Ok(config)
    }
}

pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

/// The bank and handler every role starts from.
pub fn new_handler(fill: FillPattern) -> Arc<BankHandler> {
    let bank = Arc::new(RegisterBank::new());
    bank.fill(fill);
    memory_handler(bank)
}

/// Runs a device until it fails or Ctrl-C arrives, then prints its statistics.
pub async fn serve_until_interrupted<F>(
    serve: F,
    stats: Arc<ServerStats>,
) -> Result<(), DeviceError>
where
    F: Future<Output = Result<(), DeviceError>>,
{
    let result = tokio::select! {
        result = serve => result,
        signal = tokio::signal::ctrl_c() => {
            info!("interrupted");
            signal.map_err(DeviceError::from)
        }
    };
    println!("{}", stats.snapshot());
    result
}

/// Runs the interactive client on stdin/stdout until end of input or Ctrl-C.
pub async fn run_client<T: Transport>(
    transport: T,
    unit_id: u8,
    fill: FillPattern,
    config: ClientConfig,
) -> io::Result<()> {
    let executor = Executor::new(transport, unit_id, new_handler(fill), config);
    let mut session = Session::new(executor);
    let input = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = session.run(input, tokio::io::stdout()) => result,
        signal = tokio::signal::ctrl_c() => signal,
    }
}

pub fn parse_parity(input: &str) -> Result<Parity, String> {
    match input.trim().to_ascii_uppercase().as_str() {
        "N" | "NONE" => Ok(Parity::None),
        "E" | "EVEN" => Ok(Parity::Even),
        "O" | "ODD" => Ok(Parity::Odd),
        _ => Err(format!("invalid parity: {input} (expected N, E or O)")),
    }
}

pub fn parse_stop_bits(input: &str) -> Result<StopBits, String> {
    match input.trim() {
        "1" => Ok(StopBits::One),
        "2" => Ok(StopBits::Two),
        _ => Err(format!("invalid stop bits: {input} (expected 1 or 2)")),
    }
}

pub fn parse_data_bits(input: &str) -> Result<DataBits, String> {
    match input.trim() {
        "5" => Ok(DataBits::Five),
        "6" => Ok(DataBits::Six),
        "7" => Ok(DataBits::Seven),
        "8" => Ok(DataBits::Eight),
        _ => Err(format!("invalid data bits: {input} (expected 5 to 8)")),
    }
}

pub fn parse_unit_id(input: &str) -> Result<u8, String> {
    let id = input
        .trim()
        .parse::<u8>()
        .map_err(|err| format!("invalid unit id {input}: {err}"))?;
    validate_unit_id(id).map_err(|err| err.to_string())
}

pub fn parse_fill(input: &str) -> Result<FillPattern, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "am3" => Ok(FillPattern::Am3),
        "none" => Ok(FillPattern::None),
        _ => Err(format!("unknown fill pattern: {input} (expected am3 or none)")),
    }
}
