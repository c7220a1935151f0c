use clap::Parser;
use modsim_client::Framing;
use modsim_device::{DeviceService, RtuDevice, open_serial};
use modsim_tools::common::{
    ClientArgs, DeviceArgs, SerialArgs, init_tracing, new_handler, run_client,
    serve_until_interrupted,
};
use std::process::ExitCode;
use tokio_modbus::Slave;
use tokio_modbus::client::rtu;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "modsim-rtu",
    about = "Simulated Modbus device, or interactive client, over a serial RTU line"
)]
struct Args {
    #[command(flatten)]
    serial: SerialArgs,
    #[command(flatten)]
    device: DeviceArgs,
    #[command(flatten)]
    client: ClientArgs,
    /// Run the interactive client instead of the device
    #[arg(short = 'c', long = "client")]
    client_mode: bool,
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let serial_config = args.serial.serial_config();

    if args.client_mode {
        let config = args.client.client_config(Framing::Rtu)?;
        let stream = open_serial(&args.serial.location, &serial_config)?;
        let ctx = rtu::attach_slave(stream, Slave(args.device.id));
        info!(unit = args.device.id, "client ready");
        run_client(ctx, args.device.id, args.device.fill, config).await?;
        return Ok(());
    }

    let service = DeviceService::new(new_handler(args.device.fill)).with_unit_id(args.device.id);
    let stats = service.stats();
    let device = RtuDevice::open(&args.serial.location, &serial_config, service)?;
    info!(unit = args.device.id, location = %args.serial.location, "device ready");
    serve_until_interrupted(device.run(), stats).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.device.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
