use clap::Parser;
use modsim_client::Framing;
use modsim_device::{DeviceService, TcpDevice};
use modsim_tools::common::{
    ClientArgs, DeviceArgs, init_tracing, new_handler, run_client, serve_until_interrupted,
};
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio_modbus::Slave;
use tokio_modbus::client::tcp;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "modsim-tcp",
    about = "Simulated Modbus device, or interactive client, over TCP"
)]
struct Args {
    #[command(flatten)]
    device: DeviceArgs,
    #[command(flatten)]
    client: ClientArgs,
    /// Address the device listens on
    #[arg(long, default_value = "0.0.0.0:10502")]
    listen: SocketAddr,
    /// Run the interactive client against this device address
    #[arg(long)]
    connect: Option<SocketAddr>,
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(addr) = args.connect {
        let config = args.client.client_config(Framing::Tcp)?;
        let ctx = tcp::connect_slave(addr, Slave(args.device.id)).await?;
        info!(%addr, unit = args.device.id, "client connected");
        run_client(ctx, args.device.id, args.device.fill, config).await?;
        return Ok(());
    }

    // TCP devices answer every unit id.
    let service = DeviceService::new(new_handler(args.device.fill));
    let stats = service.stats();
    let device = TcpDevice::bind(args.listen, service).await?;
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
