use clap::Parser;
use clap_num::maybe_hex;

use rust_msp_tools::libs::commands::TargetCommands;
use rust_msp_tools::libs::device::Device;
use rust_msp_tools::libs::gdb_client::GdbClient;
use rust_msp_tools::libs::gdb_server::run_server;
use rust_msp_tools::libs::interrupt;
use rust_msp_tools::libs::options::Options;
use rust_msp_tools::libs::sim::SimDevice;

use std::process;

/// Struct representing the CLI arguments
#[derive(Parser, Debug)]
#[command(
    about = "Serve the GDB remote protocol for an MSP430 target.",
    long_about = None,
    after_help = " Example usage - proxy a remote stub on port 3333:\n
                   rust-msp-gdb --connect devboard:2000 --port 3333"
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(short = 'p', long = "port", default_value_t = 2000)]
    port: u16,

    /// Drive a remote RSP stub at host[:port] instead of the built-in
    /// simulated target.
    #[arg(short = 'c', long = "connect")]
    connect: Option<String>,

    /// Accept another client after the current one disconnects.
    #[arg(long = "loop")]
    loop_sessions: bool,

    /// Per-packet chunk size for remote memory transfers.
    #[arg(short = 'x', long = "xfer-size", value_parser = maybe_hex::<u32>)]
    xfer_size: Option<u32>,

    /// Allow erasing the locked flash segment (info A).
    #[arg(long = "allow-locked-flash")]
    allow_locked_flash: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut opts = Options::new();
    opts.set_numeric("gdb_default_port", cli.port.into());
    opts.set_boolean("gdb_loop", cli.loop_sessions);
    if let Some(xfer) = cli.xfer_size {
        opts.set_numeric("gdbc_xfer_size", xfer);
    }
    opts.set_boolean("enable_locked_flash_access", cli.allow_locked_flash);

    // Ctrl+c raises the user-break flag; blocking socket calls unwind
    // on it.
    interrupt::install_ctrlc_handler().expect("Error setting Ctrl-C handler");

    let mut device: Box<dyn Device> = match &cli.connect {
        Some(target) => match GdbClient::open(target, &opts) {
            Ok(client) => Box::new(client),
            Err(e) => {
                eprintln!("rust-msp-gdb: {}: {}", target, e);
                process::exit(1);
            }
        },
        None => Box::new(SimDevice::new(&opts)),
    };

    let mut commands = TargetCommands;
    if let Err(e) = run_server(device.as_mut(), &mut commands, &opts) {
        eprintln!("rust-msp-gdb: {}", e);
        process::exit(1);
    }
}
