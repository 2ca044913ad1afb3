use clap::Parser;

use rust_msp_tools::libs::commands::{CommandProcessor, TargetCommands};
use rust_msp_tools::libs::device::Device;
use rust_msp_tools::libs::gdb_client::GdbClient;
use rust_msp_tools::libs::input_async::AsyncInput;
use rust_msp_tools::libs::interrupt;
use rust_msp_tools::libs::options::Options;
use rust_msp_tools::libs::output;
use rust_msp_tools::libs::sim::SimDevice;

use std::process;

/// Struct representing the CLI arguments
#[derive(Parser, Debug)]
#[command(
    about = "Interactive maintenance shell for an MSP430 target.",
    long_about = None
)]
struct Cli {
    /// Drive a remote RSP stub at host[:port] instead of the built-in
    /// simulated target.
    #[arg(short = 'c', long = "connect")]
    connect: Option<String>,

    /// Allow erasing the locked flash segment (info A).
    #[arg(long = "allow-locked-flash")]
    allow_locked_flash: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut opts = Options::new();
    opts.set_boolean("enable_locked_flash_access", cli.allow_locked_flash);

    interrupt::install_ctrlc_handler().expect("Error setting Ctrl-C handler");

    let mut device: Box<dyn Device> = match &cli.connect {
        Some(target) => match GdbClient::open(target, &opts) {
            Ok(client) => Box::new(client),
            Err(e) => {
                eprintln!("rust-msp-shell: {}: {}", target, e);
                process::exit(1);
            }
        },
        None => Box::new(SimDevice::new(&opts)),
    };

    output::print("Type 'help' for a command list; \\break interrupts a stuck operation.");

    let input = AsyncInput::start();
    let mut commands = TargetCommands;
    while let Some(line) = input.read_command() {
        if line.is_empty() {
            continue;
        }
        // A break left over from the previous command must not cancel
        // this one.
        interrupt::clear();
        commands.process_command(device.as_mut(), &line);
    }
}
