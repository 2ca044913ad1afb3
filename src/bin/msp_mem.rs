use clap::{ArgAction, Parser};
use clap_num::maybe_hex;

use rust_msp_tools::libs::device::Device;
use rust_msp_tools::libs::gdb_client::GdbClient;
use rust_msp_tools::libs::interrupt;
use rust_msp_tools::libs::options::Options;

use std::process;

/// Struct representing the CLI arguments
#[derive(Parser, Debug)]
#[command(
    about = "Read and write MSP430 memory through a remote RSP stub.",
    long_about = None,
    after_help = " Example usage - write two bytes to RAM:\n
                   rust-msp-mem -c devboard:2000 -a 0x2100 -v 0xbe -v 0xef"
)]
struct Cli {
    /// Remote RSP stub as host[:port].
    #[arg(short = 'c', long = "connect", required = true)]
    connect: String,

    /// Target address.
    #[arg(short = 'a', long = "address", required = true, value_parser = maybe_hex::<u32>)]
    address: u32,

    /// Number of bytes to read (or to write, cycling the values).
    #[arg(short = 'l', long = "length", default_value_t = 1, value_parser = maybe_hex::<u32>)]
    length: u32,

    /// Byte values to write; omit to read instead.
    #[arg(short = 'v', long = "value", action = ArgAction::Append, num_args = 1.., value_parser = maybe_hex::<u8>)]
    values: Vec<u8>,

    /// Per-packet chunk size for memory transfers.
    #[arg(short = 'x', long = "xfer-size", value_parser = maybe_hex::<u32>)]
    xfer_size: Option<u32>,
}

fn main() {
    let cli = Cli::parse();

    let mut opts = Options::new();
    if let Some(xfer) = cli.xfer_size {
        opts.set_numeric("gdbc_xfer_size", xfer);
    }

    interrupt::install_ctrlc_handler().expect("Error setting Ctrl-C handler");

    let mut client = match GdbClient::open(&cli.connect, &opts) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("rust-msp-mem: {}: {}", cli.connect, e);
            process::exit(1);
        }
    };

    let length = cli.length as usize;
    if cli.values.is_empty() {
        let mut mem = vec![0u8; length];
        if let Err(e) = client.readmem(cli.address, &mut mem) {
            eprintln!("rust-msp-mem: read failed: {}", e);
            process::exit(1);
        }
        for (index, value) in mem.iter().enumerate() {
            println!("address 0x{:04x}: 0x{:02x}", cli.address + index as u32, value);
        }
    } else {
        let bytes_to_write: Vec<u8> = cli.values.iter().copied().cycle().take(length).collect();
        if let Err(e) = client.writemem(cli.address, &bytes_to_write) {
            eprintln!("rust-msp-mem: write failed: {}", e);
            process::exit(1);
        }
    }
}
