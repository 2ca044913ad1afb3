use std::cell::RefCell;
use std::net::TcpStream;
use std::rc::Rc;

use crate::libs::commands::CommandProcessor;
use crate::libs::common::{hex_to_bytes, hexval, parse_dec, parse_hex, DebugError};
use crate::libs::device::{BpType, CtlOp, Device, DeviceStatus, DEVICE_NUM_REGS};
use crate::libs::gdb_proto::{GdbSession, GDB_MAX_XFER};
use crate::libs::interrupt;
use crate::libs::options::Options;
use crate::libs::output;
use crate::libs::sockets;

const MONITOR_CMD_MAX: usize = 128;

// Captured monitor output, bounded by what fits in one reply packet.
struct MonitorBuf {
    buf: String,
    trunc: bool,
}

impl MonitorBuf {
    fn new() -> MonitorBuf {
        MonitorBuf {
            buf: String::new(),
            trunc: false,
        }
    }

    fn push(&mut self, text: &str) {
        if self.trunc {
            return;
        }
        let text = if self.buf.len() + text.len() + 64 > GDB_MAX_XFER {
            self.trunc = true;
            "...<truncated>"
        } else {
            text
        };
        self.buf.push_str(text);
        self.buf.push('\n');
    }
}

enum Flow {
    Continue,
    Exit,
}

struct ServerSession<'a> {
    gdb: GdbSession,
    device: &'a mut dyn Device,
    commands: &'a mut dyn CommandProcessor,
    // Bytes per register on the wire. msp430-elf-gdb expects 32-bit
    // register fields and is recognised by the multiprocess+ feature
    // in its qSupported packet.
    register_bytes: usize,
}

impl<'a> ServerSession<'a> {
    fn put_register(&mut self, value: u32) {
        let mut value = value;
        let mut text = String::new();
        for _ in 0..self.register_bytes {
            text.push_str(&format!("{:02x}", value & 0xff));
            value >>= 8;
        }
        self.gdb.put_str(&text);
    }

    fn read_registers(&mut self) -> Result<(), DebugError> {
        output::print("Reading registers");
        let regs = match self.device.getregs() {
            Ok(regs) => regs,
            Err(_) => return self.gdb.send("E00"),
        };

        self.gdb.packet_start();
        for reg in regs {
            self.put_register(reg);
        }
        self.gdb.packet_end();
        self.gdb.flush_ack()
    }

    fn write_registers(&mut self, buf: &[u8]) -> Result<(), DebugError> {
        let digits = self.register_bytes * 2;
        if buf.len() < DEVICE_NUM_REGS * digits {
            return self.gdb.send("E00");
        }

        output::print("Writing registers");
        let mut regs = [0u32; DEVICE_NUM_REGS];
        for (i, reg) in regs.iter_mut().enumerate() {
            let text = &buf[i * digits..];
            for j in 0..self.register_bytes {
                let byte = (hexval(text[j * 2]) << 4) | hexval(text[j * 2 + 1]);
                *reg |= u32::from(byte) << (8 * j);
            }
        }

        if self.device.setregs(&regs).is_err() {
            return self.gdb.send("E00");
        }
        self.gdb.send("OK")
    }

    fn read_memory(&mut self, text: &[u8]) -> Result<(), DebugError> {
        let comma = match text.iter().position(|&b| b == b',') {
            Some(i) => i,
            None => {
                output::print_err("gdb: malformed memory read request");
                return self.gdb.send("E00");
            }
        };
        let addr = parse_hex(&text[..comma]);
        let length = (parse_hex(&text[comma + 1..]) as usize).min(GDB_MAX_XFER);

        output::print(&format!("Reading {:4} bytes from 0x{:04x}", length, addr));

        let mut mem = vec![0u8; length];
        if self.device.readmem(addr, &mut mem).is_err() {
            return self.gdb.send("E00");
        }

        self.gdb.packet_start();
        let mut hex = String::with_capacity(length * 2);
        for b in &mem {
            hex.push_str(&format!("{:02x}", b));
        }
        self.gdb.put_str(&hex);
        self.gdb.packet_end();
        self.gdb.flush_ack()
    }

    fn write_memory(&mut self, text: &[u8]) -> Result<(), DebugError> {
        let colon = text.iter().position(|&b| b == b':');
        let comma = text.iter().position(|&b| b == b',');
        let (colon, comma) = match (colon, comma) {
            (Some(colon), Some(comma)) if comma < colon => (colon, comma),
            _ => {
                output::print_err("gdb: malformed memory write request");
                return self.gdb.send("E00");
            }
        };

        let addr = parse_hex(&text[..comma]);
        let length = parse_hex(&text[comma + 1..colon]) as usize;
        let data = hex_to_bytes(&text[colon + 1..]);

        if data.len() != length {
            output::print_err("gdb: length mismatch");
            return self.gdb.send("E00");
        }

        output::print(&format!("Writing {:4} bytes to 0x{:04x}", length, addr));

        if self.device.writemem(addr, &data).is_err() {
            return self.gdb.send("E00");
        }
        self.gdb.send("OK")
    }

    // An optional resume address overrides the program counter.
    fn run_set_pc(&mut self, buf: &[u8]) -> Result<(), DebugError> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut regs = self.device.getregs()?;
        regs[0] = parse_hex(buf);
        self.device.setregs(&regs)
    }

    fn run_final_status(&mut self) -> Result<(), DebugError> {
        let regs = match self.device.getregs() {
            Ok(regs) => regs,
            Err(_) => return self.gdb.send("E00"),
        };

        self.gdb.packet_start();
        self.gdb.put_str("T05");
        for (i, reg) in regs.iter().enumerate() {
            self.gdb.put_str(&format!("{:02x}:", i));
            self.put_register(*reg);
            self.gdb.put_str(";");
        }
        self.gdb.packet_end();
        self.gdb.flush_ack()
    }

    fn single_step(&mut self, buf: &[u8]) -> Result<(), DebugError> {
        output::print("Single stepping");

        if self.run_set_pc(buf).is_err() || self.device.ctl(CtlOp::Step).is_err() {
            return self.gdb.send("E00");
        }
        self.run_final_status()
    }

    fn run(&mut self, buf: &[u8]) -> Result<(), DebugError> {
        output::print("Running");

        if self.run_set_pc(buf).is_err() || self.device.ctl(CtlOp::Run).is_err() {
            return self.gdb.send("E00");
        }

        loop {
            match self.device.poll() {
                DeviceStatus::Error => return self.gdb.send("E00"),
                DeviceStatus::Halted => {
                    output::print("Target halted");
                    return self.run_final_status();
                }
                DeviceStatus::Intr => {
                    // Consume the break: during a run it halts the
                    // target; only a break between packets ends the
                    // session.
                    interrupt::clear();
                    if self.device.ctl(CtlOp::Halt).is_err() {
                        return self.gdb.send("E00");
                    }
                    return self.run_final_status();
                }
                DeviceStatus::Running => {
                    // Look for the client's interrupt byte between
                    // polls without blocking the loop. A user break
                    // unwinding the peek is picked up as Intr by the
                    // next poll.
                    loop {
                        match self.gdb.peek(0) {
                            Ok(true) => {}
                            Ok(false) | Err(DebugError::Interrupted) => break,
                            Err(e) => return Err(e),
                        }
                        let c = match self.gdb.getc() {
                            Ok(c) => c,
                            Err(DebugError::Interrupted) => break,
                            Err(e) => return Err(e),
                        };
                        if c == 0x03 {
                            output::print("Interrupted by gdb");
                            if self.device.ctl(CtlOp::Halt).is_err() {
                                return self.gdb.send("E00");
                            }
                            return self.run_final_status();
                        }
                    }
                }
            }
        }
    }

    fn set_breakpoint(&mut self, enable: bool, buf: &[u8]) -> Result<(), DebugError> {
        let mut parts = buf.splitn(3, |&b| b == b',');
        let type_text = parts.next().unwrap_or(b"");
        let addr_text = parts.next();

        let bptype = match parse_dec(type_text) {
            0 | 1 => BpType::Break,
            2 => BpType::Write,
            3 => BpType::Read,
            4 => BpType::Watch,
            other => {
                output::print_err(&format!("gdb: unsupported breakpoint type: {}", other));
                return self.gdb.send("");
            }
        };

        let addr = match addr_text {
            Some(text) => parse_hex(text),
            None => {
                output::print_err("gdb: breakpoint address missing");
                return self.gdb.send("E00");
            }
        };

        if enable {
            if self.device.setbrk(None, true, addr, bptype).is_err() {
                output::print_err(&format!("gdb: can't add breakpoint at 0x{:04x}", addr));
                return self.gdb.send("E00");
            }
            output::print(&format!("Breakpoint set at 0x{:04x}", addr));
        } else {
            let _ = self.device.setbrk(None, false, addr, bptype);
            output::print(&format!("Breakpoint cleared at 0x{:04x}", addr));
        }

        self.gdb.send("OK")
    }

    fn restart_program(&mut self) -> Result<(), DebugError> {
        if self.device.ctl(CtlOp::Reset).is_err() {
            return self.gdb.send("E00");
        }
        self.gdb.send("OK")
    }

    fn monitor_command(&mut self, buf: &[u8]) -> Result<(), DebugError> {
        let mut cmd = String::new();
        for pair in buf.chunks_exact(2) {
            if cmd.len() >= MONITOR_CMD_MAX - 1 {
                break;
            }
            cmd.push(char::from((hexval(pair[0]) << 4) | hexval(pair[1])));
        }

        output::print(&format!("Monitor command received: {}", cmd));

        let mbuf = Rc::new(RefCell::new(MonitorBuf::new()));
        let sink = {
            let mbuf = Rc::clone(&mbuf);
            Box::new(move |text: &str| mbuf.borrow_mut().push(text))
        };
        output::capture_start(sink);
        self.commands.process_command(self.device, &cmd);
        output::capture_end();

        let mbuf = mbuf.borrow();
        if mbuf.buf.is_empty() {
            return self.gdb.send("OK");
        }

        self.gdb.packet_start();
        let mut hex = String::with_capacity(mbuf.buf.len() * 2);
        for b in mbuf.buf.bytes() {
            hex.push_str(&format!("{:02x}", b));
        }
        self.gdb.put_str(&hex);
        self.gdb.packet_end();
        self.gdb.flush_ack()
    }

    fn send_supported(&mut self, buf: &[u8]) -> Result<(), DebugError> {
        // Recognise msp430-elf-gdb, which wants 32-bit register fields.
        if String::from_utf8_lossy(buf).contains("multiprocess+") {
            self.register_bytes = 4;
        }

        self.gdb.packet_start();
        self.gdb
            .put_str(&format!("PacketSize={:x}", GDB_MAX_XFER * 2));
        self.gdb.packet_end();
        self.gdb.flush_ack()
    }

    fn send_empty_threadlist(&mut self) -> Result<(), DebugError> {
        self.gdb
            .send("<?xml version=\"1.0\"?><threads></threads>")
    }

    fn process_packet(&mut self, buf: &[u8]) -> Result<Flow, DebugError> {
        match buf[0] {
            // Report why the target halted.
            b'?' => self.run_final_status()?,

            b'z' | b'Z' => self.set_breakpoint(buf[0] == b'Z', &buf[1..])?,

            b'r' | b'R' => self.restart_program()?,

            b'g' => self.read_registers()?,

            b'G' => self.write_registers(&buf[1..])?,

            b'q' => {
                if buf.starts_with(b"qRcmd,") {
                    self.monitor_command(&buf[6..])?;
                } else if buf.starts_with(b"qSupported") {
                    self.send_supported(buf)?;
                } else if buf.starts_with(b"qfThreadInfo") {
                    self.send_empty_threadlist()?;
                } else {
                    self.gdb.send("")?;
                }
            }

            b'm' => self.read_memory(&buf[1..])?,

            b'M' => self.write_memory(&buf[1..])?,

            b'c' => self.run(&buf[1..])?,

            b's' => self.single_step(&buf[1..])?,

            b'k' => return Ok(Flow::Exit),

            // Unknown or unsupported packets get an empty reply.
            _ => self.gdb.send("")?,
        }
        Ok(Flow::Continue)
    }

    fn reader_loop(&mut self) {
        while !interrupt::check() {
            let buf = match self.gdb.read_packet() {
                Ok(buf) => buf,
                Err(_) => return,
            };
            if buf.is_empty() {
                continue;
            }
            match self.process_packet(&buf) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) | Err(_) => return,
            }
        }
    }
}

/// Serves one accepted client connection until it disconnects, kills
/// the session, or a transport error occurs.
///
/// The device's breakpoint table is forced into a known state before
/// the first packet is processed.
pub fn serve_connection(
    stream: TcpStream,
    device: &mut dyn Device,
    commands: &mut dyn CommandProcessor,
) -> Result<(), DebugError> {
    output::print("Clearing all breakpoints...");
    for i in 0..device.max_breakpoints() {
        device.setbrk(Some(i), false, 0, BpType::Break)?;
    }

    let mut session = ServerSession {
        gdb: GdbSession::new(stream),
        device,
        commands,
        register_bytes: 2,
    };
    session.reader_loop();

    if session.gdb.is_error() {
        Err(DebugError::Closed)
    } else {
        Ok(())
    }
}

fn serve_port(
    port: u16,
    device: &mut dyn Device,
    commands: &mut dyn CommandProcessor,
) -> Result<(), DebugError> {
    let listener = sockets::listen(port)?;
    output::print(&format!(
        "Bound to port {}. Now waiting for connection...",
        port
    ));

    let (stream, peer) = sockets::accept(&listener)?;
    // One client at a time; stop advertising until it is gone.
    drop(listener);
    output::print(&format!("Client connected from {}", peer));

    serve_connection(stream, device, commands)
}

/// Runs the GDB server on the configured port, optionally re-accepting
/// after each session when `gdb_loop` is set.
pub fn run_server(
    device: &mut dyn Device,
    commands: &mut dyn CommandProcessor,
    opts: &Options,
) -> Result<(), DebugError> {
    let port = opts.get_numeric("gdb_default_port") as u16;
    loop {
        serve_port(port, device, commands)?;
        if !opts.get_boolean("gdb_loop") {
            return Ok(());
        }
    }
}
