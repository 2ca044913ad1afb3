use std::net::ToSocketAddrs;

use crate::libs::common::{hexval, DebugError};
use crate::libs::device::{
    Address, BreakpointTable, BpType, CtlOp, Device, DeviceStatus, EraseKind, RegFile,
    DEVICE_MAX_BREAKPOINTS, DEVICE_NUM_REGS,
};
use crate::libs::gdb_proto::GdbSession;
use crate::libs::interrupt;
use crate::libs::options::Options;
use crate::libs::output;
use crate::libs::sockets;

const DEFAULT_PORT: u16 = 2000;
const MAX_HOSTNAME: usize = 127;

/// A device driven over the wire: this end speaks as the GDB client
/// and the remote stub is the target.
///
/// The breakpoint table is reconciled lazily: `setbrk` only marks
/// slots dirty, and the next resume sends the `z`/`Z` delta against
/// the shadow copy of what the stub last saw.
pub struct GdbClient {
    session: GdbSession,
    bps: BreakpointTable,
    last_bps: [crate::libs::device::Breakpoint; DEVICE_MAX_BREAKPOINTS],
    is_running: bool,
    xfer_size: usize,
}

// Splits "host[:port]" into a hostname capped at 127 characters and a
// port defaulting to 2000.
fn parse_target(spec: &str) -> (String, u16) {
    let (host, port) = match spec.rsplit_once(':') {
        Some((host, port_text)) => (host, port_text.parse().unwrap_or(DEFAULT_PORT)),
        None => (spec, DEFAULT_PORT),
    };
    let mut host = host.to_string();
    if host.len() > MAX_HOSTNAME {
        let mut cut = MAX_HOSTNAME;
        while !host.is_char_boundary(cut) {
            cut -= 1;
        }
        host.truncate(cut);
    }
    (host, port)
}

impl GdbClient {
    /// Connects to a remote RSP stub given as `host[:port]`.
    pub fn open(spec: &str, opts: &Options) -> Result<GdbClient, DebugError> {
        let (host, port) = parse_target(spec);

        output::print_dbg(&format!("Looking up {}...", host));
        let addr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| DebugError::Device(format!("no such host: {}", host)))?;

        output::print_dbg(&format!("Connecting to {}...", addr));
        let stream = sockets::connect(&addr)?;

        Ok(GdbClient {
            session: GdbSession::new(stream),
            bps: BreakpointTable::new(DEVICE_MAX_BREAKPOINTS),
            last_bps: [crate::libs::device::Breakpoint::default(); DEVICE_MAX_BREAKPOINTS],
            is_running: false,
            xfer_size: opts.xfer_size(),
        })
    }

    // Reads a reply packet and insists on a non-error response.
    fn check_ok(&mut self) -> Result<(), DebugError> {
        let buf = self.session.read_packet()?;
        if buf.is_empty() || buf[0] == b'E' {
            output::print_err(&format!(
                "gdbc: bad response: {}",
                String::from_utf8_lossy(&buf)
            ));
            return Err(DebugError::Device(
                "bad response from remote stub".to_string(),
            ));
        }
        Ok(())
    }

    fn do_reset(&mut self) -> Result<(), DebugError> {
        self.session.send("R00")?;
        let mut buf = self.session.read_packet()?;
        if buf.is_empty() {
            // Older stubs only know the legacy restart packet.
            self.session.send("r")?;
            buf = self.session.read_packet()?;
        }
        if !buf.starts_with(b"OK") {
            output::print_err(&format!(
                "gdbc: reset: bad response: {}",
                String::from_utf8_lossy(&buf)
            ));
            return Err(DebugError::Device("reset rejected".to_string()));
        }
        Ok(())
    }

    fn bp_send(&mut self, cmd: char, addr: Address, bptype: BpType) -> Result<(), DebugError> {
        let type_code = match bptype {
            BpType::Break => 1,
            BpType::Write => 2,
            BpType::Read => 3,
            BpType::Watch => 4,
        };
        self.session.packet_start();
        self.session
            .put_str(&format!("{}{},{:04x},2", cmd, type_code, addr));
        self.session.packet_end();
        self.session.flush_ack()?;
        self.check_ok()
    }

    // Sends the z/Z delta for every dirty slot, then snapshots the
    // table as the stub's last known state.
    fn refresh_bps(&mut self) -> Result<(), DebugError> {
        for i in 0..self.bps.max_breakpoints() {
            let bp = self.bps.slots()[i];
            if !bp.dirty {
                continue;
            }
            let old = self.last_bps[i];

            if old.enabled {
                self.bp_send('z', old.addr, old.bptype)?;
            }
            if bp.enabled {
                self.bp_send('Z', bp.addr, bp.bptype)?;
            }
            self.bps.slots_mut()[i].dirty = false;
        }

        for (shadow, bp) in self.last_bps.iter_mut().zip(self.bps.slots().iter()) {
            *shadow = *bp;
        }
        Ok(())
    }
}

impl Device for GdbClient {
    fn bp_table(&self) -> &BreakpointTable {
        &self.bps
    }

    fn bp_table_mut(&mut self) -> &mut BreakpointTable {
        &mut self.bps
    }

    fn readmem(&mut self, addr: Address, mem: &mut [u8]) -> Result<(), DebugError> {
        let mut addr = addr;
        let mut off = 0;
        while off < mem.len() {
            let plen = (mem.len() - off).min(self.xfer_size);

            self.session.packet_start();
            self.session.put_str(&format!("m{:04x},{:x}", addr, plen));
            self.session.packet_end();
            self.session.flush_ack()?;

            let buf = self.session.read_packet()?;
            if buf.len() < plen * 2 {
                output::print_err(&format!(
                    "gdbc: short read at 0x{:04x}: expected {} bytes, got {}",
                    addr,
                    plen,
                    buf.len() / 2
                ));
                return Err(DebugError::Protocol("short memory read reply".to_string()));
            }
            for i in 0..plen {
                mem[off + i] = (hexval(buf[i * 2]) << 4) | hexval(buf[i * 2 + 1]);
            }

            off += plen;
            addr += plen as Address;
        }
        Ok(())
    }

    fn writemem(&mut self, addr: Address, mem: &[u8]) -> Result<(), DebugError> {
        let mut addr = addr;
        let mut off = 0;
        while off < mem.len() {
            let plen = (mem.len() - off).min(self.xfer_size);

            self.session.packet_start();
            self.session.put_str(&format!("M{:04x},{:x}:", addr, plen));
            for &b in &mem[off..off + plen] {
                self.session.put_str(&format!("{:02x}", b));
            }
            self.session.packet_end();
            self.session.flush_ack()?;
            self.check_ok()?;

            off += plen;
            addr += plen as Address;
        }
        Ok(())
    }

    fn getregs(&mut self) -> Result<RegFile, DebugError> {
        self.session.send("g")?;
        let buf = self.session.read_packet()?;
        if buf.len() < DEVICE_NUM_REGS * 4 {
            output::print_err(&format!(
                "gdbc: short read: expected {} chars, got {}",
                DEVICE_NUM_REGS * 4,
                buf.len()
            ));
            return Err(DebugError::Protocol("short register reply".to_string()));
        }

        let mut regs = [0; DEVICE_NUM_REGS];
        for (i, reg) in regs.iter_mut().enumerate() {
            // Four hex digits per register, low byte first on the wire.
            let t = &buf[i * 4..];
            *reg = (u32::from(hexval(t[0])) << 4)
                | u32::from(hexval(t[1]))
                | (u32::from(hexval(t[2])) << 12)
                | (u32::from(hexval(t[3])) << 8);
        }
        Ok(regs)
    }

    fn setregs(&mut self, regs: &RegFile) -> Result<(), DebugError> {
        self.session.packet_start();
        self.session.put_str("G");
        for reg in regs {
            self.session
                .put_str(&format!("{:02x}{:02x}", reg & 0xff, (reg >> 8) & 0xff));
        }
        self.session.packet_end();
        self.session.flush_ack()?;
        self.check_ok()
    }

    fn erase(&mut self, _kind: EraseKind, _addr: Address) -> Result<(), DebugError> {
        // The stub's erase is reached through its monitor interface,
        // which takes no arguments.
        self.session.packet_start();
        self.session.put_str("qRcmd,");
        for &b in b"erase" {
            self.session.put_str(&format!("{:02x}", b));
        }
        self.session.packet_end();
        self.session.flush_ack()?;
        self.session.read_packet()?;
        Ok(())
    }

    fn ctl(&mut self, op: CtlOp) -> Result<(), DebugError> {
        match op {
            CtlOp::Step => {
                self.session.send("s")?;
                self.check_ok()
            }
            CtlOp::Run => {
                self.refresh_bps()?;
                self.session.send("c")?;
                self.is_running = true;
                Ok(())
            }
            CtlOp::Halt => {
                if self.is_running {
                    self.session.send_break()?;
                    self.is_running = false;
                    // The stub answers the interrupt with a stop reply.
                    self.check_ok()?;
                }
                Ok(())
            }
            CtlOp::Reset => self.do_reset(),
            CtlOp::Secure => {
                output::print_err("gdbc: unsupported operation");
                Err(DebugError::Device(
                    "secure is not available over the remote protocol".to_string(),
                ))
            }
        }
    }

    fn poll(&mut self) -> DeviceStatus {
        if !self.is_running {
            return DeviceStatus::Halted;
        }

        let peeked = self.session.peek(50);
        if interrupt::check() {
            return DeviceStatus::Intr;
        }

        match peeked {
            Err(_) => {
                self.is_running = false;
                DeviceStatus::Error
            }
            Ok(false) => DeviceStatus::Running,
            Ok(true) => {
                // A stop reply is pending.
                self.is_running = false;
                match self.session.read_packet() {
                    Ok(_) => DeviceStatus::Halted,
                    Err(_) => DeviceStatus::Error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::interrupt::testsup;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    // Runs a scripted stub on its own thread, speaking through the
    // same codec the server uses.
    fn scripted_stub<F>(script: F) -> (GdbClient, JoinHandle<()>)
    where
        F: FnOnce(&mut GdbSession) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut sess = GdbSession::new(stream);
            script(&mut sess);
        });
        let client = GdbClient::open(&format!("127.0.0.1:{}", port), &Options::new()).unwrap();
        (client, handle)
    }

    #[test]
    fn parse_target_defaults() {
        assert_eq!(parse_target("remote"), ("remote".to_string(), 2000));
        assert_eq!(parse_target("remote:3333"), ("remote".to_string(), 3333));
        let long = "h".repeat(300);
        let (host, port) = parse_target(&long);
        assert_eq!(host.len(), 127);
        assert_eq!(port, 2000);
    }

    #[test]
    fn getregs_decodes_little_endian_words() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            let req = sess.read_packet().unwrap();
            assert_eq!(req, b"g");
            let mut reply = String::from("3412");
            reply.push_str(&"0000".repeat(15));
            sess.send(&reply).unwrap();
        });

        let regs = client.getregs().unwrap();
        stub.join().unwrap();
        assert_eq!(regs[0], 0x1234);
        assert_eq!(regs[1], 0);
    }

    #[test]
    fn setregs_emits_low_byte_first() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            let req = sess.read_packet().unwrap();
            let mut expected = String::from("G3412");
            expected.push_str(&"0000".repeat(15));
            assert_eq!(req, expected.as_bytes());
            sess.send("OK").unwrap();
        });

        let mut regs = [0u32; DEVICE_NUM_REGS];
        regs[0] = 0x1234;
        client.setregs(&regs).unwrap();
        stub.join().unwrap();
    }

    #[test]
    fn readmem_chunks_by_xfer_size() {
        let _serial = testsup::lock();
        interrupt::clear();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stub = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut sess = GdbSession::new(stream);
            assert_eq!(sess.read_packet().unwrap(), b"m2000,4");
            sess.send("00112233").unwrap();
            assert_eq!(sess.read_packet().unwrap(), b"m2004,4");
            sess.send("44556677").unwrap();
            assert_eq!(sess.read_packet().unwrap(), b"m2008,2");
            sess.send("8899").unwrap();
        });

        let mut opts = Options::new();
        opts.set_numeric("gdbc_xfer_size", 4);
        let mut client =
            GdbClient::open(&format!("127.0.0.1:{}", port), &opts).unwrap();

        let mut mem = [0u8; 10];
        client.readmem(0x2000, &mut mem).unwrap();
        stub.join().unwrap();
        assert_eq!(
            mem,
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99]
        );
    }

    #[test]
    fn short_memory_reply_fails() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            assert_eq!(sess.read_packet().unwrap(), b"m2000,2");
            sess.send("ab").unwrap();
        });

        let mut mem = [0u8; 2];
        assert!(client.readmem(0x2000, &mut mem).is_err());
        stub.join().unwrap();
    }

    #[test]
    fn writemem_sends_hex_and_expects_ok() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            assert_eq!(sess.read_packet().unwrap(), b"M2100,2:beef");
            sess.send("OK").unwrap();
        });

        client.writemem(0x2100, &[0xbe, 0xef]).unwrap();
        stub.join().unwrap();
    }

    #[test]
    fn writemem_error_reply_fails() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            sess.read_packet().unwrap();
            sess.send("E01").unwrap();
        });

        assert!(client.writemem(0x2100, &[0x00]).is_err());
        stub.join().unwrap();
    }

    #[test]
    fn reset_falls_back_to_legacy_packet() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            assert_eq!(sess.read_packet().unwrap(), b"R00");
            sess.send("").unwrap();
            assert_eq!(sess.read_packet().unwrap(), b"r");
            sess.send("OK").unwrap();
        });

        client.ctl(CtlOp::Reset).unwrap();
        stub.join().unwrap();
    }

    #[test]
    fn run_reconciles_breakpoints_then_continues() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            assert_eq!(sess.read_packet().unwrap(), b"Z1,2200,2");
            sess.send("OK").unwrap();
            assert_eq!(sess.read_packet().unwrap(), b"c");
            // Interrupt byte arrives outside any packet.
            assert_eq!(sess.getc().unwrap(), 0x03);
            sess.send("T0500:0000;").unwrap();
        });

        client.setbrk(None, true, 0x2200, BpType::Break).unwrap();
        client.ctl(CtlOp::Run).unwrap();

        // All dirty bits cleared and the shadow matches the table.
        assert!(client.bp_table().slots().iter().all(|bp| !bp.dirty));
        for (shadow, bp) in client.last_bps.iter().zip(client.bps.slots().iter()) {
            assert_eq!(shadow, bp);
        }

        client.ctl(CtlOp::Halt).unwrap();
        stub.join().unwrap();
    }

    #[test]
    fn disabling_sends_z_clear_only() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            assert_eq!(sess.read_packet().unwrap(), b"Z1,2200,2");
            sess.send("OK").unwrap();
            assert_eq!(sess.read_packet().unwrap(), b"c");
            assert_eq!(sess.getc().unwrap(), 0x03);
            sess.send("T0500:0000;").unwrap();

            assert_eq!(sess.read_packet().unwrap(), b"z1,2200,2");
            sess.send("OK").unwrap();
            assert_eq!(sess.read_packet().unwrap(), b"c");
            assert_eq!(sess.getc().unwrap(), 0x03);
            sess.send("T0500:0000;").unwrap();
        });

        client.setbrk(None, true, 0x2200, BpType::Break).unwrap();
        client.ctl(CtlOp::Run).unwrap();
        client.ctl(CtlOp::Halt).unwrap();

        client.setbrk(None, false, 0x2200, BpType::Break).unwrap();
        client.ctl(CtlOp::Run).unwrap();
        client.ctl(CtlOp::Halt).unwrap();
        stub.join().unwrap();
    }

    #[test]
    fn poll_running_then_stop_reply() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            assert_eq!(sess.read_packet().unwrap(), b"c");
            thread::sleep(std::time::Duration::from_millis(120));
            sess.send("T0500:0000;").unwrap();
        });

        assert_eq!(client.poll(), DeviceStatus::Halted);
        client.ctl(CtlOp::Run).unwrap();
        assert_eq!(client.poll(), DeviceStatus::Running);

        // The stop reply lands within a few poll ticks.
        let mut status = DeviceStatus::Running;
        for _ in 0..20 {
            status = client.poll();
            if status != DeviceStatus::Running {
                break;
            }
        }
        assert_eq!(status, DeviceStatus::Halted);
        assert_eq!(client.poll(), DeviceStatus::Halted);
        stub.join().unwrap();
    }

    #[test]
    fn poll_reports_user_break() {
        let _serial = testsup::lock();
        interrupt::clear();

        let (mut client, stub) = scripted_stub(|sess| {
            assert_eq!(sess.read_packet().unwrap(), b"c");
            // Respond to the halt that follows the break.
            assert_eq!(sess.getc().unwrap(), 0x03);
            sess.send("T0500:0000;").unwrap();
        });

        client.ctl(CtlOp::Run).unwrap();
        interrupt::raise();
        let status = client.poll();
        interrupt::clear();
        assert_eq!(status, DeviceStatus::Intr);

        client.ctl(CtlOp::Halt).unwrap();
        stub.join().unwrap();
    }
}
