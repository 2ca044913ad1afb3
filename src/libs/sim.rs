use std::thread;
use std::time::Duration;

use crate::libs::common::DebugError;
use crate::libs::device::{
    Address, BreakpointTable, CtlOp, Device, DeviceStatus, EraseKind, RegFile,
    DEVICE_MAX_BREAKPOINTS,
};
use crate::libs::interrupt;
use crate::libs::options::{Options, FPERM_LOCKED_FLASH};

/// Size of the simulated address space.
pub const SIM_MEM_SIZE: usize = 0x10000;

// MSP430 flash layout: four 64-byte info segments below main flash.
// Segment A holds factory calibration data and stays locked unless the
// flash-permission flag says otherwise.
const INFO_START: Address = 0x1000;
const INFO_SEG_SIZE: Address = 0x40;
const INFOA_START: Address = 0x10c0;
const INFO_END: Address = 0x1100;
const MAIN_START: Address = 0x2000;
const MAIN_SEG_SIZE: Address = 0x200;
const RESET_VECTOR: Address = 0xfffe;

/// An in-memory stand-in for a target device.
///
/// 64 KiB of erased (0xFF) memory, sixteen 16-bit registers and a full
/// breakpoint table. Resuming with at least one breakpoint enabled
/// "hits" it on the next poll; resuming with none keeps the core
/// nominally running until the host halts it, which is what a real
/// free-running part looks like to the dispatcher.
pub struct SimDevice {
    mem: Vec<u8>,
    regs: RegFile,
    bps: BreakpointTable,
    running: bool,
    fperm: u8,
}

impl SimDevice {
    pub fn new(opts: &Options) -> SimDevice {
        SimDevice {
            mem: vec![0xff; SIM_MEM_SIZE],
            regs: [0; crate::libs::device::DEVICE_NUM_REGS],
            bps: BreakpointTable::new(DEVICE_MAX_BREAKPOINTS),
            running: false,
            fperm: opts.read_fperm(),
        }
    }

    fn check_range(&self, addr: Address, len: usize) -> Result<(), DebugError> {
        if (addr as usize) + len > SIM_MEM_SIZE {
            return Err(DebugError::Device(format!(
                "address range 0x{:04x}+0x{:x} outside the 64K address space",
                addr, len
            )));
        }
        Ok(())
    }

    fn fill_erased(&mut self, start: Address, end: Address) {
        for b in &mut self.mem[start as usize..end as usize] {
            *b = 0xff;
        }
    }

    fn erase_info_segment(&mut self, seg_start: Address) -> Result<(), DebugError> {
        if seg_start >= INFOA_START && self.fperm & FPERM_LOCKED_FLASH == 0 {
            return Err(DebugError::Device(
                "info segment A is locked (enable_locked_flash_access not set)".to_string(),
            ));
        }
        self.fill_erased(seg_start, seg_start + INFO_SEG_SIZE);
        Ok(())
    }
}

impl Device for SimDevice {
    fn bp_table(&self) -> &BreakpointTable {
        &self.bps
    }

    fn bp_table_mut(&mut self) -> &mut BreakpointTable {
        &mut self.bps
    }

    fn readmem(&mut self, addr: Address, mem: &mut [u8]) -> Result<(), DebugError> {
        self.check_range(addr, mem.len())?;
        let start = addr as usize;
        mem.copy_from_slice(&self.mem[start..start + mem.len()]);
        Ok(())
    }

    fn writemem(&mut self, addr: Address, mem: &[u8]) -> Result<(), DebugError> {
        self.check_range(addr, mem.len())?;
        let start = addr as usize;
        self.mem[start..start + mem.len()].copy_from_slice(mem);
        Ok(())
    }

    fn getregs(&mut self) -> Result<RegFile, DebugError> {
        Ok(self.regs)
    }

    fn setregs(&mut self, regs: &RegFile) -> Result<(), DebugError> {
        for (dst, src) in self.regs.iter_mut().zip(regs.iter()) {
            *dst = src & 0xffff;
        }
        Ok(())
    }

    fn erase(&mut self, kind: EraseKind, addr: Address) -> Result<(), DebugError> {
        match kind {
            EraseKind::All => {
                self.fill_erased(MAIN_START, SIM_MEM_SIZE as Address);
                // Info A survives a mass erase unless unlocked.
                self.fill_erased(INFO_START, INFOA_START);
                if self.fperm & FPERM_LOCKED_FLASH != 0 {
                    self.fill_erased(INFOA_START, INFO_END);
                }
                Ok(())
            }
            EraseKind::Main => {
                self.fill_erased(MAIN_START, SIM_MEM_SIZE as Address);
                Ok(())
            }
            EraseKind::Segment => {
                if (INFO_START..INFO_END).contains(&addr) {
                    self.erase_info_segment(addr & !(INFO_SEG_SIZE - 1))
                } else if addr >= MAIN_START {
                    let seg = addr & !(MAIN_SEG_SIZE - 1);
                    self.fill_erased(seg, seg + MAIN_SEG_SIZE);
                    Ok(())
                } else {
                    Err(DebugError::Device(format!(
                        "0x{:04x} is not a flash address",
                        addr
                    )))
                }
            }
        }
    }

    fn ctl(&mut self, op: CtlOp) -> Result<(), DebugError> {
        match op {
            CtlOp::Run => {
                // The table is the hardware here, so reconciliation is
                // just acknowledging the dirty slots.
                self.bps.clear_dirty();
                self.running = true;
                Ok(())
            }
            CtlOp::Step => {
                self.regs[0] = (self.regs[0].wrapping_add(2)) & 0xffff;
                Ok(())
            }
            CtlOp::Halt => {
                self.running = false;
                Ok(())
            }
            CtlOp::Reset => {
                self.running = false;
                self.regs = [0; crate::libs::device::DEVICE_NUM_REGS];
                let vec = RESET_VECTOR as usize;
                self.regs[0] =
                    u32::from(self.mem[vec]) | (u32::from(self.mem[vec + 1]) << 8);
                Ok(())
            }
            CtlOp::Secure => Err(DebugError::Device(
                "the simulated target has no JTAG fuse".to_string(),
            )),
        }
    }

    fn poll(&mut self) -> DeviceStatus {
        if !self.running {
            return DeviceStatus::Halted;
        }
        if self.bps.slots().iter().any(|bp| bp.enabled) {
            // Nothing actually executes, so an armed breakpoint "hits"
            // on the first tick after resume.
            self.running = false;
            return DeviceStatus::Halted;
        }
        if interrupt::check() {
            return DeviceStatus::Intr;
        }
        thread::sleep(Duration::from_millis(50));
        DeviceStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::device::BpType;

    fn sim() -> SimDevice {
        SimDevice::new(&Options::new())
    }

    #[test]
    fn memory_starts_erased_and_round_trips() {
        let mut dev = sim();
        let mut buf = [0u8; 4];
        dev.readmem(0x2000, &mut buf).unwrap();
        assert_eq!(buf, [0xff; 4]);

        dev.writemem(0x2100, &[0xbe, 0xef]).unwrap();
        let mut buf = [0u8; 2];
        dev.readmem(0x2100, &mut buf).unwrap();
        assert_eq!(buf, [0xbe, 0xef]);
    }

    #[test]
    fn out_of_range_access_fails() {
        let mut dev = sim();
        let mut buf = [0u8; 4];
        assert!(dev.readmem(0xfffe, &mut buf).is_err());
        assert!(dev.writemem(0xffff, &[0, 0]).is_err());
    }

    #[test]
    fn registers_masked_to_16_bits() {
        let mut dev = sim();
        let mut regs = [0u32; 16];
        regs[4] = 0x12_3456;
        dev.setregs(&regs).unwrap();
        assert_eq!(dev.getregs().unwrap()[4], 0x3456);
    }

    #[test]
    fn reset_loads_pc_from_reset_vector() {
        let mut dev = sim();
        dev.writemem(0xfffe, &[0x00, 0x44]).unwrap();
        dev.ctl(CtlOp::Reset).unwrap();
        assert_eq!(dev.getregs().unwrap()[0], 0x4400);
    }

    #[test]
    fn run_clears_dirty_and_breakpoint_hits() {
        let _serial = crate::libs::interrupt::testsup::lock();
        interrupt::clear();

        let mut dev = sim();
        dev.setbrk(None, true, 0x2200, BpType::Break).unwrap();
        assert!(dev.bp_table().slots()[0].dirty);

        dev.ctl(CtlOp::Run).unwrap();
        assert!(dev.bp_table().slots().iter().all(|bp| !bp.dirty));
        assert_eq!(dev.poll(), DeviceStatus::Halted);
        assert_eq!(dev.poll(), DeviceStatus::Halted);
    }

    #[test]
    fn free_run_keeps_running_until_halt() {
        let _serial = crate::libs::interrupt::testsup::lock();
        interrupt::clear();

        let mut dev = sim();
        dev.ctl(CtlOp::Run).unwrap();
        assert_eq!(dev.poll(), DeviceStatus::Running);
        dev.ctl(CtlOp::Halt).unwrap();
        assert_eq!(dev.poll(), DeviceStatus::Halted);
    }

    #[test]
    fn user_break_surfaces_as_intr() {
        let _serial = crate::libs::interrupt::testsup::lock();
        interrupt::clear();

        let mut dev = sim();
        dev.ctl(CtlOp::Run).unwrap();
        interrupt::raise();
        let status = dev.poll();
        interrupt::clear();
        assert_eq!(status, DeviceStatus::Intr);
    }

    #[test]
    fn erase_main_leaves_info_flash() {
        let mut dev = sim();
        dev.writemem(0x1000, &[0x11]).unwrap();
        dev.writemem(0x2000, &[0x22]).unwrap();
        dev.erase(EraseKind::Main, 0).unwrap();

        let mut buf = [0u8; 1];
        dev.readmem(0x2000, &mut buf).unwrap();
        assert_eq!(buf[0], 0xff);
        dev.readmem(0x1000, &mut buf).unwrap();
        assert_eq!(buf[0], 0x11);
    }

    #[test]
    fn info_a_locked_without_permission() {
        let mut dev = sim();
        assert!(dev.erase(EraseKind::Segment, 0x10c0).is_err());

        let mut opts = Options::new();
        opts.set_boolean("enable_locked_flash_access", true);
        let mut dev = SimDevice::new(&opts);
        dev.writemem(0x10c0, &[0x33]).unwrap();
        dev.erase(EraseKind::Segment, 0x10c0).unwrap();
        let mut buf = [0u8; 1];
        dev.readmem(0x10c0, &mut buf).unwrap();
        assert_eq!(buf[0], 0xff);
    }

    #[test]
    fn segment_erase_covers_whole_segment() {
        let mut dev = sim();
        dev.writemem(0x2400, &[0x55]).unwrap();
        dev.writemem(0x25ff, &[0x66]).unwrap();
        dev.erase(EraseKind::Segment, 0x2410).unwrap();
        let mut buf = [0u8; 1];
        dev.readmem(0x2400, &mut buf).unwrap();
        assert_eq!(buf[0], 0xff);
        dev.readmem(0x25ff, &mut buf).unwrap();
        assert_eq!(buf[0], 0xff);
    }
}
