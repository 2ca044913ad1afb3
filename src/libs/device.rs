use crate::libs::common::DebugError;

/// Number of architectural registers on an MSP430 core.
pub const DEVICE_NUM_REGS: usize = 16;

/// Size of the breakpoint table every device carries. Drivers may
/// support fewer slots than this.
pub const DEVICE_MAX_BREAKPOINTS: usize = 32;

/// An architectural address. MSP430 addresses are 16 bits, MSP430X
/// extends them to 20; the meaning of the high bits is up to the
/// driver.
pub type Address = u32;

/// A full register file snapshot.
pub type RegFile = [Address; DEVICE_NUM_REGS];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BpType {
    #[default]
    Break,
    Write,
    Read,
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlOp {
    Run,
    Step,
    Halt,
    Reset,
    Secure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseKind {
    All,
    Main,
    Segment,
}

/// What `poll` learned about the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// The target stopped: breakpoint hit, step finished, or halt.
    Halted,
    /// Still executing, nothing pending.
    Running,
    /// The host user issued a break; the caller should halt the
    /// target and take back control.
    Intr,
    /// Transport or device failure; the session is unusable.
    Error,
}

/// One breakpoint slot. A slot is dirty when it has been modified
/// since the last resume; drivers materialize dirty slots on
/// `ctl(Run)` and clear the flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Breakpoint {
    pub enabled: bool,
    pub dirty: bool,
    pub addr: Address,
    pub bptype: BpType,
}

/// The breakpoint table shared by every device kind.
///
/// Callers mutate slots only through [`set`](BreakpointTable::set);
/// drivers read the slots and clear dirty flags when reconciling.
#[derive(Debug, Clone)]
pub struct BreakpointTable {
    slots: [Breakpoint; DEVICE_MAX_BREAKPOINTS],
    max: usize,
}

impl BreakpointTable {
    /// Creates a table with `max` usable slots, as reported by the
    /// concrete driver at open time.
    pub fn new(max: usize) -> BreakpointTable {
        BreakpointTable {
            slots: [Breakpoint::default(); DEVICE_MAX_BREAKPOINTS],
            max: max.min(DEVICE_MAX_BREAKPOINTS),
        }
    }

    pub fn max_breakpoints(&self) -> usize {
        self.max
    }

    pub fn slots(&self) -> &[Breakpoint] {
        &self.slots[..self.max]
    }

    /// Driver-side access for reconciliation.
    pub fn slots_mut(&mut self) -> &mut [Breakpoint] {
        &mut self.slots[..self.max]
    }

    pub fn clear_dirty(&mut self) {
        for bp in &mut self.slots[..self.max] {
            bp.dirty = false;
        }
    }

    /// Modifies a breakpoint slot.
    ///
    /// With `which = None` the slot is chosen automatically: an
    /// already-enabled slot with the same address and type is reused,
    /// otherwise a free slot is allocated. Enabling with no slot
    /// available fails; disabling a breakpoint that was never set is a
    /// no-op. The dirty flag is raised only when the slot actually
    /// changes.
    pub fn set(
        &mut self,
        which: Option<usize>,
        enabled: bool,
        addr: Address,
        bptype: BpType,
    ) -> Result<(), DebugError> {
        let which = match which {
            Some(i) if i < self.max => i,
            Some(i) => {
                return Err(DebugError::Device(format!("invalid breakpoint slot {}", i)));
            }
            None => {
                let mut matching = None;
                let mut free = None;
                for (i, bp) in self.slots[..self.max].iter().enumerate() {
                    if bp.enabled {
                        if bp.addr == addr && bp.bptype == bptype {
                            matching = Some(i);
                            break;
                        }
                    } else if free.is_none() {
                        free = Some(i);
                    }
                }
                match matching {
                    Some(i) => i,
                    None if !enabled => return Ok(()),
                    None => match free {
                        Some(i) => i,
                        None => {
                            return Err(DebugError::Device(
                                "no free breakpoint slot".to_string(),
                            ));
                        }
                    },
                }
            }
        };

        let bp = &mut self.slots[which];
        if bp.enabled != enabled || bp.addr != addr || bp.bptype != bptype {
            bp.enabled = enabled;
            bp.addr = addr;
            bp.bptype = bptype;
            bp.dirty = true;
        }
        Ok(())
    }
}

/// The operations every target device supports, whether it is a
/// remote RSP stub or a locally simulated core.
///
/// The breakpoint table lives in the device so the dispatcher can
/// manage slots uniformly; the driver-specific state sits next to it
/// in each implementation.
pub trait Device {
    fn bp_table(&self) -> &BreakpointTable;
    fn bp_table_mut(&mut self) -> &mut BreakpointTable;

    /// Reads `mem.len()` bytes starting at `addr`.
    fn readmem(&mut self, addr: Address, mem: &mut [u8]) -> Result<(), DebugError>;

    /// Writes the buffer starting at `addr`.
    fn writemem(&mut self, addr: Address, mem: &[u8]) -> Result<(), DebugError>;

    fn getregs(&mut self) -> Result<RegFile, DebugError>;

    fn setregs(&mut self, regs: &RegFile) -> Result<(), DebugError>;

    fn erase(&mut self, kind: EraseKind, addr: Address) -> Result<(), DebugError>;

    /// Run-control. `ctl(Run)` must reconcile the breakpoint table
    /// with the hardware and clear every dirty flag before resuming.
    fn ctl(&mut self, op: CtlOp) -> Result<(), DebugError>;

    /// Samples the target state. May block for up to ~50 ms to give
    /// run loops their tick.
    fn poll(&mut self) -> DeviceStatus;

    /// Mutates a breakpoint slot; see [`BreakpointTable::set`].
    fn setbrk(
        &mut self,
        which: Option<usize>,
        enabled: bool,
        addr: Address,
        bptype: BpType,
    ) -> Result<(), DebugError> {
        self.bp_table_mut().set(which, enabled, addr, bptype)
    }

    fn max_breakpoints(&self) -> usize {
        self.bp_table().max_breakpoints()
    }
}
