use std::collections::HashMap;

use crate::libs::gdb_proto::GDB_MAX_XFER;

/// Flash-permission bit: writes and erases may touch locked flash
/// (info segment A on MSP430 parts).
pub const FPERM_LOCKED_FLASH: u8 = 0x01;
/// Flash-permission bit: writes may touch the boot strap loader area.
pub const FPERM_BSL: u8 = 0x02;

#[derive(Debug, Clone, Copy)]
enum OptValue {
    Numeric(u32),
    Boolean(bool),
}

/// Tunables looked up by name, with built-in defaults.
///
/// The debug core treats the table as read-only; binaries populate it
/// from their command lines before handing it down.
#[derive(Debug, Clone)]
pub struct Options {
    values: HashMap<&'static str, OptValue>,
}

impl Options {
    pub fn new() -> Options {
        let mut values = HashMap::new();
        values.insert("gdb_default_port", OptValue::Numeric(2000));
        values.insert("gdb_loop", OptValue::Boolean(false));
        values.insert("gdbc_xfer_size", OptValue::Numeric(64));
        values.insert("enable_locked_flash_access", OptValue::Boolean(false));
        values.insert("enable_bsl_access", OptValue::Boolean(false));
        Options { values }
    }

    /// Returns a numeric option, or zero for an unknown name.
    pub fn get_numeric(&self, name: &str) -> u32 {
        match self.values.get(name) {
            Some(OptValue::Numeric(v)) => *v,
            _ => 0,
        }
    }

    /// Returns a boolean option, or false for an unknown name.
    pub fn get_boolean(&self, name: &str) -> bool {
        match self.values.get(name) {
            Some(OptValue::Boolean(v)) => *v,
            _ => false,
        }
    }

    pub fn set_numeric(&mut self, name: &'static str, value: u32) {
        self.values.insert(name, OptValue::Numeric(value));
    }

    pub fn set_boolean(&mut self, name: &'static str, value: bool) {
        self.values.insert(name, OptValue::Boolean(value));
    }

    /// The memory-transfer chunk size used by the RSP client device,
    /// clamped to the range the protocol buffers can carry.
    pub fn xfer_size(&self) -> usize {
        (self.get_numeric("gdbc_xfer_size") as usize).clamp(2, GDB_MAX_XFER)
    }

    /// Folds the flash-permission flags into one bitmask for device
    /// backends.
    pub fn read_fperm(&self) -> u8 {
        let mut fperm = 0;
        if self.get_boolean("enable_locked_flash_access") {
            fperm |= FPERM_LOCKED_FLASH;
        }
        if self.get_boolean("enable_bsl_access") {
            fperm |= FPERM_BSL;
        }
        fperm
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new()
    }
}
