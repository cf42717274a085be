//! Memory, port and debugger bus interface.

use std::collections::HashMap;

/// Per-byte debug flag: execution breakpoint armed on this address.
pub const DBG_EXEC_BREAKPOINT: u8 = 1 << 0;

/// Per-byte debug flag: step-over breakpoint armed on this address.
pub const DBG_STEP_OVER_BREAKPOINT: u8 = 1 << 1;

/// Host event: reset requested.
pub const EVENT_RESET: u32 = 1 << 0;

/// Host event: single-step; the core returns after the current instruction.
pub const EVENT_DEBUG_STEP: u32 = 1 << 1;

/// Host event: step-over in progress.
pub const EVENT_DEBUG_STEP_OVER: u32 = 1 << 2;

/// Host event: host is waiting on the core.
pub const EVENT_WAITING: u32 = 1 << 3;

/// Why the debugger is being entered from a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugReason {
    /// An execution breakpoint byte was about to be fetched.
    ExecBreakpoint,
    /// A step-over breakpoint byte was about to be fetched.
    Step,
}

/// Everything a CPU core consumes from its collaborators.
///
/// Memory addresses are already translated by the core (24-bit linear, or
/// paged through MBASE in Z80 mode). Bus operations never fail from the
/// core's perspective; device errors are absorbed on the other side.
///
/// The debugger, interrupt and host-control methods have defaults that
/// describe a bare machine: no breakpoints, no pending interrupts, never
/// exiting. A machine wires up only what it has.
pub trait Bus {
    /// Read a byte from translated memory address `address`.
    fn mem_read(&mut self, address: u32) -> u8;

    /// Write a byte to translated memory address `address`.
    fn mem_write(&mut self, address: u32, value: u8);

    /// Read a byte from I/O port `port`.
    fn port_read(&mut self, port: u16) -> u8;

    /// Write a byte to I/O port `port`.
    fn port_write(&mut self, port: u16, value: u8);

    /// Debug flag bits armed on `address` (`DBG_*` constants).
    fn debug_flags(&self, _address: u32) -> u8 {
        0
    }

    /// True while the debugger itself is running code; suppresses re-entry.
    fn in_debugger(&self) -> bool {
        false
    }

    /// Enter the debugger before the byte at `pc` is consumed.
    fn debugger(&mut self, _reason: DebugReason, _pc: u32) {}

    /// Interrupt controller request lines.
    fn interrupt_status(&self) -> u32 {
        0
    }

    /// Interrupt controller enable mask.
    fn interrupt_enabled(&self) -> u32 {
        0
    }

    /// Cooperative shutdown; sampled at instruction boundaries only.
    fn exiting(&self) -> bool {
        false
    }

    /// Host event bits (`EVENT_*` constants).
    fn events(&self) -> u32 {
        0
    }

    /// Erase the Flash page containing `address` (emulator extension).
    fn flash_erase(&mut self, _address: u32) {}
}

/// Flat 16 MiB RAM plus a 64 Ki port file, for tests and tools.
///
/// Every collaborator surface is a plain settable field, so a test can arm
/// breakpoints, raise interrupt lines or request single-step without a real
/// machine behind it.
pub struct SimpleBus {
    ram: Vec<u8>,
    ports: Vec<u8>,
    /// Sparse debug flag table.
    pub debug: HashMap<u32, u8>,
    /// Debugger entries observed, most recent last.
    pub debug_hits: Vec<(DebugReason, u32)>,
    pub in_debugger: bool,
    pub interrupt_status: u32,
    pub interrupt_enabled: u32,
    pub exiting: bool,
    pub events: u32,
    /// Flash-erase requests observed (page base addresses).
    pub erased_pages: Vec<u32>,
}

impl SimpleBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ram: vec![0; 1 << 24],
            ports: vec![0; 1 << 16],
            debug: HashMap::new(),
            debug_hits: Vec::new(),
            in_debugger: false,
            interrupt_status: 0,
            interrupt_enabled: 0,
            exiting: false,
            events: 0,
            erased_pages: Vec::new(),
        }
    }

    /// Copy `bytes` into RAM starting at `address`.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        let start = address as usize;
        self.ram[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Read RAM without going through the bus.
    #[must_use]
    pub fn peek(&self, address: u32) -> u8 {
        self.ram[(address & 0xFF_FFFF) as usize]
    }

    /// Preload the value returned by reads of `port`.
    pub fn set_port(&mut self, port: u16, value: u8) {
        self.ports[port as usize] = value;
    }

    /// Last value written to `port`.
    #[must_use]
    pub fn port(&self, port: u16) -> u8 {
        self.ports[port as usize]
    }
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimpleBus {
    fn mem_read(&mut self, address: u32) -> u8 {
        self.ram[(address & 0xFF_FFFF) as usize]
    }

    fn mem_write(&mut self, address: u32, value: u8) {
        self.ram[(address & 0xFF_FFFF) as usize] = value;
    }

    fn port_read(&mut self, port: u16) -> u8 {
        self.ports[port as usize]
    }

    fn port_write(&mut self, port: u16, value: u8) {
        self.ports[port as usize] = value;
    }

    fn debug_flags(&self, address: u32) -> u8 {
        self.debug.get(&address).copied().unwrap_or(0)
    }

    fn in_debugger(&self) -> bool {
        self.in_debugger
    }

    fn debugger(&mut self, reason: DebugReason, pc: u32) {
        self.debug_hits.push((reason, pc));
    }

    fn interrupt_status(&self) -> u32 {
        self.interrupt_status
    }

    fn interrupt_enabled(&self) -> u32 {
        self.interrupt_enabled
    }

    fn exiting(&self) -> bool {
        self.exiting
    }

    fn events(&self) -> u32 {
        self.events
    }

    fn flash_erase(&mut self, address: u32) {
        let base = (address & 0xFF_FFFF) as usize;
        self.ram[base..base + 0x4000].fill(0xFF);
        self.erased_pages.push(address);
    }
}
