//! eZ80 CPU core with budget-driven execution.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.
#![allow(clippy::cast_possible_wrap)] // Intentional i8 casts for displacements.
#![allow(clippy::cast_sign_loss)] // Cycle counts are non-negative when retired.
#![allow(clippy::struct_excessive_bools)] // The mode latches are architectural.

use emu_core::{
    Bus, Cpu, DebugReason, Observable, Ticks, Value, DBG_EXEC_BREAKPOINT,
    DBG_STEP_OVER_BREAKPOINT, EVENT_DEBUG_STEP,
};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::registers::{mask_mode, write_pair, Registers};

/// No index prefix in effect; `(HL)` and H/L resolve to HL itself.
pub const PREFIX_NONE: u8 = 0;
/// DD prefix in effect; the index register is IX.
pub const PREFIX_IX: u8 = 2;
/// FD prefix in effect; the index register is IY.
pub const PREFIX_IY: u8 = 3;

/// What the decode step tells the driver to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Instruction complete; clear prefix state and account cycles.
    Done,
    /// A prefix or suffix latch was set; fetch again without clearing.
    Chain,
    /// EI executed; account its cycles now but defer the interrupt check
    /// past exactly one more instruction.
    DeferIrq,
}

/// eZ80 CPU.
///
/// The CPU does not own the bus; every operation that can touch memory,
/// ports or the debugger takes the bus as an argument. The host sets a
/// negative [`cycle budget`](Ez80::set_cycle_count_delta) and calls
/// [`execute`](Ez80::execute); control returns when the budget is drained
/// or the bus reports an exit or single-step condition.
pub struct Ez80 {
    pub(crate) regs: Registers,

    // === Mode latches ===
    /// Address/Data Long mode: 24-bit linear when set, MBASE-paged otherwise.
    pub(crate) adl: bool,
    /// Mixed-ADL enable; shapes interrupt call frames.
    pub(crate) madl: bool,
    /// Effective data width for the current instruction.
    pub(crate) l: bool,
    /// Effective instruction-fetch width for the current instruction.
    pub(crate) il: bool,
    /// Index prefix in effect (`PREFIX_*` values).
    pub(crate) prefix: u8,
    /// A width suffix applies to the current instruction.
    pub(crate) suffix: bool,

    // === Interrupt state ===
    pub(crate) ief1: bool,
    pub(crate) ief2: bool,
    /// One-instruction EI delay; doubles as the opcode-trap sentinel.
    pub(crate) ief_wait: bool,
    /// Interrupt mode in the internal encoding (0, 2, 3; 3 is vectored).
    pub(crate) im: u8,
    pub(crate) halted: bool,

    /// The byte at PC, always held one fetch ahead.
    pub(crate) prefetch: u8,

    // === Timing ===
    /// Cycles retired by the instruction in flight.
    pub(crate) cycles: i32,
    /// External budget; the driver runs while this is negative.
    cycle_count_delta: i32,
    /// Total cycles retired since construction.
    total: Ticks,
}

impl Ez80 {
    /// Create a CPU with all state zeroed.
    ///
    /// The prefetch invariant is not established until [`Ez80::reset`] or
    /// [`Ez80::flush`] runs against a bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            adl: false,
            madl: false,
            l: false,
            il: false,
            prefix: PREFIX_NONE,
            suffix: false,
            ief1: false,
            ief2: false,
            ief_wait: false,
            im: 0,
            halted: false,
            prefetch: 0,
            cycles: 0,
            cycle_count_delta: 0,
            total: Ticks::ZERO,
        }
    }

    /// Zero the register file and latches, then refill the prefetch at
    /// address 0 in Z80 mode.
    pub fn reset<B: Bus>(&mut self, bus: &mut B) {
        debug!("cpu reset");
        self.regs = Registers::default();
        self.ief1 = false;
        self.ief2 = false;
        self.adl = false;
        self.madl = false;
        self.im = 0;
        self.ief_wait = false;
        self.halted = false;
        self.flush(bus, 0, false);
    }

    /// Redirect execution: set PC/ADL, drop prefix and suffix state so the
    /// instruction widths follow ADL, and refill the prefetch.
    pub fn flush<B: Bus>(&mut self, bus: &mut B, address: u32, mode: bool) {
        trace!("flush to {address:#08X} adl={mode}");
        self.prefetch(bus, address, mode);
        self.reset_width_latches();
    }

    /// External cycle budget. Negative means work remains.
    #[must_use]
    pub const fn cycle_count_delta(&self) -> i32 {
        self.cycle_count_delta
    }

    pub fn set_cycle_count_delta(&mut self, delta: i32) {
        self.cycle_count_delta = delta;
    }

    /// Total cycles retired since construction.
    #[must_use]
    pub const fn total_cycles(&self) -> Ticks {
        self.total
    }

    #[must_use]
    pub const fn registers(&self) -> Registers {
        self.regs
    }

    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.regs.pc
    }

    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    #[must_use]
    pub const fn adl(&self) -> bool {
        self.adl
    }

    #[must_use]
    pub const fn madl(&self) -> bool {
        self.madl
    }

    #[must_use]
    pub const fn ief1(&self) -> bool {
        self.ief1
    }

    #[must_use]
    pub const fn ief2(&self) -> bool {
        self.ief2
    }

    #[must_use]
    pub const fn im(&self) -> u8 {
        self.im
    }

    /// The byte currently held ahead of PC.
    #[must_use]
    pub const fn prefetch_byte(&self) -> u8 {
        self.prefetch
    }

    /// Dump the architectural state: register file, latches, prefetch.
    #[must_use]
    pub fn save_state(&self) -> Ez80State {
        Ez80State {
            registers: self.regs,
            adl: self.adl,
            madl: self.madl,
            l: self.l,
            il: self.il,
            prefix: self.prefix,
            suffix: self.suffix,
            ief1: self.ief1,
            ief2: self.ief2,
            ief_wait: self.ief_wait,
            im: self.im,
            halted: self.halted,
            prefetch: self.prefetch,
        }
    }

    /// Restore a dumped state. The caller is responsible for the prefetch
    /// byte matching memory at the restored PC.
    pub fn load_state(&mut self, state: &Ez80State) {
        self.regs = state.registers;
        self.adl = state.adl;
        self.madl = state.madl;
        self.l = state.l;
        self.il = state.il;
        self.prefix = state.prefix;
        self.suffix = state.suffix;
        self.ief1 = state.ief1;
        self.ief2 = state.ief2;
        self.ief_wait = state.ief_wait;
        self.im = state.im;
        self.halted = state.halted;
        self.prefetch = state.prefetch;
    }

    // === Address translation and the prefetch/fetch unit ===

    /// Translate `address` for the given width: 24-bit linear, or the MBASE
    /// page around its low 16 bits.
    pub(crate) fn address_mode(&self, address: u32, mode: bool) -> u32 {
        if mode {
            address & 0xFF_FFFF
        } else {
            (u32::from(self.regs.mbase) << 16) | (address & 0xFFFF)
        }
    }

    /// Set ADL and PC, then reload the prefetch byte from the new PC.
    pub(crate) fn prefetch<B: Bus>(&mut self, bus: &mut B, address: u32, mode: bool) {
        self.adl = mode;
        self.regs.pc = self.address_mode(address, mode);
        self.prefetch = bus.mem_read(self.regs.pc);
    }

    /// Consume the prefetched byte: trap into the debugger if the byte at PC
    /// is armed, advance PC under the current ADL, refill the prefetch.
    pub(crate) fn fetch_byte<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let armed = bus.debug_flags(self.regs.pc);
        if !bus.in_debugger() && armed & (DBG_EXEC_BREAKPOINT | DBG_STEP_OVER_BREAKPOINT) != 0 {
            let reason = if armed & DBG_EXEC_BREAKPOINT != 0 {
                DebugReason::ExecBreakpoint
            } else {
                DebugReason::Step
            };
            bus.debugger(reason, self.regs.pc);
        }
        let value = self.prefetch;
        self.prefetch(bus, self.regs.pc.wrapping_add(1), self.adl);
        value
    }

    /// Signed 8-bit displacement.
    pub(crate) fn fetch_offset<B: Bus>(&mut self, bus: &mut B) -> i8 {
        self.fetch_byte(bus) as i8
    }

    /// Immediate word: two bytes, plus a third when IL is long.
    pub(crate) fn fetch_word<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let mut value = u32::from(self.fetch_byte(bus));
        value |= u32::from(self.fetch_byte(bus)) << 8;
        if self.il {
            value |= u32::from(self.fetch_byte(bus)) << 16;
        }
        value
    }

    /// Immediate word for JP/CALL targets: the final byte is read through
    /// the held prefetch and PC steps past it without refilling. The caller
    /// re-establishes the prefetch at the jump target.
    pub(crate) fn fetch_word_no_prefetch<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let mut value = u32::from(self.fetch_byte(bus));
        value |= u32::from(self.prefetch) << 8;
        if self.il {
            self.fetch_byte(bus);
            value |= u32::from(self.prefetch) << 16;
        }
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    // === Data access at the current L width ===

    pub(crate) fn read_byte<B: Bus>(&mut self, bus: &mut B, address: u32) -> u8 {
        bus.mem_read(self.address_mode(address, self.l))
    }

    pub(crate) fn write_byte<B: Bus>(&mut self, bus: &mut B, address: u32, value: u8) {
        bus.mem_write(self.address_mode(address, self.l), value);
    }

    pub(crate) fn read_word<B: Bus>(&mut self, bus: &mut B, address: u32) -> u32 {
        let mut value = u32::from(self.read_byte(bus, address));
        value |= u32::from(self.read_byte(bus, address.wrapping_add(1))) << 8;
        if self.l {
            value |= u32::from(self.read_byte(bus, address.wrapping_add(2))) << 16;
        }
        value
    }

    pub(crate) fn write_word<B: Bus>(&mut self, bus: &mut B, address: u32, value: u32) {
        self.write_byte(bus, address, value as u8);
        self.write_byte(bus, address.wrapping_add(1), (value >> 8) as u8);
        if self.l {
            self.write_byte(bus, address.wrapping_add(2), (value >> 16) as u8);
        }
    }

    // === Stack access through SP[L] ===

    pub(crate) fn read_sp(&self) -> u32 {
        if self.l {
            self.regs.spl
        } else {
            u32::from(self.regs.sps)
        }
    }

    pub(crate) fn write_sp(&mut self, value: u32) {
        if self.l {
            self.regs.spl = value & 0xFF_FFFF;
        } else {
            self.regs.sps = value as u16;
        }
    }

    fn step_sp(&mut self, down: bool) {
        if self.l {
            self.regs.spl = if down {
                self.regs.spl.wrapping_sub(1)
            } else {
                self.regs.spl.wrapping_add(1)
            } & 0xFF_FFFF;
        } else {
            self.regs.sps = if down {
                self.regs.sps.wrapping_sub(1)
            } else {
                self.regs.sps.wrapping_add(1)
            };
        }
    }

    pub(crate) fn pop_byte<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let address = self.read_sp();
        self.step_sp(false);
        self.read_byte(bus, address)
    }

    pub(crate) fn push_byte<B: Bus>(&mut self, bus: &mut B, value: u8) {
        self.step_sp(true);
        let address = self.read_sp();
        self.write_byte(bus, address, value);
    }

    pub(crate) fn push_word<B: Bus>(&mut self, bus: &mut B, value: u32) {
        if self.l {
            self.push_byte(bus, (value >> 16) as u8);
        }
        self.push_byte(bus, (value >> 8) as u8);
        self.push_byte(bus, value as u8);
    }

    pub(crate) fn pop_word<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let mut value = u32::from(self.pop_byte(bus));
        value |= u32::from(self.pop_byte(bus)) << 8;
        if self.l {
            value |= u32::from(self.pop_byte(bus)) << 16;
        }
        value
    }

    // === Index register selection ===

    /// The register `(HL)`-class operands resolve to: HL, or IX/IY under a
    /// DD/FD prefix.
    pub(crate) fn read_index(&self) -> u32 {
        match self.prefix {
            PREFIX_IX => self.regs.ix,
            PREFIX_IY => self.regs.iy,
            _ => self.regs.hl,
        }
    }

    fn index_slot(&mut self) -> &mut u32 {
        match self.prefix {
            PREFIX_IX => &mut self.regs.ix,
            PREFIX_IY => &mut self.regs.iy,
            _ => &mut self.regs.hl,
        }
    }

    pub(crate) fn write_index(&mut self, value: u32) {
        let long = self.l;
        write_pair(self.index_slot(), value, long);
    }

    /// The opposite index register; only meaningful under a prefix.
    pub(crate) fn read_other_index(&self) -> u32 {
        match self.prefix {
            PREFIX_IX => self.regs.iy,
            PREFIX_IY => self.regs.ix,
            _ => unreachable!("cross-index access without a prefix"),
        }
    }

    pub(crate) fn write_other_index(&mut self, value: u32) {
        let long = self.l;
        let slot = match self.prefix {
            PREFIX_IX => &mut self.regs.iy,
            PREFIX_IY => &mut self.regs.ix,
            _ => unreachable!("cross-index access without a prefix"),
        };
        write_pair(slot, value, long);
    }

    pub(crate) fn read_index_high(&self) -> u8 {
        (self.read_index() >> 8) as u8
    }

    pub(crate) fn write_index_high(&mut self, value: u8) {
        let slot = self.index_slot();
        *slot = (*slot & 0xFF_00FF) | (u32::from(value) << 8);
    }

    pub(crate) fn read_index_low(&self) -> u8 {
        self.read_index() as u8
    }

    pub(crate) fn write_index_low(&mut self, value: u8) {
        let slot = self.index_slot();
        *slot = (*slot & 0xFF_FF00) | u32::from(value);
    }

    /// Effective address of `(HL)` / `(IX+d)` / `(IY+d)`: fetches the
    /// displacement byte only when a prefix is in effect.
    pub(crate) fn index_address<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let mut value = self.read_index();
        if self.prefix != PREFIX_NONE {
            value = value.wrapping_add_signed(i32::from(self.fetch_offset(bus)));
        }
        mask_mode(value, self.l)
    }

    // === Register encodings ===

    /// Read `r[i]`. Index 6 is the memory operand at the effective index
    /// address (fetching a displacement under a prefix); 4 and 5 are the
    /// high and low halves of the index register.
    pub(crate) fn read_reg<B: Bus>(&mut self, bus: &mut B, i: u8) -> u8 {
        match i {
            0 => self.regs.b(),
            1 => self.regs.c(),
            2 => self.regs.d(),
            3 => self.regs.e(),
            4 => self.read_index_high(),
            5 => self.read_index_low(),
            6 => {
                let address = self.index_address(bus);
                self.read_byte(bus, address)
            }
            7 => self.regs.a,
            _ => unreachable!("register encoding out of range"),
        }
    }

    pub(crate) fn write_reg<B: Bus>(&mut self, bus: &mut B, i: u8, value: u8) {
        match i {
            0 => self.regs.set_b(value),
            1 => self.regs.set_c(value),
            2 => self.regs.set_d(value),
            3 => self.regs.set_e(value),
            4 => self.write_index_high(value),
            5 => self.write_index_low(value),
            6 => {
                let address = self.index_address(bus);
                self.write_byte(bus, address, value);
            }
            7 => self.regs.a = value,
            _ => unreachable!("register encoding out of range"),
        }
    }

    /// `LD r[write], r[read]`. Whichever side is the memory operand drops
    /// the prefix for the other side, so `LD H,(IX+d)` writes the real H
    /// while the address still comes from IX.
    pub(crate) fn read_write_reg<B: Bus>(&mut self, bus: &mut B, read: u8, write: u8) {
        let old_prefix = self.prefix;
        self.prefix = if write == 6 { PREFIX_NONE } else { old_prefix };
        let value = self.read_reg(bus, read);
        self.prefix = if read == 6 { PREFIX_NONE } else { old_prefix };
        self.write_reg(bus, write, value);
    }

    /// `read_reg` against an already-computed effective address.
    pub(crate) fn read_reg_prefetched<B: Bus>(&mut self, bus: &mut B, i: u8, address: u32) -> u8 {
        match i {
            0 => self.regs.b(),
            1 => self.regs.c(),
            2 => self.regs.d(),
            3 => self.regs.e(),
            4 => self.read_index_high(),
            5 => self.read_index_low(),
            6 => self.read_byte(bus, address),
            7 => self.regs.a,
            _ => unreachable!("register encoding out of range"),
        }
    }

    pub(crate) fn write_reg_prefetched<B: Bus>(
        &mut self,
        bus: &mut B,
        i: u8,
        address: u32,
        value: u8,
    ) {
        match i {
            0 => self.regs.set_b(value),
            1 => self.regs.set_c(value),
            2 => self.regs.set_d(value),
            3 => self.regs.set_e(value),
            4 => self.write_index_high(value),
            5 => self.write_index_low(value),
            6 => self.write_byte(bus, address, value),
            7 => self.regs.a = value,
            _ => unreachable!("register encoding out of range"),
        }
    }

    /// `rp[i]`: BC, DE, HL-or-index, SP. Reads mask to the current width.
    pub(crate) fn read_rp(&self, i: u8) -> u32 {
        let value = match i {
            0 => self.regs.bc,
            1 => self.regs.de,
            2 => self.read_index(),
            3 => self.read_sp(),
            _ => unreachable!("register pair encoding out of range"),
        };
        mask_mode(value, self.l)
    }

    pub(crate) fn write_rp(&mut self, i: u8, value: u32) {
        let value = mask_mode(value, self.l);
        let long = self.l;
        match i {
            0 => write_pair(&mut self.regs.bc, value, long),
            1 => write_pair(&mut self.regs.de, value, long),
            2 => self.write_index(value),
            3 => self.write_sp(value),
            _ => unreachable!("register pair encoding out of range"),
        }
    }

    /// `rp2[i]`: as `rp` but slot 3 is AF.
    pub(crate) fn read_rp2(&self, i: u8) -> u32 {
        if i == 3 {
            u32::from(self.regs.af())
        } else {
            self.read_rp(i)
        }
    }

    pub(crate) fn write_rp2(&mut self, i: u8, value: u32) {
        if i == 3 {
            self.regs.set_af(value as u16);
        } else {
            self.write_rp(i, value);
        }
    }

    /// `rp3[i]`: BC, DE, HL, index.
    pub(crate) fn read_rp3(&self, i: u8) -> u32 {
        let value = match i {
            0 => self.regs.bc,
            1 => self.regs.de,
            2 => self.regs.hl,
            3 => self.read_index(),
            _ => unreachable!("register pair encoding out of range"),
        };
        mask_mode(value, self.l)
    }

    pub(crate) fn write_rp3(&mut self, i: u8, value: u32) {
        let value = mask_mode(value, self.l);
        let long = self.l;
        match i {
            0 => write_pair(&mut self.regs.bc, value, long),
            1 => write_pair(&mut self.regs.de, value, long),
            2 => write_pair(&mut self.regs.hl, value, long),
            3 => self.write_index(value),
            _ => unreachable!("register pair encoding out of range"),
        }
    }

    /// Condition code `cc[i]`.
    pub(crate) fn read_cc(&self, i: u8) -> bool {
        match i {
            0 => !self.regs.flag_z(),
            1 => self.regs.flag_z(),
            2 => !self.regs.flag_c(),
            3 => self.regs.flag_c(),
            4 => !self.regs.flag_pv(),
            5 => self.regs.flag_pv(),
            6 => !self.regs.flag_s(),
            7 => self.regs.flag_s(),
            _ => unreachable!("condition code out of range"),
        }
    }

    // === Width-masked register arithmetic used by block instructions ===

    /// `HL += delta` at the current width, upper byte preserved when short.
    pub(crate) fn step_hl(&mut self, delta: i32) {
        let value = mask_mode(self.regs.hl.wrapping_add_signed(delta), self.l);
        let long = self.l;
        write_pair(&mut self.regs.hl, value, long);
    }

    /// `DE += delta` at the current width.
    pub(crate) fn step_de(&mut self, delta: i32) {
        let value = mask_mode(self.regs.de.wrapping_add_signed(delta), self.l);
        let long = self.l;
        write_pair(&mut self.regs.de, value, long);
    }

    /// `BC -= 1` at the current width; only the low word is written back in
    /// Z80 mode. Returns the masked value that repeat conditions test.
    pub(crate) fn dec_bc(&mut self) -> u32 {
        let value = mask_mode(self.regs.bc.wrapping_sub(1), self.l);
        let long = self.l;
        write_pair(&mut self.regs.bc, value, long);
        value
    }

    // === Calls, returns and interrupts ===

    /// Transfer control to `address`, pushing the return PC.
    ///
    /// A mixed call (suffix on CALL/RST, MADL on interrupts) writes the
    /// eZ80 frame: PCU onto SPL in ADL mode, PCH/PCL onto whichever stack
    /// the widths select, then the `(MADL << 1) | ADL` tag byte onto SPL.
    pub(crate) fn call<B: Bus>(&mut self, bus: &mut B, address: u32, mixed: bool) {
        if mixed {
            if self.adl {
                self.regs.spl = self.regs.spl.wrapping_sub(1) & 0xFF_FFFF;
                let spl = self.regs.spl;
                let pcu = self.regs.pcu();
                self.write_byte(bus, spl, pcu);
            }
            let (pch, pcl) = (self.regs.pch(), self.regs.pcl());
            if self.il || (self.l && !self.adl) {
                self.regs.spl = self.regs.spl.wrapping_sub(1) & 0xFF_FFFF;
                let spl = self.regs.spl;
                self.write_byte(bus, spl, pch);
                self.regs.spl = self.regs.spl.wrapping_sub(1) & 0xFF_FFFF;
                let spl = self.regs.spl;
                self.write_byte(bus, spl, pcl);
            } else {
                self.regs.sps = self.regs.sps.wrapping_sub(1);
                let sps = u32::from(self.regs.sps);
                self.write_byte(bus, sps, pch);
                self.regs.sps = self.regs.sps.wrapping_sub(1);
                let sps = u32::from(self.regs.sps);
                self.write_byte(bus, sps, pcl);
            }
            self.regs.spl = self.regs.spl.wrapping_sub(1) & 0xFF_FFFF;
            let spl = self.regs.spl;
            let tag = (u8::from(self.madl) << 1) | u8::from(self.adl);
            self.write_byte(bus, spl, tag);
        } else {
            let pc = self.regs.pc;
            self.push_word(bus, pc);
        }
        self.prefetch(bus, address, self.il);
    }

    /// Return from a call. With a suffix in effect, pop the mode tag from
    /// SPL first, then the address from the stack the current ADL selects,
    /// then the upper byte from SPL when the popped mode is long.
    pub(crate) fn ret<B: Bus>(&mut self, bus: &mut B) {
        self.cycles += 1;
        let mut mode = self.adl;
        let address;
        if self.suffix {
            let spl = self.regs.spl;
            mode = self.read_byte(bus, spl) & 1 != 0;
            self.regs.spl = self.regs.spl.wrapping_add(1) & 0xFF_FFFF;
            let mut value;
            if self.adl {
                let spl = self.regs.spl;
                value = u32::from(self.read_byte(bus, spl));
                self.regs.spl = self.regs.spl.wrapping_add(1) & 0xFF_FFFF;
                let spl = self.regs.spl;
                value |= u32::from(self.read_byte(bus, spl)) << 8;
                self.regs.spl = self.regs.spl.wrapping_add(1) & 0xFF_FFFF;
            } else {
                let sps = u32::from(self.regs.sps);
                value = u32::from(self.read_byte(bus, sps));
                self.regs.sps = self.regs.sps.wrapping_add(1);
                let sps = u32::from(self.regs.sps);
                value |= u32::from(self.read_byte(bus, sps)) << 8;
                self.regs.sps = self.regs.sps.wrapping_add(1);
            }
            if mode {
                let spl = self.regs.spl;
                let upper = u32::from(self.read_byte(bus, spl)) << 16;
                self.regs.spl = self.regs.spl.wrapping_add(1) & 0xFF_FFFF;
                value |= mask_mode(upper, self.adl || self.l);
            }
            address = value;
        } else {
            address = self.pop_word(bus);
        }
        self.prefetch(bus, address, mode);
    }

    /// Acknowledge a pending maskable interrupt between instructions.
    fn service_interrupt<B: Bus>(&mut self, bus: &mut B) {
        trace!("interrupt acknowledge at pc={:#08X} im={}", self.regs.pc, self.im);
        self.ief1 = false;
        self.ief2 = false;
        self.halted = false;
        self.cycle_count_delta += 1;
        if self.im != 3 {
            self.call(bus, 0x38, self.madl);
        } else {
            self.cycle_count_delta += 1;
            let vector = (u32::from(self.regs.i) << 8) | u32::from(!self.regs.r);
            let target = self.read_word(bus, vector);
            self.call(bus, target, self.madl);
            self.cycle_count_delta += self.cycles;
        }
    }

    /// Clear prefix state and re-derive the width latches from ADL for the
    /// next instruction.
    pub(crate) fn reset_width_latches(&mut self) {
        self.prefix = PREFIX_NONE;
        self.suffix = false;
        self.l = self.adl;
        self.il = self.adl;
    }

    /// The scheduler driver: service EI latency and pending interrupts,
    /// then pull instructions until the budget is drained or an exit or
    /// single-step condition fires.
    pub fn execute<B: Bus>(&mut self, bus: &mut B) {
        while !bus.exiting() && self.cycle_count_delta < 0 {
            let mut cycle_offset = 0;
            if self.ief_wait {
                self.ief_wait = false;
                self.ief1 = true;
                self.ief2 = true;
            }
            if self.ief1 && bus.interrupt_status() & bus.interrupt_enabled() != 0 {
                self.service_interrupt(bus);
            } else if self.halted {
                // HALT consumes whatever budget remains.
                self.cycle_count_delta = 0;
            }

            while !bus.exiting() && (self.prefix != PREFIX_NONE || self.suffix || self.cycle_count_delta < 0) {
                self.cycles = 0;
                let opcode = self.fetch_byte(bus);
                self.regs.r = (self.regs.r.wrapping_add(1) & 0x7F) | (self.regs.r & 0x80);

                match self.execute_main(bus, opcode) {
                    Flow::Done => {
                        self.reset_width_latches();
                        if bus.events() & EVENT_DEBUG_STEP != 0 {
                            self.cycle_count_delta = 0;
                            break;
                        }
                    }
                    Flow::Chain => {}
                    Flow::DeferIrq => {
                        // EI: account now, then force exactly one more
                        // instruction before the interrupt check runs.
                        self.cycle_count_delta += self.cycles;
                        cycle_offset = self.cycle_count_delta + 1;
                        self.cycle_count_delta = -1;
                        continue;
                    }
                }

                self.cycle_count_delta += self.cycles;
                self.total += Ticks::new(self.cycles as u64);
                if self.cycles == 0 {
                    // Forward progress on trapped or free encodings.
                    self.cycle_count_delta += 1;
                }
            }
            self.cycle_count_delta += cycle_offset;
        }
    }
}

impl Default for Ez80 {
    fn default() -> Self {
        Self::new()
    }
}

mod execute;

impl Cpu for Ez80 {
    type Registers = Registers;

    fn pc(&self) -> u32 {
        self.regs.pc
    }

    fn registers(&self) -> Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn reset<B: Bus>(&mut self, bus: &mut B) {
        Ez80::reset(self, bus);
    }

    fn execute<B: Bus>(&mut self, bus: &mut B) {
        Ez80::execute(self, bus);
    }
}

/// The architectural dump used for save states: register file, mode
/// latches, interrupt state and the prefetch byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ez80State {
    pub registers: Registers,
    pub adl: bool,
    pub madl: bool,
    pub l: bool,
    pub il: bool,
    pub prefix: u8,
    pub suffix: bool,
    pub ief1: bool,
    pub ief2: bool,
    pub ief_wait: bool,
    pub im: u8,
    pub halted: bool,
    pub prefetch: u8,
}

/// All query paths supported by the eZ80.
const EZ80_QUERY_PATHS: &[&str] = &[
    // Main registers
    "a", "f", "b", "c", "d", "e", "h", "l",
    // Register pairs
    "af", "bc", "de", "hl",
    // Shadow bank
    "af'", "bc'", "de'", "hl'",
    // Index registers
    "ix", "iy", "ixh", "ixl", "iyh", "iyl",
    // Other registers
    "sps", "spl", "pc", "i", "r", "mbase",
    // Flags (individual)
    "flags.s", "flags.z", "flags.h", "flags.pv", "flags.n", "flags.c",
    // Mode latches
    "adl", "madl", "mode.l", "mode.il", "prefix", "suffix",
    // Interrupt state
    "ief1", "ief2", "ief_wait", "im",
    // CPU state
    "halted", "prefetch", "cycles",
];

impl Observable for Ez80 {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            // Main registers
            "a" => Some(self.regs.a.into()),
            "f" => Some(self.regs.f.into()),
            "b" => Some(self.regs.b().into()),
            "c" => Some(self.regs.c().into()),
            "d" => Some(self.regs.d().into()),
            "e" => Some(self.regs.e().into()),
            "h" => Some(self.regs.h().into()),
            "l" => Some(self.regs.l().into()),

            // Register pairs
            "af" => Some(self.regs.af().into()),
            "bc" => Some(self.regs.bc.into()),
            "de" => Some(self.regs.de.into()),
            "hl" => Some(self.regs.hl.into()),

            // Shadow bank
            "af'" => Some(((u16::from(self.regs.a_alt) << 8) | u16::from(self.regs.f_alt)).into()),
            "bc'" => Some(self.regs.bc_alt.into()),
            "de'" => Some(self.regs.de_alt.into()),
            "hl'" => Some(self.regs.hl_alt.into()),

            // Index registers
            "ix" => Some(self.regs.ix.into()),
            "iy" => Some(self.regs.iy.into()),
            "ixh" => Some(((self.regs.ix >> 8) as u8).into()),
            "ixl" => Some((self.regs.ix as u8).into()),
            "iyh" => Some(((self.regs.iy >> 8) as u8).into()),
            "iyl" => Some((self.regs.iy as u8).into()),

            // Other registers
            "sps" => Some(self.regs.sps.into()),
            "spl" => Some(self.regs.spl.into()),
            "pc" => Some(self.regs.pc.into()),
            "i" => Some(self.regs.i.into()),
            "r" => Some(self.regs.r.into()),
            "mbase" => Some(self.regs.mbase.into()),

            // Individual flags
            "flags.s" => Some(self.regs.flag_s().into()),
            "flags.z" => Some(self.regs.flag_z().into()),
            "flags.h" => Some(self.regs.flag_h().into()),
            "flags.pv" => Some(self.regs.flag_pv().into()),
            "flags.n" => Some(self.regs.flag_n().into()),
            "flags.c" => Some(self.regs.flag_c().into()),

            // Mode latches
            "adl" => Some(self.adl.into()),
            "madl" => Some(self.madl.into()),
            "mode.l" => Some(self.l.into()),
            "mode.il" => Some(self.il.into()),
            "prefix" => Some(self.prefix.into()),
            "suffix" => Some(self.suffix.into()),

            // Interrupt state
            "ief1" => Some(self.ief1.into()),
            "ief2" => Some(self.ief2.into()),
            "ief_wait" => Some(self.ief_wait.into()),
            "im" => Some(self.im.into()),

            // CPU state
            "halted" => Some(self.halted.into()),
            "prefetch" => Some(self.prefetch.into()),
            "cycles" => Some(self.total.get().into()),

            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        EZ80_QUERY_PATHS
    }
}
