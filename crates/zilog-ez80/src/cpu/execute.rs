//! Instruction decode and execution for the eZ80.
//!
//! One flat match per opcode page (primary, CB, ED), in decode order.
//! Operand fields are pulled out of the opcode byte inside each arm:
//! `y` is bits 5-3, `z` bits 2-0, `p`/`q` split `y` for pair encodings.
//! Unrecognised encodings set the trap sentinel and retire no cycles;
//! the driver guarantees forward progress for those.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use emu_core::Bus;
use log::trace;

use crate::flags::{
    carry_byte, carry_if, carry_word, halfcarry_add, halfcarry_sub, halfcarry_word_add,
    halfcarry_word_sub, overflow_add, overflow_sub, overflow_word_add, overflow_word_sub, parity,
    pv_if, sign, sign_if, sign_word, subtract, undef, zero, zero_if, zero_word, CF, HF, NF, PF, ZF,
};
use crate::registers::{mask_mode, write_pair};

use super::{Ez80, Flow, PREFIX_IX, PREFIX_IY, PREFIX_NONE};

impl Ez80 {
    /// Unrecognised or disallowed encoding: set the trap sentinel and move
    /// on without touching flags or cycles.
    fn opcode_trap(&mut self, op: u8) {
        trace!("opcode trap {op:#04X} at pc={:#08X}", self.regs.pc);
        self.ief_wait = true;
    }

    // =========================================================================
    // Primary page
    // =========================================================================

    /// Execute one primary-page opcode. Returns what the driver should do
    /// next: complete the instruction, keep a prefix chain alive, or defer
    /// the interrupt check after EI.
    pub(super) fn execute_main<B: Bus>(&mut self, bus: &mut B, op: u8) -> Flow {
        match op {
            // NOP
            0x00 => {
                self.cycles += 1;
            }

            // LD rp[p], Mmn; under DD/FD with p=3 this is the cross-index
            // load LD IY,(IX+d) / LD IX,(IY+d)
            0x01 | 0x11 | 0x21 | 0x31 => {
                let p = (op >> 4) & 3;
                if p == 3 && self.prefix != PREFIX_NONE {
                    self.cycles += 6;
                    let address = self.index_address(bus);
                    let value = self.read_word(bus, address);
                    self.write_other_index(value);
                } else {
                    self.cycles += 4;
                    let value = self.fetch_word(bus);
                    self.write_rp(p, value);
                }
            }

            // LD (BC), A
            0x02 => {
                self.cycles += 2;
                let address = self.regs.bc;
                let a = self.regs.a;
                self.write_byte(bus, address, a);
            }

            // LD (DE), A
            0x12 => {
                self.cycles += 2;
                let address = self.regs.de;
                let a = self.regs.a;
                self.write_byte(bus, address, a);
            }

            // LD (Mmn), HL/IX/IY
            0x22 => {
                self.cycles += 7;
                let address = self.fetch_word(bus);
                let value = self.read_index();
                self.write_word(bus, address, value);
            }

            // LD (Mmn), A
            0x32 => {
                self.cycles += 5;
                let address = self.fetch_word(bus);
                let a = self.regs.a;
                self.write_byte(bus, address, a);
            }

            // LD A, (BC)
            0x0A => {
                self.cycles += 2;
                let address = self.regs.bc;
                self.regs.a = self.read_byte(bus, address);
            }

            // LD A, (DE)
            0x1A => {
                self.cycles += 2;
                let address = self.regs.de;
                self.regs.a = self.read_byte(bus, address);
            }

            // LD HL/IX/IY, (Mmn)
            0x2A => {
                self.cycles += 7;
                let address = self.fetch_word(bus);
                let value = self.read_word(bus, address);
                self.write_index(value);
            }

            // LD A, (Mmn)
            0x3A => {
                self.cycles += 5;
                let address = self.fetch_word(bus);
                self.regs.a = self.read_byte(bus, address);
            }

            // INC rp[p]
            0x03 | 0x13 | 0x23 | 0x33 => {
                self.cycles += 1;
                let p = (op >> 4) & 3;
                let value = self.read_rp(p).wrapping_add(1);
                self.write_rp(p, value);
            }

            // DEC rp[p]
            0x0B | 0x1B | 0x2B | 0x3B => {
                self.cycles += 1;
                let p = (op >> 4) & 3;
                let value = self.read_rp(p).wrapping_sub(1);
                self.write_rp(p, value);
            }

            // INC r[y]
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                self.cycles += 1;
                let y = (op >> 3) & 7;
                let address = if y == 6 { self.index_address(bus) } else { 0 };
                let old = self.read_reg_prefetched(bus, y, address);
                let new = old.wrapping_add(1);
                self.write_reg_prefetched(bus, y, address, new);
                self.regs.f = carry_if(self.regs.flag_c())
                    | sign(new)
                    | zero(new)
                    | halfcarry_add(old, 0, 1)
                    | pv_if(new == 0x80)
                    | subtract(false)
                    | undef(self.regs.f);
            }

            // DEC r[y]
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                self.cycles += 1;
                let y = (op >> 3) & 7;
                let address = if y == 6 { self.index_address(bus) } else { 0 };
                let old = self.read_reg_prefetched(bus, y, address);
                let new = old.wrapping_sub(1);
                self.write_reg_prefetched(bus, y, address, new);
                self.regs.f = carry_if(self.regs.flag_c())
                    | sign(new)
                    | zero(new)
                    | halfcarry_sub(old, 0, 1)
                    | pv_if(old == 0x80)
                    | subtract(true)
                    | undef(self.regs.f);
            }

            // LD r[y], n; under DD/FD with y=7 this is LD (IX+d),IY /
            // LD (IY+d),IX
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                self.cycles += 2;
                let y = (op >> 3) & 7;
                if y == 7 && self.prefix != PREFIX_NONE {
                    let address = self.index_address(bus);
                    let value = self.read_other_index();
                    self.write_word(bus, address, value);
                } else {
                    let address = if y == 6 { self.index_address(bus) } else { 0 };
                    let value = self.fetch_byte(bus);
                    self.write_reg_prefetched(bus, y, address, value);
                }
            }

            // Accumulator rotates and friends; under DD/FD these slots are
            // the 24-bit LD (IX+d)<->rp3[p] transfers
            0x07 | 0x0F | 0x17 | 0x1F | 0x27 | 0x2F | 0x37 | 0x3F => {
                let y = (op >> 3) & 7;
                if self.prefix != PREFIX_NONE {
                    self.cycles += 6;
                    let p = y >> 1;
                    if y & 1 != 0 {
                        // LD (IX/IY + d), rp3[p]
                        let address = self.index_address(bus);
                        let value = self.read_rp3(p);
                        self.write_word(bus, address, value);
                    } else {
                        // LD rp3[p], (IX/IY + d)
                        let address = self.index_address(bus);
                        let value = self.read_word(bus, address);
                        self.write_rp3(p, value);
                    }
                } else {
                    self.execute_rot_acc(y);
                }
            }

            // EX AF, AF'
            0x08 => {
                self.cycles += 1;
                self.regs.ex_af();
            }

            // ADD HL/IX/IY, rp[p]
            0x09 | 0x19 | 0x29 | 0x39 => {
                self.cycles += 1;
                let p = (op >> 4) & 3;
                let old = mask_mode(self.read_index(), self.l);
                let operand = mask_mode(self.read_rp(p), self.l);
                let result = old.wrapping_add(operand);
                self.write_index(mask_mode(result, self.l));
                self.regs.f = sign_if(self.regs.flag_s())
                    | zero_if(self.regs.flag_z())
                    | undef(self.regs.f)
                    | pv_if(self.regs.flag_pv())
                    | subtract(false)
                    | carry_word(i64::from(old) + i64::from(operand), self.l)
                    | halfcarry_word_add(old, operand, 0);
            }

            // DJNZ d
            0x10 => {
                self.cycles += 1;
                let offset = self.fetch_offset(bus);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                if b != 0 {
                    self.cycles += 1;
                    let target =
                        mask_mode(self.regs.pc.wrapping_add_signed(i32::from(offset)), self.l);
                    self.prefetch(bus, target, self.adl);
                }
            }

            // JR d
            0x18 => {
                self.cycles += 2;
                let offset = self.fetch_offset(bus);
                let target = mask_mode(self.regs.pc.wrapping_add_signed(i32::from(offset)), self.l);
                self.prefetch(bus, target, self.adl);
            }

            // JR cc[y-4], d
            0x20 | 0x28 | 0x30 | 0x38 => {
                self.cycles += 1;
                let offset = self.fetch_offset(bus);
                if self.read_cc(((op >> 3) & 7) - 4) {
                    self.cycles += 1;
                    let target =
                        mask_mode(self.regs.pc.wrapping_add_signed(i32::from(offset)), self.l);
                    self.prefetch(bus, target, self.adl);
                }
            }

            // .SIS / .LIS / .SIL / .LIL suffixes: force the widths for the
            // next instruction and keep fetching
            0x40 => {
                self.cycles += 1;
                self.suffix = true;
                self.l = false;
                self.il = false;
                return Flow::Chain;
            }
            0x49 => {
                self.cycles += 1;
                self.suffix = true;
                self.l = true;
                self.il = false;
                return Flow::Chain;
            }
            0x52 => {
                self.cycles += 1;
                self.suffix = true;
                self.l = false;
                self.il = true;
                return Flow::Chain;
            }
            0x5B => {
                self.cycles += 1;
                self.suffix = true;
                self.l = true;
                self.il = true;
                return Flow::Chain;
            }

            // LD H,H / LD L,L / LD A,A
            0x64 | 0x6D | 0x7F => {}

            // HALT: drain whatever budget remains until an interrupt
            0x76 => {
                self.halted = true;
                if self.cycle_count_delta() + self.cycles < 0 {
                    self.cycles = -self.cycle_count_delta();
                }
            }

            // LD r[y], r[z]
            0x41..=0x7E => {
                self.read_write_reg(bus, op & 7, (op >> 3) & 7);
            }

            // alu[y] r[z]
            0x80..=0xBF => {
                let value = self.read_reg(bus, op & 7);
                self.execute_alu((op >> 3) & 7, value);
            }

            // RET cc[y]
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                self.cycles += 2;
                if self.read_cc((op >> 3) & 7) {
                    self.cycles += 5;
                    self.ret(bus);
                }
            }

            // POP rp2[p]
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                self.cycles += 4;
                let value = self.pop_word(bus);
                self.write_rp2((op >> 4) & 3, value);
            }

            // RET
            0xC9 => {
                self.cycles += 7;
                self.ret(bus);
            }

            // EXX
            0xD9 => {
                self.cycles += 1;
                self.regs.exx();
            }

            // JP (HL/IX/IY)
            0xE9 => {
                self.cycles += 3;
                let target = self.read_index();
                self.prefetch(bus, target, self.l);
            }

            // LD SP, HL/IX/IY
            0xF9 => {
                self.cycles += 1;
                let value = self.read_index();
                self.write_sp(value);
            }

            // JP cc[y], Mmn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                if self.read_cc((op >> 3) & 7) {
                    self.cycles += 5;
                    let target = self.fetch_word_no_prefetch(bus);
                    self.prefetch(bus, target, self.l);
                } else {
                    self.cycles += 4;
                    self.fetch_word(bus);
                }
            }

            // JP Mmn
            0xC3 => {
                self.cycles += 5;
                let target = self.fetch_word_no_prefetch(bus);
                self.prefetch(bus, target, self.l);
            }

            // CB-prefixed bit operations
            0xCB => self.execute_cb(bus),

            // OUT (n), A
            0xD3 => {
                self.cycles += 3;
                let a = self.regs.a;
                let port = (u16::from(a) << 8) | u16::from(self.fetch_byte(bus));
                bus.port_write(port, a);
            }

            // IN A, (n)
            0xDB => {
                self.cycles += 3;
                let port = (u16::from(self.regs.a) << 8) | u16::from(self.fetch_byte(bus));
                self.regs.a = bus.port_read(port);
            }

            // EX (SP), HL/IX/IY
            0xE3 => {
                self.cycles += 7;
                let sp = self.read_sp();
                let from_stack = self.read_word(bus, sp);
                let from_index = self.read_index();
                self.write_index(from_stack);
                self.write_word(bus, sp, from_index);
            }

            // EX DE, HL
            0xEB => {
                self.cycles += 1;
                self.regs.ex_de_hl();
            }

            // DI
            0xF3 => {
                self.cycles += 1;
                self.ief1 = false;
                self.ief2 = false;
            }

            // EI: takes effect after one more instruction
            0xFB => {
                self.ief_wait = true;
                return Flow::DeferIrq;
            }

            // CALL cc[y], Mmn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                if self.read_cc((op >> 3) & 7) {
                    self.cycles += 7;
                    let target = self.fetch_word_no_prefetch(bus);
                    let mixed = self.suffix;
                    self.call(bus, target, mixed);
                } else {
                    self.cycles += 4;
                    self.fetch_word(bus);
                }
            }

            // PUSH rp2[p]
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                self.cycles += 4;
                let value = self.read_rp2((op >> 4) & 3);
                self.push_word(bus, value);
            }

            // CALL Mmn
            0xCD => {
                self.cycles += 7;
                let target = self.fetch_word_no_prefetch(bus);
                let mixed = self.suffix;
                self.call(bus, target, mixed);
            }

            // DD prefix: IX, and a displacement on indirect operands
            0xDD => {
                self.cycles += 1;
                self.prefix = PREFIX_IX;
                return Flow::Chain;
            }

            // ED-prefixed opcodes
            0xED => self.execute_ed(bus),

            // FD prefix: IY
            0xFD => {
                self.cycles += 1;
                self.prefix = PREFIX_IY;
                return Flow::Chain;
            }

            // alu[y] n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.fetch_byte(bus);
                self.execute_alu((op >> 3) & 7, value);
            }

            // RST y*8
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.cycles += 1;
                let mixed = self.suffix;
                self.call(bus, u32::from(op & 0x38), mixed);
            }
        }
        Flow::Done
    }

    // =========================================================================
    // CB page: rotates, shifts and bit operations
    // =========================================================================

    /// With DD/FD in effect the displacement byte precedes the CB opcode,
    /// so the effective address is resolved before the opcode is fetched.
    fn execute_cb<B: Bus>(&mut self, bus: &mut B) {
        let address = self.index_address(bus);
        let op = self.fetch_byte(bus);
        let y = (op >> 3) & 7;
        let z = op & 7;
        let old = self.read_reg_prefetched(bus, z, address);
        match op >> 6 {
            // rot[y] r[z]
            0 => self.execute_rot(bus, y, z, address, old),
            // BIT y, r[z]
            1 => {
                self.cycles += 2;
                let bit = old & (1 << y);
                self.regs.f = sign(bit)
                    | zero(bit)
                    | undef(self.regs.f)
                    | parity(bit)
                    | carry_if(self.regs.flag_c())
                    | HF;
            }
            // RES y, r[z]
            2 => {
                self.cycles += 2;
                self.write_reg_prefetched(bus, z, address, old & !(1 << y));
            }
            // SET y, r[z]
            3 => {
                self.cycles += 2;
                self.write_reg_prefetched(bus, z, address, old | (1 << y));
            }
            _ => unreachable!(),
        }
    }

    fn execute_rot<B: Bus>(&mut self, bus: &mut B, y: u8, z: u8, address: u32, value: u8) {
        let old_7 = value >> 7;
        let old_0 = value & 1;
        let old_c = u8::from(self.regs.flag_c());
        let (result, new_c) = match y {
            // RLC
            0 => ((value << 1) | old_7, old_7),
            // RRC
            1 => ((value >> 1) | (old_0 << 7), old_0),
            // RL
            2 => ((value << 1) | old_c, old_7),
            // RR
            3 => ((value >> 1) | (old_c << 7), old_0),
            // SLA
            4 => (value << 1, old_7),
            // SRA
            5 => ((value >> 1) | (value & 0x80), old_0),
            // SLL is not an eZ80 instruction
            6 => {
                self.opcode_trap(0x30 | z);
                return;
            }
            // SRL
            7 => (value >> 1, old_0),
            _ => unreachable!(),
        };
        self.cycles += 2;
        self.write_reg_prefetched(bus, z, address, result);
        self.regs.f = carry_if(new_c != 0)
            | sign(result)
            | parity(result)
            | undef(self.regs.f)
            | zero(result);
    }

    fn execute_rot_acc(&mut self, y: u8) {
        let f = self.regs.f;
        match y {
            // RLCA
            0 => {
                self.cycles += 1;
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.f = (f & !(CF | NF | HF)) | carry_if(carry != 0);
            }
            // RRCA
            1 => {
                self.cycles += 1;
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.f = (f & !(CF | NF | HF)) | carry_if(carry != 0);
            }
            // RLA
            2 => {
                self.cycles += 1;
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | u8::from(self.regs.flag_c());
                self.regs.f = (f & !(CF | NF | HF)) | carry_if(carry != 0);
            }
            // RRA
            3 => {
                self.cycles += 1;
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (u8::from(self.regs.flag_c()) << 7);
                self.regs.f = (f & !(CF | NF | HF)) | carry_if(carry != 0);
            }
            // DAA
            4 => {
                self.cycles += 1;
                self.execute_daa();
            }
            // CPL
            5 => {
                self.cycles += 1;
                self.regs.a = !self.regs.a;
                self.regs.f = f | NF | HF;
            }
            // SCF
            6 => {
                self.cycles += 1;
                self.regs.f = (f & !(NF | HF)) | CF;
            }
            // CCF
            7 => {
                self.cycles += 1;
                let carried = self.regs.flag_c();
                self.regs.f = (f & !(NF | HF | CF)) | if carried { HF } else { CF };
            }
            _ => unreachable!(),
        }
    }

    /// Decimal adjust. After a subtraction, H comes from the half-borrow of
    /// the adjustment; some references specify 0 instead (see the DAA test
    /// vector).
    fn execute_daa(&mut self) {
        let old = self.regs.a;
        let mut adjust: u8 = 0;
        if (old & 0xF) > 9 || self.regs.flag_h() {
            adjust += 6;
        }
        let sum = u16::from(old) + u16::from(adjust);
        if (sum >> 4) > 9 || sum & 0x100 != 0 || self.regs.flag_c() {
            adjust += 0x60;
        }
        if self.regs.flag_n() {
            let a = old.wrapping_sub(adjust);
            self.regs.a = a;
            self.regs.f = sign(a)
                | zero(a)
                | undef(self.regs.f)
                | parity(a)
                | subtract(true)
                | carry_if(adjust >= 0x60)
                | halfcarry_sub(old, adjust, 0);
        } else {
            let a = old.wrapping_add(adjust);
            self.regs.a = a;
            self.regs.f = sign(a)
                | zero(a)
                | undef(self.regs.f)
                | parity(a)
                | subtract(false)
                | carry_if(adjust >= 0x60)
                | halfcarry_add(old, adjust, 0);
        }
    }

    // =========================================================================
    // ALU
    // =========================================================================

    fn execute_alu(&mut self, i: u8, value: u8) {
        let a = self.regs.a;
        match i {
            // ADD A, v
            0 => {
                self.cycles += 1;
                let result = a.wrapping_add(value);
                self.regs.a = result;
                self.regs.f = sign(result)
                    | zero(result)
                    | undef(self.regs.f)
                    | overflow_add(a, value, result)
                    | subtract(false)
                    | carry_byte(i32::from(a) + i32::from(value))
                    | halfcarry_add(a, value, 0);
            }
            // ADC A, v
            1 => {
                self.cycles += 1;
                let c = u8::from(self.regs.flag_c());
                let result = a.wrapping_add(value).wrapping_add(c);
                self.regs.a = result;
                self.regs.f = sign(result)
                    | zero(result)
                    | undef(self.regs.f)
                    | overflow_add(a, value, result)
                    | subtract(false)
                    | carry_byte(i32::from(a) + i32::from(value) + i32::from(c))
                    | halfcarry_add(a, value, c);
            }
            // SUB v
            2 => {
                self.cycles += 1;
                let result = a.wrapping_sub(value);
                self.regs.a = result;
                self.regs.f = sign(result)
                    | zero(result)
                    | undef(self.regs.f)
                    | overflow_sub(a, value, result)
                    | subtract(true)
                    | carry_byte(i32::from(a) - i32::from(value))
                    | halfcarry_sub(a, value, 0);
            }
            // SBC A, v
            3 => {
                self.cycles += 1;
                let c = u8::from(self.regs.flag_c());
                let result = a.wrapping_sub(value).wrapping_sub(c);
                self.regs.a = result;
                self.regs.f = sign(result)
                    | zero(result)
                    | undef(self.regs.f)
                    | overflow_sub(a, value, result)
                    | subtract(true)
                    | carry_byte(i32::from(a) - i32::from(value) - i32::from(c))
                    | halfcarry_sub(a, value, c);
            }
            // AND v
            4 => {
                self.cycles += 1;
                let result = a & value;
                self.regs.a = result;
                self.regs.f =
                    sign(result) | zero(result) | undef(self.regs.f) | parity(result) | HF;
            }
            // XOR v
            5 => {
                self.cycles += 1;
                let result = a ^ value;
                self.regs.a = result;
                self.regs.f = sign(result) | zero(result) | undef(self.regs.f) | parity(result);
            }
            // OR v
            6 => {
                self.cycles += 1;
                let result = a | value;
                self.regs.a = result;
                self.regs.f = sign(result) | zero(result) | undef(self.regs.f) | parity(result);
            }
            // CP v
            7 => {
                self.cycles += 1;
                let result = a.wrapping_sub(value);
                self.regs.f = sign(result)
                    | zero(result)
                    | undef(self.regs.f)
                    | subtract(true)
                    | carry_byte(i32::from(a) - i32::from(value))
                    | overflow_sub(a, value, result)
                    | halfcarry_sub(a, value, 0);
            }
            _ => unreachable!(),
        }
    }

    // =========================================================================
    // ED page
    // =========================================================================

    fn execute_ed<B: Bus>(&mut self, bus: &mut B) {
        self.cycles += 1;
        // ED cancels the effect of a pending DD/FD prefix.
        self.prefix = PREFIX_NONE;
        let op = self.fetch_byte(bus);
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        match op {
            // IN0 r[y], (n)
            0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x38 => {
                self.cycles += 2;
                let port = u16::from(self.fetch_byte(bus));
                let value = bus.port_read(port);
                self.write_reg(bus, y, value);
                self.regs.f = sign(value)
                    | zero(value)
                    | undef(self.regs.f)
                    | parity(value)
                    | carry_if(self.regs.flag_c());
            }

            // OUT0 (n), r[y]
            0x01 | 0x09 | 0x11 | 0x19 | 0x21 | 0x29 | 0x39 => {
                self.cycles += 2;
                let port = u16::from(self.fetch_byte(bus));
                let value = self.read_reg(bus, y);
                bus.port_write(port, value);
            }

            // LD IY, (HL)
            0x31 => {
                self.cycles += 5;
                let address = self.regs.hl;
                let value = self.read_word(bus, address);
                write_pair(&mut self.regs.iy, value, self.l);
            }

            // LEA rp3[p], IX + d
            0x02 | 0x12 | 0x22 | 0x32 => {
                self.cycles += 3;
                self.prefix = PREFIX_IX;
                let address = self.index_address(bus);
                self.write_rp3(p, address);
            }

            // LEA rp3[p], IY + d
            0x03 | 0x13 | 0x23 | 0x33 => {
                self.cycles += 3;
                self.prefix = PREFIX_IY;
                let address = self.index_address(bus);
                self.write_rp3(p, address);
            }

            // TST A, r[y]
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                self.cycles += 2;
                let value = self.regs.a & self.read_reg(bus, y);
                self.regs.f =
                    sign(value) | zero(value) | undef(self.regs.f) | parity(value) | HF;
            }

            // LD (HL), IY
            0x3E => {
                self.cycles += 5;
                let address = self.regs.hl;
                let value = self.regs.iy;
                self.write_word(bus, address, value);
            }

            // LD rp3[p], (HL)
            0x07 | 0x17 | 0x27 | 0x37 => {
                self.cycles += 5;
                self.prefix = PREFIX_IX;
                let address = self.regs.hl;
                let value = self.read_word(bus, address);
                self.write_rp3(p, value);
            }

            // LD (HL), rp3[p]
            0x0F | 0x1F | 0x2F | 0x3F => {
                self.cycles += 5;
                self.prefix = PREFIX_IX;
                let address = self.regs.hl;
                let value = self.read_rp3(p);
                self.write_word(bus, address, value);
            }

            // IN r[y], (BC)
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x78 => {
                self.cycles += 3;
                let value = bus.port_read(self.regs.bcs());
                self.write_reg(bus, y, value);
                self.regs.f = sign(value)
                    | zero(value)
                    | undef(self.regs.f)
                    | parity(value)
                    | carry_if(self.regs.flag_c());
            }

            // OUT (BC), r[y]
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x79 => {
                self.cycles += 3;
                let value = self.read_reg(bus, y);
                bus.port_write(self.regs.bcs(), value);
            }

            // SBC HL, rp[p]
            0x42 | 0x52 | 0x62 | 0x72 => {
                self.cycles += 2;
                let old = mask_mode(self.regs.hl, self.l);
                let operand = mask_mode(self.read_rp(p), self.l);
                let c = u32::from(self.regs.flag_c());
                let result = mask_mode(old.wrapping_sub(operand).wrapping_sub(c), self.l);
                write_pair(&mut self.regs.hl, result, self.l);
                self.regs.f = sign_word(result, self.l)
                    | zero_word(result)
                    | undef(self.regs.f)
                    | overflow_word_sub(old, operand, result, self.l)
                    | subtract(true)
                    | carry_word(i64::from(old) - i64::from(operand) - i64::from(c), self.l)
                    | halfcarry_word_sub(old, operand, c);
            }

            // ADC HL, rp[p]
            0x4A | 0x5A | 0x6A | 0x7A => {
                self.cycles += 2;
                let old = mask_mode(self.regs.hl, self.l);
                let operand = mask_mode(self.read_rp(p), self.l);
                let c = u32::from(self.regs.flag_c());
                let result = mask_mode(old.wrapping_add(operand).wrapping_add(c), self.l);
                write_pair(&mut self.regs.hl, result, self.l);
                self.regs.f = sign_word(result, self.l)
                    | zero_word(result)
                    | undef(self.regs.f)
                    | overflow_word_add(old, operand, result, self.l)
                    | subtract(false)
                    | carry_word(i64::from(old) + i64::from(operand) + i64::from(c), self.l)
                    | halfcarry_word_add(old, operand, c);
            }

            // LD (Mmn), rp[p]
            0x43 | 0x53 | 0x63 | 0x73 => {
                self.cycles += 8;
                let address = self.fetch_word(bus);
                let value = self.read_rp(p);
                self.write_word(bus, address, value);
            }

            // LD rp[p], (Mmn)
            0x4B | 0x5B | 0x6B | 0x7B => {
                self.cycles += 8;
                let address = self.fetch_word(bus);
                let value = self.read_word(bus, address);
                self.write_rp(p, value);
            }

            // NEG
            0x44 => {
                self.cycles += 2;
                let old = self.regs.a;
                let result = old.wrapping_neg();
                self.regs.a = result;
                self.regs.f = sign(result)
                    | zero(result)
                    | undef(self.regs.f)
                    | pv_if(old == 0x80)
                    | subtract(true)
                    | carry_if(old != 0)
                    | halfcarry_sub(0, old, 0);
            }

            // LEA IX, IY + d
            0x54 => {
                self.cycles += 3;
                self.prefix = PREFIX_IY;
                let address = self.index_address(bus);
                write_pair(&mut self.regs.ix, address, self.l);
            }

            // TST A, n
            0x64 => {
                self.cycles += 2;
                let value = self.regs.a & self.fetch_byte(bus);
                self.regs.f =
                    sign(value) | zero(value) | undef(self.regs.f) | parity(value) | HF;
            }

            // TSTIO n
            0x74 => {
                self.cycles += 2;
                let port_value = bus.port_read(u16::from(self.regs.c()));
                let value = port_value & self.fetch_byte(bus);
                self.regs.f =
                    sign(value) | zero(value) | undef(self.regs.f) | parity(value) | HF;
            }

            // MLT rp[p]
            0x4C | 0x5C | 0x6C | 0x7C => {
                self.cycles += 4;
                let old = self.read_rp(p);
                let result = (old & 0xFF) * ((old >> 8) & 0xFF);
                self.write_rp(p, result);
            }

            // RETN / RETI
            0x45 | 0x4D => {
                self.cycles += 7;
                self.ief1 = self.ief2;
                self.ret(bus);
            }

            // LEA IY, IX + d
            0x55 => {
                self.cycles += 3;
                self.prefix = PREFIX_IX;
                let address = self.index_address(bus);
                write_pair(&mut self.regs.iy, address, self.l);
            }

            // PEA IX + d
            0x65 => {
                self.cycles += 6;
                let offset = self.fetch_offset(bus);
                let value = self.regs.ix.wrapping_add_signed(i32::from(offset));
                self.push_word(bus, value);
            }

            // LD MB, A (ADL mode only)
            0x6D => {
                self.cycles += 2;
                if self.adl {
                    self.regs.mbase = self.regs.a;
                }
            }

            // STMIX
            0x7D => {
                self.cycles += 2;
                self.madl = true;
            }

            // IM im[y]
            0x46 | 0x56 | 0x5E => {
                self.cycles += 2;
                self.im = y;
            }

            // PEA IY + d
            0x66 => {
                self.cycles += 6;
                let offset = self.fetch_offset(bus);
                let value = self.regs.iy.wrapping_add_signed(i32::from(offset));
                self.push_word(bus, value);
            }

            // LD A, MB
            0x6E => {
                self.cycles += 2;
                self.regs.a = self.regs.mbase;
            }

            // SLP: low-power entry is not modelled
            0x76 => {
                self.cycles += 1;
            }

            // RSMIX
            0x7E => {
                self.cycles += 2;
                self.madl = false;
            }

            // LD I, A
            0x47 => {
                self.cycles += 2;
                self.regs.i = u16::from(self.regs.a) | (self.regs.i & 0xF0);
            }

            // LD R, A
            0x4F => {
                self.cycles += 2;
                self.regs.r = self.regs.a;
            }

            // LD A, I
            0x57 => {
                self.cycles += 2;
                let value = (self.regs.i & 0x0F) as u8;
                self.regs.a = value;
                self.regs.f = sign(value)
                    | zero(value)
                    | undef(self.regs.f)
                    | pv_if(self.ief1)
                    | subtract(false)
                    | carry_if(self.regs.flag_c());
            }

            // LD A, R
            0x5F => {
                self.cycles += 2;
                let value = self.regs.r;
                self.regs.a = value;
                self.regs.f = sign(value)
                    | zero(value)
                    | undef(self.regs.f)
                    | pv_if(self.ief1)
                    | subtract(false)
                    | carry_if(self.regs.flag_c());
            }

            // RRD
            0x67 => {
                self.cycles += 5;
                let old = self.regs.a;
                let address = self.regs.hl;
                let mem = self.read_byte(bus, address);
                self.regs.a = (old & 0xF0) | (mem & 0x0F);
                let rotated = (mem >> 4) | (old << 4);
                self.write_byte(bus, address, rotated);
                let a = self.regs.a;
                self.regs.f = carry_if(self.regs.flag_c())
                    | sign(a)
                    | zero(a)
                    | parity(a)
                    | undef(self.regs.f);
            }

            // RLD
            0x6F => {
                self.cycles += 5;
                let old = self.regs.a;
                let address = self.regs.hl;
                let mem = self.read_byte(bus, address);
                self.regs.a = (old & 0xF0) | (mem >> 4);
                let rotated = (mem << 4) | (old & 0x0F);
                self.write_byte(bus, address, rotated);
                let a = self.regs.a;
                self.regs.f = carry_if(self.regs.flag_c())
                    | sign(a)
                    | zero(a)
                    | parity(a)
                    | undef(self.regs.f);
            }

            // Block transfer/compare/IO grid
            0x80..=0xBF => {
                if z <= 4 {
                    self.execute_block(bus, y, z);
                } else {
                    self.opcode_trap(op);
                }
            }

            // INIRX
            0xC2 => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.des());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTIRX
            0xC3 => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.des(), value);
                self.step_hl(1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // LD I, HL
            0xC7 => {
                self.cycles += 2;
                self.regs.i = self.regs.hls();
            }

            // INDRX
            0xCA => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.des());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(-1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTDRX
            0xCB => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.des(), value);
                self.step_hl(-1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // LD HL, I
            0xD7 => {
                self.cycles += 2;
                self.regs.hl = u32::from(self.regs.i) | (u32::from(self.regs.mbase) << 16);
            }

            // Flash page erase (emulator extension)
            #[cfg(feature = "flash-erase")]
            0xEE => {
                bus.flash_erase(self.regs.hl & !0x3FFF);
            }

            _ => self.opcode_trap(op),
        }
    }

    /// Re-prime the prefetch at the start of the current instruction so a
    /// repeating block instruction executes again.
    fn repeat_instruction<B: Bus>(&mut self, bus: &mut B) {
        let target = self.regs.pc.wrapping_sub(2 + u32::from(self.suffix));
        self.prefetch(bus, target, self.adl);
    }

    // =========================================================================
    // Block instructions (ED x=2)
    // =========================================================================

    #[allow(clippy::cognitive_complexity)]
    fn execute_block<B: Bus>(&mut self, bus: &mut B, y: u8, z: u8) {
        match (y, z) {
            // INIM
            (0, 2) => {
                self.cycles += 1;
                let value = bus.port_read(u16::from(self.regs.c()));
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(1);
                self.regs.set_c(self.regs.c().wrapping_add(1));
                let old_b = self.regs.b();
                let b = old_b.wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = sign(b)
                    | zero(b)
                    | halfcarry_sub(old_b, 0, 1)
                    | subtract(value & 0x80 != 0)
                    | undef(self.regs.f);
            }

            // OTIM
            (0, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(u16::from(self.regs.c()), value);
                self.step_hl(1);
                self.regs.set_c(self.regs.c().wrapping_add(1));
                let old_b = self.regs.b();
                let b = old_b.wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = sign(b)
                    | zero(b)
                    | halfcarry_sub(old_b, 0, 1)
                    | subtract(value & 0x80 != 0)
                    | undef(self.regs.f);
            }

            // INI2
            (0, 4) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.bcs());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(1);
                self.regs.set_c(self.regs.c().wrapping_add(1));
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // INDM
            (1, 2) => {
                self.cycles += 1;
                let value = bus.port_read(u16::from(self.regs.c()));
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(-1);
                self.regs.set_c(self.regs.c().wrapping_sub(1));
                let old_b = self.regs.b();
                let b = old_b.wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = sign(b)
                    | zero(b)
                    | halfcarry_sub(old_b, 0, 1)
                    | subtract(value & 0x80 != 0)
                    | undef(self.regs.f);
            }

            // OTDM
            (1, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(u16::from(self.regs.c()), value);
                self.step_hl(-1);
                self.regs.set_c(self.regs.c().wrapping_sub(1));
                let old_b = self.regs.b();
                let b = old_b.wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = sign(b)
                    | zero(b)
                    | halfcarry_sub(old_b, 0, 1)
                    | subtract(value & 0x80 != 0)
                    | undef(self.regs.f);
            }

            // IND2
            (1, 4) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.bcs());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(-1);
                self.regs.set_c(self.regs.c().wrapping_sub(1));
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // INIMR
            (2, 2) => {
                self.cycles += 1;
                let value = bus.port_read(u16::from(self.regs.c()));
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(1);
                self.regs.set_c(self.regs.c().wrapping_add(1));
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTIMR
            (2, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(u16::from(self.regs.c()), value);
                self.step_hl(1);
                self.regs.set_c(self.regs.c().wrapping_add(1));
                let old_b = self.regs.b();
                let b = old_b.wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = sign(b)
                    | zero(b)
                    | halfcarry_sub(old_b, 0, 1)
                    | subtract(value & 0x80 != 0)
                    | undef(self.regs.f);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // INI2R
            (2, 4) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.des());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(1);
                self.step_de(1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // INDMR
            (3, 2) => {
                self.cycles += 1;
                let value = bus.port_read(u16::from(self.regs.c()));
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(-1);
                self.regs.set_c(self.regs.c().wrapping_sub(1));
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTDMR
            (3, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(u16::from(self.regs.c()), value);
                self.step_hl(-1);
                self.regs.set_c(self.regs.c().wrapping_sub(1));
                let old_b = self.regs.b();
                let b = old_b.wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = sign(b)
                    | zero(b)
                    | halfcarry_sub(old_b, 0, 1)
                    | subtract(value & 0x80 != 0)
                    | undef(self.regs.f);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // IND2R
            (3, 4) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.des());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(-1);
                self.step_de(-1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // LDI
            (4, 0) => {
                self.cycles += 1;
                let source = self.regs.hl;
                let value = self.read_byte(bus, source);
                self.step_hl(1);
                let dest = self.regs.de;
                self.write_byte(bus, dest, value);
                self.step_de(1);
                let bc = self.dec_bc();
                self.regs.f = (self.regs.f & !(PF | NF)) | pv_if(bc != 0);
            }

            // CPI
            (4, 1) => {
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                self.step_hl(1);
                let bc = self.dec_bc();
                let result = self.regs.a.wrapping_sub(value);
                self.regs.f = sign(result)
                    | zero(result)
                    | halfcarry_sub(self.regs.a, value, 0)
                    | pv_if(bc != 0)
                    | subtract(true)
                    | carry_if(self.regs.flag_c())
                    | undef(self.regs.f);
            }

            // INI
            (4, 2) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.bcs());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // OUTI
            (4, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.bcs(), value);
                self.step_hl(1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // OUTI2
            (4, 4) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.bcs(), value);
                self.step_hl(1);
                self.regs.set_c(self.regs.c().wrapping_add(1));
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // LDD
            (5, 0) => {
                self.cycles += 1;
                let source = self.regs.hl;
                let value = self.read_byte(bus, source);
                self.step_hl(-1);
                let dest = self.regs.de;
                self.write_byte(bus, dest, value);
                self.step_de(-1);
                let bc = self.dec_bc();
                self.regs.f = (self.regs.f & !(PF | NF)) | pv_if(bc != 0);
            }

            // CPD
            (5, 1) => {
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                self.step_hl(-1);
                let bc = self.dec_bc();
                let result = self.regs.a.wrapping_sub(value);
                self.regs.f = sign(result)
                    | zero(result)
                    | halfcarry_sub(self.regs.a, value, 0)
                    | pv_if(bc != 0)
                    | subtract(true)
                    | carry_if(self.regs.flag_c())
                    | undef(self.regs.f);
            }

            // IND
            (5, 2) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.bcs());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(-1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // OUTD
            (5, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.bcs(), value);
                self.step_hl(-1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // OUTD2
            (5, 4) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.bcs(), value);
                self.step_hl(-1);
                self.regs.set_c(self.regs.c().wrapping_sub(1));
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
            }

            // LDIR
            (6, 0) => {
                self.cycles += 1;
                let source = self.regs.hl;
                let value = self.read_byte(bus, source);
                let dest = self.regs.de;
                self.write_byte(bus, dest, value);
                self.step_hl(1);
                self.step_de(1);
                let bc = self.dec_bc();
                self.regs.f = (self.regs.f & !(PF | NF)) | pv_if(bc != 0);
                if bc != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // CPIR
            (6, 1) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                self.step_hl(1);
                let bc = self.dec_bc();
                let result = self.regs.a.wrapping_sub(value);
                self.regs.f = sign(result)
                    | zero(result)
                    | halfcarry_sub(self.regs.a, value, 0)
                    | pv_if(bc != 0)
                    | subtract(true)
                    | carry_if(self.regs.flag_c())
                    | undef(self.regs.f);
                if bc != 0 && !self.regs.flag_z() {
                    self.cycles += 1;
                    self.repeat_instruction(bus);
                }
            }

            // INIR
            (6, 2) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.bcs());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTIR
            (6, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.bcs(), value);
                self.step_hl(1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTI2R
            (6, 4) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.des(), value);
                self.step_hl(1);
                self.step_de(1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // LDDR
            (7, 0) => {
                self.cycles += 1;
                let source = self.regs.hl;
                let value = self.read_byte(bus, source);
                self.step_hl(-1);
                let dest = self.regs.de;
                self.write_byte(bus, dest, value);
                self.step_de(-1);
                let bc = self.dec_bc();
                self.regs.f = (self.regs.f & !(PF | NF)) | pv_if(bc != 0);
                if bc != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // CPDR
            (7, 1) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                self.step_hl(-1);
                let bc = self.dec_bc();
                let result = self.regs.a.wrapping_sub(value);
                self.regs.f = sign(result)
                    | zero(result)
                    | halfcarry_sub(self.regs.a, value, 0)
                    | pv_if(bc != 0)
                    | subtract(true)
                    | carry_if(self.regs.flag_c())
                    | undef(self.regs.f);
                if bc != 0 && !self.regs.flag_z() {
                    self.cycles += 1;
                    self.repeat_instruction(bus);
                }
            }

            // INDR
            (7, 2) => {
                self.cycles += 1;
                let value = bus.port_read(self.regs.bcs());
                let address = self.regs.hl;
                self.write_byte(bus, address, value);
                self.step_hl(-1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTDR
            (7, 3) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.bcs(), value);
                self.step_hl(-1);
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                self.regs.f = (self.regs.f & !(ZF | NF)) | zero(b) | subtract(value & 0x80 != 0);
                if b != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // OTD2R
            (7, 4) => {
                self.cycles += 1;
                let address = self.regs.hl;
                let value = self.read_byte(bus, address);
                bus.port_write(self.regs.des(), value);
                self.step_hl(-1);
                self.step_de(-1);
                let counter = self.dec_bc() as u8;
                self.regs.f =
                    (self.regs.f & !(ZF | NF)) | zero(counter) | subtract(value & 0x80 != 0);
                if counter != 0 {
                    self.repeat_instruction(bus);
                }
            }

            // The remaining slots execute nothing; the driver's progress
            // bump keeps the budget moving.
            _ => {}
        }
    }
}
