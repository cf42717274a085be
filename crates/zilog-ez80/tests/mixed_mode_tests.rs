//! ADL/Z80 mode interaction: MBASE paging, width suffixes, mixed-mode
//! call frames, and index-prefix addressing.

use emu_core::SimpleBus;
use zilog_ez80::{Ez80, Ez80State};

fn setup(origin: u32, adl: bool, program: &[u8]) -> (Ez80, SimpleBus) {
    let mut bus = SimpleBus::new();
    bus.load(origin, program);
    let mut cpu = Ez80::new();
    cpu.reset(&mut bus);
    cpu.flush(&mut bus, origin, adl);
    (cpu, bus)
}

fn run(cpu: &mut Ez80, bus: &mut SimpleBus, cycles: i32) {
    cpu.set_cycle_count_delta(-cycles);
    cpu.execute(bus);
}

fn with_state(
    cpu: &mut Ez80,
    bus: &mut SimpleBus,
    origin: u32,
    adl: bool,
    tweak: impl FnOnce(&mut Ez80State),
) {
    let mut state = cpu.save_state();
    tweak(&mut state);
    cpu.load_state(&state);
    cpu.flush(bus, origin, adl);
}

#[test]
fn z80_mode_addresses_go_through_the_mbase_page() {
    let mut bus = SimpleBus::new();
    // Program lives in the 0xD0 page; so does the data it reads.
    bus.load(0xD00100, &[0x3A, 0x34, 0x12]);
    bus.load(0xD01234, &[0x5A]);
    let mut cpu = Ez80::new();
    cpu.reset(&mut bus);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.mbase = 0xD0);
    run(&mut cpu, &mut bus, 5);
    assert_eq!(cpu.registers().a, 0x5A, "data fetched from the MBASE page");
    assert_eq!(cpu.pc(), 0xD00103, "PC stays inside the page");
}

#[test]
fn lil_suffix_widens_one_instruction() {
    // .LIL LD HL, Mmn from Z80 mode loads all 24 bits.
    let (mut cpu, mut bus) = setup(0x100, false, &[0x5B, 0x21, 0x56, 0x34, 0x12]);
    run(&mut cpu, &mut bus, 5);
    assert_eq!(cpu.registers().hl, 0x123456);
    assert_eq!(cpu.pc(), 0x105, "three immediate bytes under IL");
    let state = cpu.save_state();
    assert!(!state.suffix, "suffix clears after one instruction");
    assert!(!state.l, "widths re-derive from ADL afterwards");
}

#[test]
fn suffixed_call_writes_the_mixed_frame_and_ret_restores_it() {
    // .SIS CALL from ADL mode: PCU goes to SPL, PCH/PCL to SPS, then the
    // (MADL<<1)|ADL tag to SPL. A suffixed RET peels it back off.
    let mut bus = SimpleBus::new();
    bus.load(0x200, &[0x40, 0xCD, 0x00, 0x05]);
    // Target runs in Z80 mode: .LIS RET.
    bus.load(0x500, &[0x49, 0xC9]);
    let mut cpu = Ez80::new();
    cpu.reset(&mut bus);
    with_state(&mut cpu, &mut bus, 0x200, true, |st| {
        st.registers.spl = 0xE000;
        st.registers.sps = 0x9000;
    });

    run(&mut cpu, &mut bus, 8);
    assert_eq!(bus.peek(0xDFFF), 0x00, "PCU pushed onto SPL");
    assert_eq!(bus.peek(0xDFFE), 0x01, "tag byte (MADL<<1)|ADL");
    assert_eq!(bus.peek(0x8FFF), 0x02, "PCH pushed onto SPS");
    assert_eq!(bus.peek(0x8FFE), 0x04, "PCL pushed onto SPS");
    assert!(!cpu.adl(), "the short suffix lands the callee in Z80 mode");
    assert_eq!(cpu.pc(), 0x000500);

    run(&mut cpu, &mut bus, 9);
    assert!(cpu.adl(), "RET restores ADL from the tag");
    assert_eq!(cpu.pc(), 0x000204, "resumes after the CALL");
    let regs = cpu.registers();
    assert_eq!(regs.spl, 0xE000, "SPL balanced");
    assert_eq!(regs.sps, 0x9000, "SPS balanced");
}

#[test]
fn plain_call_and_ret_in_adl_use_three_byte_frames() {
    let mut bus = SimpleBus::new();
    bus.load(0x200, &[0xCD, 0x00, 0x05, 0x00]);
    bus.load(0x500, &[0xC9]);
    let mut cpu = Ez80::new();
    cpu.reset(&mut bus);
    with_state(&mut cpu, &mut bus, 0x200, true, |st| st.registers.spl = 0xE000);
    run(&mut cpu, &mut bus, 7);
    assert_eq!(cpu.pc(), 0x500);
    assert_eq!(cpu.registers().spl, 0xDFFD, "three bytes pushed");
    run(&mut cpu, &mut bus, 8);
    assert_eq!(cpu.pc(), 0x204, "returns past the 24-bit operand");
    assert_eq!(cpu.registers().spl, 0xE000);
}

#[test]
fn indexed_load_writes_the_real_h() {
    // LD H,(IX+5): the memory side uses IX, the register side is plain H.
    let (mut cpu, mut bus) = setup(0x100, false, &[0xDD, 0x66, 0x05]);
    bus.load(0x1005, &[0x77]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.ix = 0x1000);
    run(&mut cpu, &mut bus, 2);
    let regs = cpu.registers();
    assert_eq!(regs.h(), 0x77, "H written, not IXH");
    assert_eq!(regs.ix, 0x1000, "IX only supplies the address");
}

#[test]
fn indexed_store_reads_the_real_h() {
    // LD (IX+5),H stores H, not IXH.
    let (mut cpu, mut bus) = setup(0x100, false, &[0xDD, 0x74, 0x05]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| {
        st.registers.ix = 0x1000;
        st.registers.hl = 0x3C00;
    });
    run(&mut cpu, &mut bus, 2);
    assert_eq!(bus.peek(0x1005), 0x3C);
}

#[test]
fn register_to_register_under_prefix_substitutes_index_halves() {
    // LD H,E under DD is LD IXH,E.
    let (mut cpu, mut bus) = setup(0x100, false, &[0xDD, 0x63]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| {
        st.registers.ix = 0x1000;
        st.registers.de = 0x0042;
    });
    run(&mut cpu, &mut bus, 2);
    let regs = cpu.registers();
    assert_eq!(regs.ix, 0x4200, "IXH took the value");
    assert_eq!(regs.h(), 0x00, "H untouched");
}

#[test]
fn cross_index_word_load() {
    // LD IY,(IX+5) in ADL mode reads a 24-bit word.
    let (mut cpu, mut bus) = setup(0x200, true, &[0xDD, 0x31, 0x05]);
    bus.load(0x050005, &[0x21, 0x43, 0x65]);
    with_state(&mut cpu, &mut bus, 0x200, true, |st| st.registers.ix = 0x050000);
    run(&mut cpu, &mut bus, 7);
    let regs = cpu.registers();
    assert_eq!(regs.iy, 0x654321);
    assert_eq!(regs.ix, 0x050000);
}

#[test]
fn indexed_pair_store_writes_24_bits() {
    // LD (IX+5),BC in ADL mode.
    let (mut cpu, mut bus) = setup(0x200, true, &[0xDD, 0x0F, 0x05]);
    with_state(&mut cpu, &mut bus, 0x200, true, |st| {
        st.registers.ix = 0x050000;
        st.registers.bc = 0x123456;
    });
    run(&mut cpu, &mut bus, 7);
    assert_eq!(bus.peek(0x050005), 0x56);
    assert_eq!(bus.peek(0x050006), 0x34);
    assert_eq!(bus.peek(0x050007), 0x12);
}

#[test]
fn indexed_immediate_store_fetches_displacement_first() {
    // LD (IX+5), 0xAB: displacement byte precedes the immediate.
    let (mut cpu, mut bus) = setup(0x100, false, &[0xDD, 0x36, 0x05, 0xAB]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.ix = 0x1000);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(bus.peek(0x1005), 0xAB);
    assert_eq!(cpu.pc(), 0x104);
}

#[test]
fn ld_mb_a_only_takes_effect_in_adl() {
    let (mut cpu, mut bus) = setup(0x100, false, &[0xED, 0x6D]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.a = 0x5A);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.registers().mbase, 0x00, "ignored in Z80 mode");

    bus.load(0x200, &[0xED, 0x6D]);
    cpu.flush(&mut bus, 0x200, true);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.registers().mbase, 0x5A, "honoured in ADL mode");
}

#[test]
fn ex_sp_hl_swaps_a_24_bit_word() {
    let (mut cpu, mut bus) = setup(0x200, true, &[0xE3]);
    bus.load(0xE000, &[0x11, 0x22, 0x33]);
    with_state(&mut cpu, &mut bus, 0x200, true, |st| {
        st.registers.spl = 0xE000;
        st.registers.hl = 0x654321;
    });
    run(&mut cpu, &mut bus, 7);
    assert_eq!(cpu.registers().hl, 0x332211);
    assert_eq!(bus.peek(0xE000), 0x21);
    assert_eq!(bus.peek(0xE001), 0x43);
    assert_eq!(bus.peek(0xE002), 0x65);
}

#[test]
fn lea_computes_without_touching_memory() {
    // LEA BC, IX+5.
    let (mut cpu, mut bus) = setup(0x200, true, &[0xED, 0x02, 0x05]);
    with_state(&mut cpu, &mut bus, 0x200, true, |st| st.registers.ix = 0x010203);
    run(&mut cpu, &mut bus, 4);
    assert_eq!(cpu.registers().bc, 0x010208);
}

#[test]
fn pea_pushes_the_effective_address() {
    // PEA IX+5 in ADL mode.
    let (mut cpu, mut bus) = setup(0x200, true, &[0xED, 0x65, 0x05]);
    with_state(&mut cpu, &mut bus, 0x200, true, |st| {
        st.registers.ix = 0x010203;
        st.registers.spl = 0xE000;
    });
    run(&mut cpu, &mut bus, 7);
    assert_eq!(cpu.registers().spl, 0xDFFD);
    assert_eq!(bus.peek(0xDFFD), 0x08);
    assert_eq!(bus.peek(0xDFFE), 0x02);
    assert_eq!(bus.peek(0xDFFF), 0x01);
}

#[test]
fn short_width_writes_preserve_the_upper_byte() {
    // In Z80 mode a 16-bit load leaves HL's upper byte alone.
    let (mut cpu, mut bus) = setup(0x100, false, &[0x21, 0x34, 0x12]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.hl = 0xAB0000);
    run(&mut cpu, &mut bus, 4);
    assert_eq!(cpu.registers().hl, 0xAB1234, "upper byte survives a short write");
}

#[cfg(feature = "flash-erase")]
#[test]
fn flash_erase_opcode_clears_the_page_around_hl() {
    let (mut cpu, mut bus) = setup(0x100, false, &[0xED, 0xEE]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.hl = 0x4321);
    run(&mut cpu, &mut bus, 2);
    assert_eq!(bus.erased_pages, vec![0x4000], "page base handed to the bus");
    assert_eq!(bus.peek(0x4000), 0xFF);
    assert_eq!(bus.peek(0x7FFF), 0xFF);
}

#[cfg(not(feature = "flash-erase"))]
#[test]
fn flash_erase_opcode_traps_when_disabled() {
    let (mut cpu, mut bus) = setup(0x100, false, &[0xED, 0xEE]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.hl = 0x4321);
    run(&mut cpu, &mut bus, 2);
    assert!(bus.erased_pages.is_empty(), "no erase without the feature");
    assert!(cpu.save_state().ief_wait, "slot behaves as an opcode trap");
}
