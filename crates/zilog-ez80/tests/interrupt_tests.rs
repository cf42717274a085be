//! Interrupt acknowledge, EI latency, HALT and debugger interplay.

use emu_core::{DebugReason, SimpleBus, DBG_EXEC_BREAKPOINT, EVENT_DEBUG_STEP};
use zilog_ez80::{Ez80, Ez80State};

fn setup(origin: u32, program: &[u8]) -> (Ez80, SimpleBus) {
    let mut bus = SimpleBus::new();
    bus.load(origin, program);
    let mut cpu = Ez80::new();
    cpu.reset(&mut bus);
    cpu.flush(&mut bus, origin, false);
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
fn ei_enables_after_exactly_one_more_instruction() {
    // EI; NOP; pending line already raised. The NOP must still run before
    // the acknowledge, so the pushed return address sits past it.
    let (mut cpu, mut bus) = setup(0x100, &[0xFB, 0x00]);
    bus.load(0x38, &[0x76]);
    bus.interrupt_status = 1;
    bus.interrupt_enabled = 1;
    with_state(&mut cpu, &mut bus, 0x100, false, |st| st.registers.sps = 0x9000);
    run(&mut cpu, &mut bus, 20);
    assert_eq!(cpu.pc(), 0x39, "handler reached and halted");
    assert!(cpu.is_halted());
    assert!(!cpu.ief1(), "acknowledge clears IEF1");
    assert!(!cpu.ief2());
    assert_eq!(bus.peek(0x8FFF), 0x01, "return address high byte");
    assert_eq!(bus.peek(0x8FFE), 0x02, "return address is past the NOP");
}

#[test]
fn ei_takes_effect_without_a_pending_line() {
    let (mut cpu, mut bus) = setup(0x100, &[0xFB, 0x00, 0x76]);
    run(&mut cpu, &mut bus, 2);
    assert!(cpu.ief1(), "both flip-flops raised after the latency window");
    assert!(cpu.ief2());
}

#[test]
fn di_clears_both_flip_flops() {
    let (mut cpu, mut bus) = setup(0x100, &[0xF3]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| {
        st.ief1 = true;
        st.ief2 = true;
    });
    run(&mut cpu, &mut bus, 1);
    assert!(!cpu.ief1());
    assert!(!cpu.ief2());
}

#[test]
fn halt_consumes_the_remaining_budget() {
    let (mut cpu, mut bus) = setup(0x100, &[0x76]);
    run(&mut cpu, &mut bus, 100);
    assert!(cpu.is_halted());
    assert_eq!(cpu.pc(), 0x101);
    assert_eq!(cpu.cycle_count_delta(), 0);
    assert_eq!(cpu.total_cycles().get(), 100, "HALT soaks the whole budget");

    // A halted CPU with no interrupt just swallows further budgets.
    run(&mut cpu, &mut bus, 50);
    assert!(cpu.is_halted());
    assert_eq!(cpu.pc(), 0x101, "no forward motion while halted");
    assert_eq!(cpu.total_cycles().get(), 100);
}

#[test]
fn interrupt_wakes_a_halted_cpu() {
    // HALT with IEF1 set; the acknowledge calls 0x38 with the return
    // address one past the HALT opcode.
    let (mut cpu, mut bus) = setup(0x100, &[0x76]);
    bus.load(0x38, &[0x76]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| {
        st.ief1 = true;
        st.ief2 = true;
        st.registers.sps = 0x9000;
    });
    run(&mut cpu, &mut bus, 10);
    assert!(cpu.is_halted());
    assert_eq!(cpu.pc(), 0x101);

    bus.interrupt_status = 0x10;
    bus.interrupt_enabled = 0x10;
    run(&mut cpu, &mut bus, 10);
    assert_eq!(cpu.pc(), 0x39, "woke into the handler and halted there");
    assert!(!cpu.ief1());
    assert!(!cpu.ief2());
    assert_eq!(bus.peek(0x8FFF), 0x01);
    assert_eq!(bus.peek(0x8FFE), 0x01, "return address is HALT PC + 1");
}

#[test]
fn vectored_mode_reads_the_handler_through_i_and_r() {
    // Internal mode 3: the vector word lives at (I << 8) | !R.
    let (mut cpu, mut bus) = setup(0x100, &[0x00]);
    bus.load(0x40FF, &[0x00, 0x05]);
    bus.load(0x500, &[0x76]);
    bus.interrupt_status = 1;
    bus.interrupt_enabled = 1;
    with_state(&mut cpu, &mut bus, 0x100, false, |st| {
        st.im = 3;
        st.ief1 = true;
        st.ief2 = true;
        st.registers.i = 0x40;
        st.registers.r = 0x00;
        st.registers.sps = 0x9000;
    });
    run(&mut cpu, &mut bus, 10);
    assert_eq!(cpu.pc(), 0x501, "vector fetched from 0x40FF");
    assert!(cpu.is_halted());
    assert_eq!(bus.peek(0x8FFF), 0x01, "interrupted PC pushed");
    assert_eq!(bus.peek(0x8FFE), 0x00);
}

#[test]
fn reti_restores_ief1_from_ief2() {
    let (mut cpu, mut bus) = setup(0x100, &[0xED, 0x4D]);
    with_state(&mut cpu, &mut bus, 0x100, false, |st| {
        st.ief1 = false;
        st.ief2 = true;
        st.registers.sps = 0x8FFE;
    });
    bus.load(0x8FFE, &[0x00, 0x02]);
    run(&mut cpu, &mut bus, 9);
    assert!(cpu.ief1(), "IEF1 reloaded from IEF2");
    assert_eq!(cpu.pc(), 0x200);
    assert_eq!(cpu.registers().sps, 0x9000);
}

#[test]
fn opcode_trap_raises_the_ei_latency_sentinel() {
    let (mut cpu, mut bus) = setup(0x100, &[0xED, 0x77, 0x00]);
    run(&mut cpu, &mut bus, 1);
    assert!(cpu.save_state().ief_wait, "sentinel pending");
    assert!(!cpu.ief1());
    run(&mut cpu, &mut bus, 1);
    assert!(cpu.ief1(), "sentinel drains into the flip-flops");
    assert!(cpu.ief2());
}

#[test]
fn exec_breakpoints_trap_before_the_byte_is_consumed() {
    let (mut cpu, mut bus) = setup(0x100, &[0x00, 0x00, 0x00]);
    bus.debug.insert(0x101, DBG_EXEC_BREAKPOINT);
    run(&mut cpu, &mut bus, 3);
    assert_eq!(
        bus.debug_hits,
        vec![(DebugReason::ExecBreakpoint, 0x101)],
        "one trap, at the armed address"
    );
    assert_eq!(cpu.pc(), 0x103, "execution continues after the debugger returns");
}

#[test]
fn debug_step_returns_after_a_single_instruction() {
    let (mut cpu, mut bus) = setup(0x100, &[0x00, 0x00, 0x00]);
    bus.events = EVENT_DEBUG_STEP;
    run(&mut cpu, &mut bus, 10);
    assert_eq!(cpu.pc(), 0x101, "exactly one instruction retired");
    assert_eq!(cpu.cycle_count_delta(), 0, "budget flushed for the debugger");
}

#[test]
fn exiting_stops_the_driver_between_instructions() {
    let (mut cpu, mut bus) = setup(0x100, &[0x00, 0x00, 0x00]);
    bus.exiting = true;
    run(&mut cpu, &mut bus, 10);
    assert_eq!(cpu.pc(), 0x100, "no instruction runs once exiting is raised");
    assert_eq!(cpu.cycle_count_delta(), -10);
}
