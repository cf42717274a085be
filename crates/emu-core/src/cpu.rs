//! CPU core trait.

use crate::Bus;

/// A budget-driven CPU core.
///
/// The host sets a negative cycle budget on the core and calls
/// [`Cpu::execute`]; the core retires whole instructions against the budget
/// and returns when it is exhausted, when the bus reports an exit or
/// single-step condition, or when a HALT drains the remainder.
pub trait Cpu {
    /// The type used for register inspection.
    type Registers;

    /// Current program counter.
    fn pc(&self) -> u32;

    /// Snapshot of all registers for inspection.
    fn registers(&self) -> Self::Registers;

    /// True if the CPU is halted awaiting an interrupt.
    fn is_halted(&self) -> bool;

    /// Reset the CPU and re-establish its fetch state through the bus.
    fn reset<B: Bus>(&mut self, bus: &mut B);

    /// Run instructions until the budget is exhausted or an exit condition
    /// triggers.
    fn execute<B: Bus>(&mut self, bus: &mut B);
}
