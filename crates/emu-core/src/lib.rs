//! Core traits and types for instruction-accurate emulation.
//!
//! A CPU core owns its architectural state and nothing else. Memory, ports,
//! the interrupt controller and the debugger are collaborators reached
//! through the [`Bus`] trait; the host drives the core through the [`Cpu`]
//! trait by handing it a cycle budget.

mod bus;
mod cpu;
mod observable;
mod ticks;

pub use bus::{
    Bus, DebugReason, SimpleBus, DBG_EXEC_BREAKPOINT, DBG_STEP_OVER_BREAKPOINT, EVENT_DEBUG_STEP,
    EVENT_DEBUG_STEP_OVER, EVENT_RESET, EVENT_WAITING,
};
pub use cpu::Cpu;
pub use observable::{Observable, Value};
pub use ticks::Ticks;
