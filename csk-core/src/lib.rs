// csk-core/src/lib.rs

pub mod action;
pub mod lifecycle;
pub mod privilege;

pub use action::{execute, ActionOutcome, ActionResult, ExecutionContext};
pub use lifecycle::{ActionRecord, Lifecycle, PhaseFailure, PhaseOutcome, PhaseReport};
pub use privilege::{
    default_elevator, DeniedElevator, ElevatedHandle, PrivilegeElevator, RootElevator,
    SudoElevator,
};
