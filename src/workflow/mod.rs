// Fixed state sequences per command, observed through events.

pub mod controller;
pub mod event;
pub mod state;
pub mod states;

pub use controller::{ControllerStatus, StateController};
pub use event::{Event, LoggingObserver, MetricsObserver, Observer, StateMetrics};
pub use state::{CreatedAccount, Progress, RunContext, State, StateHandle, StateStatus};
pub use states::{
    AccountCreationState, CleanUpState, Command, InitState, NetworkPrepState, StartState,
    StateKind, StopState,
};
