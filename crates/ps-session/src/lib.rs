//! Process-lifetime session state: persisted settings, the write-once
//! relay configuration, and the load-state machine with its visual
//! feedback cycle.

pub mod settings;
pub mod state;

pub use settings::DEFAULT_RELAY_ENDPOINT;
pub use settings::RelayConfig;
pub use settings::SettingsStore;
pub use state::BorderSignal;
pub use state::LoadState;
pub use state::LoadStateMachine;
pub use state::SignalCycle;
