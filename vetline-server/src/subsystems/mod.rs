pub mod gateway;
pub mod notifier;
pub mod sweeper;
pub mod triage;
