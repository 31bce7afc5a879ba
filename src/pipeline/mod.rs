//! The relay pipeline.
//!
//! Every cycle flows through:
//! 1. `InboxPoller::poll()`: fetch unread messages, newest first
//! 2. `rules::is_pointless()`: drop auto-replies and bulk mail
//! 3. `Relayer::relay()`: POST the message to the incident API
//! 4. One bulk mark-read for everything iterated, relayed or not
//!
//! `Scheduler` repeats the cycle on a fixed interval.

pub mod poller;
pub mod relayer;
pub mod rules;
pub mod scheduler;

pub use poller::InboxPoller;
pub use relayer::{RelayOutcome, Relayer};
pub use scheduler::{CycleReport, Scheduler};
