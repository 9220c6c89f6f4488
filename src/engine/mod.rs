//! Core engine: the transaction sequencer and the tasks that drive it.

pub mod sequencer;
pub mod monitor;
pub mod creator;
