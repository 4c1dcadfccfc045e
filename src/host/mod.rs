//! Host-facing contract and stdio bridge for native shell integration.

pub mod channel;
pub mod contract;
pub mod stdio;
