//! Worker Sim — a pool of simulated worker tasks with pause, stop and rendezvous control.

pub mod config;
pub mod console;
pub mod error;
pub mod worker;
