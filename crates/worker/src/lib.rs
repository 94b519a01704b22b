//! A process that takes a named lock through the ledger, holds it for a
//! while and gives it back.

pub mod config;
pub mod runner;
