//! fdbudget - File-descriptor capacity negotiation for high-throughput proxies
//!
//! Sizes connection, pipe and socket budgets from the descriptor limits the
//! process was started with, and negotiates higher limits with the OS.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod limits;
pub mod startup;

pub use error::{FdBudgetError, LimitError, Result, Stage};
