//! Core library for the scope-daq acquisition session.
//!
//! The session drives a triggered oscilloscope through repeated runs. Each
//! run captures events (one trigger across all configured channels), appends
//! them one at a time to a per-run container file and keeps an external run
//! ledger in step with the run lifecycle.
//!
//! Module map, leaves first:
//!
//! - [`instrument`]: oscilloscope trait, LeCroy VICP driver, mock scope
//! - [`capture`]: one event from one trigger
//! - [`storage`]: incremental run containers
//! - [`ledger`]: run history table
//! - [`controller`]: the run lifecycle state machine
//! - [`session`]: the interactive operator loop

pub mod archive;
pub mod beam;
pub mod capture;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod instrument;
pub mod interrupt;
pub mod ledger;
pub mod operator;
pub mod run;
pub mod session;
pub mod storage;
