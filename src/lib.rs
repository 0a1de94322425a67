// src/lib.rs

//! OTP and phone-verification endpoint discovery scanner.
//!
//! A bounded queue of candidate URLs is drained by a worker pool. Each URL
//! is claimed in a SQLite dedup ledger, fetched over plain HTTP, scored by
//! keyword and form-structure heuristics, escalated to a browser render
//! when the cheap pass is inconclusive, and recorded with its terminal
//! outcome.

pub mod config;
pub mod core;
pub mod logging;
