// src/core/mod.rs

//! Scan engine: fetch, analyze, dedup and scheduling.

pub mod analyzer;
pub mod browser;
pub mod fetcher;
pub mod ledger;
pub mod models;
pub mod pipeline;
