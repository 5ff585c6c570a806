//! Agency operations sync core.
//!
//! Pulls records from SaaS providers (time tracking, CRM, spreadsheets) into
//! one SQLite store, tracks each run as a job with live progress, and
//! reconciles clients and staff that arrive under different names.

pub mod audit;
pub mod crypto;
pub mod db;
pub mod entity;
pub mod error;
pub mod integrations;
pub mod matcher;
mod migrations;
pub mod providers;
pub mod ratelimit;
pub mod resolver;
pub mod services;
pub mod state;
pub mod sync;
pub mod types;
