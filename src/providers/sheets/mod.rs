//! Monthly client financials kept in a Google spreadsheet.

pub mod adapter;
pub mod client;

pub use adapter::{SheetsFinancialsAdapter, PROVIDER};
pub use client::{SheetsApi, SheetsClient, SheetsSettings};
