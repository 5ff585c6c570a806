//! Harvest time tracking.

pub mod adapter;
pub mod client;

pub use adapter::{HarvestTimeEntriesAdapter, HarvestUsersAdapter, PROVIDER};
pub use client::{HarvestApi, HarvestClient, HarvestSettings};
