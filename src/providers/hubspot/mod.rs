//! HubSpot CRM companies.

pub mod adapter;
pub mod client;

pub use adapter::{HubSpotCompaniesAdapter, PROVIDER};
pub use client::{HubSpotApi, HubSpotClient, HubSpotSettings};
