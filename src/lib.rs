pub mod bridge;
pub mod bus;
pub mod config;
pub mod heatpump;
pub mod link;
pub mod peer;
pub mod protocol;
pub mod reconciler;
pub mod server;
pub mod uplink;
pub mod web;
