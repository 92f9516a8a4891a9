pub mod api;
pub mod app;
pub mod config;
pub mod connector;
pub mod fetch;
pub mod humanize;
pub mod library;
pub mod metadata;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
pub mod worker;

#[cfg(test)]
pub mod test_support;
