pub mod config;
pub mod github;
pub mod humanize;
pub mod lockfile;
pub mod observability;
pub mod package;
pub mod queue;
pub mod store;
pub mod worker;
