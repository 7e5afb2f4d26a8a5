pub mod agent;
pub mod backup;
pub mod bootstrap;
pub mod config;
pub mod console;
pub mod cooldown;
pub mod humanize;
pub mod net;
pub mod observability;
pub mod server_process;
pub mod store;
pub mod tasks;
pub mod updater;
