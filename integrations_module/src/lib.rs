pub mod account_store;
pub mod account_sync;
pub mod connector;
pub mod identity;
pub mod service;
pub mod triggers;
pub mod webhook;
