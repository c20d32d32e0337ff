pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_mapper;
pub mod google_calendar_client;
pub mod logging;
pub mod memory_store;
pub mod persistence;
pub mod sqlite_store;
pub mod storage;
