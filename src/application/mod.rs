pub mod bootstrap;
pub mod calendar_preferences;
pub mod calendar_sync;
pub mod commands;
pub mod conversion;
pub mod drift_detection;
pub mod inbound_sync;
pub mod outbound_push;

#[cfg(test)]
pub(crate) mod test_support;
