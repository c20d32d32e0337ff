pub mod civil_time;
pub mod models;
pub mod sync_result;
