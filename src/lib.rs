pub mod config;
pub mod detect;
pub mod explain;
pub mod intent;
pub mod output;
pub mod records;
