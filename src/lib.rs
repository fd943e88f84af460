pub mod campaign;
pub mod cli;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod drip;
pub mod events;
pub mod logging;
pub mod scheduler;
pub mod transport;
pub mod warmup;
