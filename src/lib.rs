pub mod config;
pub mod models;
pub mod utils;
pub mod es;
pub mod search;
pub mod sync;
