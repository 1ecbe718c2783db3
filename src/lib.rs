pub mod cli;
pub mod config;
pub mod state;
pub mod tracker;
pub mod util;
pub mod worker;
