pub mod analysis;
pub mod error;
pub mod lot;
pub mod movement;
pub mod recall;
pub mod request;
pub mod reversal;
pub mod service;
pub mod store;
pub mod trace;
pub mod units;
pub mod utils;
pub mod verdict;
