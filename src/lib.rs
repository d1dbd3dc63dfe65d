pub mod config;
pub mod error;
pub mod fleet;
pub mod gateway;
pub mod notify;
pub mod rest;
pub mod summary;
pub mod token;
