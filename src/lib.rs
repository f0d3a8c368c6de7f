pub mod bus;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod http;
pub mod message;
pub mod retry;
pub mod store;
pub mod user;
