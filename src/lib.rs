pub mod banner;
pub mod broker;
pub mod collect;
pub mod config;
pub mod consts;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod request;
pub mod scratch;
pub mod server;
