pub mod blast;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod extract;
pub mod http;
pub mod output;
pub mod reader;
pub mod resolver;
pub mod scoring;
pub mod store;
pub mod taxonomy;
pub mod worker;
