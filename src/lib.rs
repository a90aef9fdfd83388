pub mod api;
pub mod auth;
pub mod build;
pub mod config;
pub mod errors;
pub mod extract;
pub mod fileset;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod publish;
pub mod server;
pub mod storage;
pub mod store;
pub mod validate;
