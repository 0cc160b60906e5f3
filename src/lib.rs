pub mod artifact;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generate;
pub mod publish;
pub mod response;
pub mod server;
pub mod tools;
