pub mod bus;
pub mod config;
pub mod dispatch;
pub mod messages;
pub mod motor;
pub mod runtime;
