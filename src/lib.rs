#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod ws;

use crate::error::Error;

pub use secrecy::SecretString;
pub use ws::{
    ConnectOptions, ConnectionManager, ConnectionState, Handlers, Message, Payload, SocketState,
};

pub type Result<T> = std::result::Result<T, Error>;
