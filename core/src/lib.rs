//! Moodleware Core Library
//! Parameter encoding, sessions, one-time file tokens and the proxy server

pub mod config;
pub mod error;
pub mod one_time;
pub mod params;
pub mod proxy;
pub mod session;
