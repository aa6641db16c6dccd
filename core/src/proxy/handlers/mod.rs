// Handlers module - HTTP request handlers

pub mod auth;
pub mod endpoints;
pub mod files;
pub mod office;
