pub mod generate_secret;
pub mod routes;
pub mod start;
pub mod status;
