pub mod config;
pub mod console;
pub mod page;
pub mod routes;
pub mod store;
pub mod templates;
