pub mod config;
pub mod database;
pub mod models;
pub mod store;
pub mod upstream;
pub mod notify;
pub mod scheduler;
pub mod coordinator;
pub mod routes;
