//! SQLite storage for the Mirage control server.
//!
//! Provides persistence for organizations, users, pre-auth keys, machines,
//! routes, and Navi nodes.

mod db;
mod models;
mod queries;
mod queries_machines;
mod queries_navi;
mod queries_routes;


pub use db::{ControlDatabase, DatabaseError};
pub use models::*;
pub use queries_machines::NewMachine;
