pub mod edge;
pub mod gateway;
pub mod types;
pub mod web;
