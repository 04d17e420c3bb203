// ABOUTME: Library crate for wall-live exposing the live connection API for testing and external use

#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod live;
pub mod models;
