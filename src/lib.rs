//! Library crate for score-sync, exposing modules for binaries and integration tests.

pub mod clock;
pub mod config;
pub mod dao;
pub mod domain;
pub mod dto;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
