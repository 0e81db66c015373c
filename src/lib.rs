//! Vellum - a server-side view engine.
//!
//! Templates are compiled into cached view programs ([`view`]) that build
//! and refresh a live component tree ([`tree`]); requests move through a
//! phased lifecycle ([`lifecycle`]) that restores, processes and renders
//! that tree.

pub mod logger;

pub mod cli;
pub mod config;
pub mod core;
pub mod lifecycle;
pub mod resource;
pub mod tree;
pub mod utils;
pub mod view;
