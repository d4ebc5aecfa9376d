//! Deploy Orchestrator Library
//!
//! Dependency-ordered execution of deployment projects: entity store,
//! resolver, step executor, orchestrator, templates, analytics and advisor.
//! The HTTP server binary is in `src/main.rs`.

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod services;
/// Application state management
///
/// Entity types, JSON persistence and the application context.
pub mod state;
pub mod websocket;
