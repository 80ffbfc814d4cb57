//! Canvass: survey collection service
//!
//! A single-binary web service for running conditional surveys at events:
//! an anonymous submission pipeline with branching flow logic, a contact
//! capture path kept structurally unlinkable from responses, and a
//! cookie-session plus bearer-token admin surface.

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod contact;
pub mod context;
pub mod db;
pub mod error;
pub mod rate_limit;
pub mod server;
pub mod submission;
pub mod survey;
