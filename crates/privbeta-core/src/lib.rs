//! Core library for `privbeta`.
//!
//! Contains the domain models (users, invitation codes, invitations,
//! sessions), the repository trait with its in-memory and PostgreSQL
//! backends, the per-request private beta gate, the invitation lifecycle,
//! signed cookie values, and the invite email. This crate knows nothing
//! about HTTP; the server crate adapts it to axum.

pub mod error;
pub mod gate;
pub mod invitation;
pub mod mail;
pub mod models;
pub mod password;
pub mod repository;
pub mod signing;
