//! Remote object-store access.
//!
//! Provides the shared HTTP request executor, the per-repository token
//! lifecycle, the [`Repository`](repository::Repository) capability trait and
//! its two implementations.

pub mod archive;
pub mod auth;
pub mod client;
pub mod repository;
pub mod swift;
pub mod types;

#[cfg(test)]
pub mod testing;
