//! # Docvault Core
//!
//! Shared, I/O-free logic for docvault: data models, chunking, similarity
//! ranking, the classification access policy, the store abstraction, and
//! the query pipeline.
//!
//! This crate contains no tokio, sqlx, HTTP, or other native-only
//! dependencies. Collaborators that do perform I/O (chunk stores,
//! embedding providers, answer synthesizers, audit sinks, role resolvers)
//! are expressed as traits and implemented by the application crate.

pub mod audit;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod rank;
pub mod store;

pub use error::{Error, Result};
