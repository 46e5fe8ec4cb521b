//! Public facade crate for `diligenix`.
//!
//! Contains no logic of its own. The pipeline, types and traits come from
//! `diligenix-core`; the HTTP-backed collaborators live under [`local`].

pub use diligenix_core::*;

/// reqwest-backed language model, search and extraction collaborators.
pub use diligenix_local as local;
