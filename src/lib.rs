//! Gmail triage: classify incoming mail with a language model, label it,
//! and rewrite the classification prompt from user corrections.

pub mod adaptation;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod gmail;
pub mod labeler;
pub mod llm;
pub mod mailbox;
pub mod models;
pub mod prompt;
pub mod retriever;
pub mod scheduler;
pub mod service;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
