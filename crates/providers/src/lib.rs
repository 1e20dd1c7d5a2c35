//! Completion endpoint clients for the overlay agent.
//!
//! All providers implement the `overlay_core::Provider` trait. The agent
//! talks to a locally hosted model server through [`OllamaProvider`].

pub mod ollama;

pub use ollama::OllamaProvider;
