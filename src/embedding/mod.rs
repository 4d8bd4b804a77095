pub mod cache;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use cache::{EmbeddingCache, EmbeddingEntry};
pub use provider::{create_provider, EmbeddingProvider};
