// src/ingest/providers/mod.rs
pub mod mock;
pub mod youtube;

pub use mock::MockSource;
pub use youtube::YouTubeSource;
