pub mod artifact;

pub use artifact::{ArtifactStore, FileArtifactStore};
