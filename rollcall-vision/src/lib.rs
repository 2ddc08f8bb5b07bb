pub mod extractor;
pub mod face;
pub mod model;
pub mod video;
pub mod yunet;

// Re-export commonly used types
pub use extractor::Extractor;
pub use face::{Detection, Embedding, EMBEDDING_DIM};
pub use model::ModelPaths;
pub use video::Camera;
