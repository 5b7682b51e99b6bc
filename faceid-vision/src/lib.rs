pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use face::FaceRegion;
pub use model::ModelPaths;
pub use pipeline::{DetectorParams, Pipeline};
