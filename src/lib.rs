pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod profile;
pub mod storage;

pub use credential::{CredentialIssuer, JwtIssuer};
pub use engine::{FaceAuth, VerificationOutcome};
pub use error::{ErrorKind, FaceIdError, FaceIdResult};
pub use extractor::{FaceRegion, FaceSelection, FeatureExtractor};
pub use matcher::{euclidean_distance, MatchPolicy, DEFAULT_THRESHOLD};
pub use profile::{JsonProfileStore, NoProfiles, Profile, ProfileStore};
pub use storage::{FileIdentityStore, IdentityRecord, IdentityStore, MemoryIdentityStore};

// Re-export vision types for convenience
pub use faceid_vision::{DetectorParams, ModelPaths, Pipeline};
