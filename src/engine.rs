//! Enrollment and verification over injected collaborators.
//!
//! [`FaceAuth`] owns no state beyond its collaborators and policy. Build one
//! per worker (ONNX sessions need exclusive access); stores and issuers can be
//! shared by reference.

use image::DynamicImage;
use log::{debug, info, warn};
use serde::Serialize;

use crate::credential::CredentialIssuer;
use crate::error::{FaceIdError, FaceIdResult};
use crate::extractor::{FaceSelection, FeatureExtractor};
use crate::matcher::{euclidean_distance, MatchPolicy};
use crate::profile::{Profile, ProfileStore};
use crate::storage::{IdentityRecord, IdentityStore};

pub const REJECT_REASON: &str = "face does not match";

/// Result of one verification. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationOutcome {
    pub accepted: bool,
    pub distance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl VerificationOutcome {
    fn rejected(distance: f32) -> Self {
        Self {
            accepted: false,
            distance,
            reason: Some(REJECT_REASON.to_string()),
            profile: None,
            credential: None,
        }
    }

    /// 200 on accept, 401 on a rejected match.
    pub fn http_status(&self) -> u16 {
        if self.accepted {
            200
        } else {
            401
        }
    }
}

pub struct FaceAuth<E, S, P, C> {
    extractor: E,
    identities: S,
    profiles: P,
    issuer: C,
    policy: MatchPolicy,
    selection: FaceSelection,
}

impl<E, S, P, C> FaceAuth<E, S, P, C>
where
    E: FeatureExtractor,
    S: IdentityStore,
    P: ProfileStore,
    C: CredentialIssuer,
{
    pub fn new(extractor: E, identities: S, profiles: P, issuer: C, policy: MatchPolicy) -> Self {
        Self {
            extractor,
            identities,
            profiles,
            issuer,
            policy,
            selection: FaceSelection::default(),
        }
    }

    pub fn with_face_selection(mut self, selection: FaceSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn identities(&self) -> &S {
        &self.identities
    }

    /// Bind `identity` to the face in `image`, replacing any earlier binding.
    pub fn enroll(&mut self, identity: &str, image: &[u8]) -> FaceIdResult<IdentityRecord> {
        let identity = validate_identity(identity)?;
        let embedding = self.embed(image)?;

        let record = IdentityRecord {
            identity: identity.to_string(),
            embedding,
        };
        self.identities
            .put(&record)
            .map_err(FaceIdError::StoreFailure)?;

        info!(
            "enrolled {} ({}-d embedding)",
            record.identity,
            record.embedding.len()
        );
        Ok(record)
    }

    /// Compare the face in `image` with the one enrolled for `identity`.
    ///
    /// A non-matching face is `Ok` with `accepted == false`; only input and
    /// collaborator problems are errors.
    pub fn verify(&mut self, identity: &str, image: &[u8]) -> FaceIdResult<VerificationOutcome> {
        let identity = validate_identity(identity)?;
        let probe = self.embed(image)?;

        let stored = self
            .identities
            .get(identity)
            .map_err(FaceIdError::StoreFailure)?
            .ok_or_else(|| FaceIdError::IdentityNotFound {
                identity: identity.to_string(),
            })?;

        let distance = euclidean_distance(&stored.embedding, &probe)?;
        if !self.policy.accepts(distance) {
            info!(
                "rejected {identity}: distance {distance:.4} (threshold {:.4})",
                self.policy.threshold()
            );
            return Ok(VerificationOutcome::rejected(distance));
        }

        let profile = match self.profiles.find_by_identity(identity) {
            Ok(found) => found.unwrap_or_default(),
            Err(err) => {
                warn!("profile lookup for {identity} failed, continuing without it: {err:#}");
                Profile::new()
            }
        };
        let credential = self
            .issuer
            .issue(identity)
            .map_err(FaceIdError::IssuerFailure)?;

        info!(
            "accepted {identity}: distance {distance:.4} (threshold {:.4})",
            self.policy.threshold()
        );
        Ok(VerificationOutcome {
            accepted: true,
            distance,
            reason: None,
            profile: Some(profile),
            credential: Some(credential),
        })
    }

    /// Drop the enrolled record for `identity`. Returns whether one existed.
    pub fn purge(&self, identity: &str) -> FaceIdResult<bool> {
        let identity = validate_identity(identity)?;
        let removed = self
            .identities
            .remove(identity)
            .map_err(FaceIdError::StoreFailure)?;
        info!("purge {identity}: {}", if removed { "removed" } else { "nothing enrolled" });
        Ok(removed)
    }

    fn embed(&mut self, image: &[u8]) -> FaceIdResult<Vec<f32>> {
        let pixels = decode_image(image)?;

        let regions = self
            .extractor
            .detect_faces(&pixels)
            .map_err(FaceIdError::ExtractorFailure)?;
        let region = self
            .selection
            .select(&regions)
            .ok_or(FaceIdError::NoFaceDetected)?;
        debug!(
            "{} face(s) detected, using {:?} (score {:.3})",
            regions.len(),
            region.bbox,
            region.score
        );

        let embedding = self
            .extractor
            .extract_embedding(&pixels, region)
            .map_err(FaceIdError::ExtractorFailure)?;
        if embedding.is_empty() {
            return Err(FaceIdError::ExtractorFailure(anyhow::anyhow!(
                "extractor returned an empty embedding"
            )));
        }
        Ok(embedding)
    }
}

fn validate_identity(identity: &str) -> FaceIdResult<&str> {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        return Err(FaceIdError::InvalidInput("identity is required".into()));
    }
    Ok(trimmed)
}

fn decode_image(image: &[u8]) -> FaceIdResult<DynamicImage> {
    if image.is_empty() {
        return Err(FaceIdError::InvalidInput("image is required".into()));
    }
    image::load_from_memory(image)
        .map_err(|err| FaceIdError::InvalidInput(format!("image is unreadable: {err}")))
}
