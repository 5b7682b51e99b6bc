use serde::Serialize;
use thiserror::Error;

/// Machine-readable error category reported alongside every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    NoFaceDetected,
    IdentityNotFound,
    EmbeddingDimensionMismatch,
    IssuerFailure,
    StoreFailure,
    ExtractorFailure,
}

impl ErrorKind {
    /// Whether resubmitting with different input can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput | Self::NoFaceDetected | Self::IdentityNotFound
        )
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput | Self::NoFaceDetected => 400,
            Self::IdentityNotFound => 404,
            Self::EmbeddingDimensionMismatch
            | Self::IssuerFailure
            | Self::StoreFailure
            | Self::ExtractorFailure => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum FaceIdError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no face detected in submitted image")]
    NoFaceDetected,

    #[error("identity {identity} is not enrolled")]
    IdentityNotFound { identity: String },

    #[error("embedding length mismatch (stored {stored}, probe {probe}); feature extractor changed since enrollment")]
    EmbeddingDimensionMismatch { stored: usize, probe: usize },

    #[error("credential issuer failed: {0:#}")]
    IssuerFailure(anyhow::Error),

    #[error("identity store failed: {0:#}")]
    StoreFailure(anyhow::Error),

    #[error("feature extractor failed: {0:#}")]
    ExtractorFailure(anyhow::Error),
}

impl FaceIdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NoFaceDetected => ErrorKind::NoFaceDetected,
            Self::IdentityNotFound { .. } => ErrorKind::IdentityNotFound,
            Self::EmbeddingDimensionMismatch { .. } => ErrorKind::EmbeddingDimensionMismatch,
            Self::IssuerFailure(_) => ErrorKind::IssuerFailure,
            Self::StoreFailure(_) => ErrorKind::StoreFailure,
            Self::ExtractorFailure(_) => ErrorKind::ExtractorFailure,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// JSON body for the failure, shaped `{"error": {"kind", "message"}}`.
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

pub type FaceIdResult<T> = Result<T, FaceIdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(FaceIdError::InvalidInput("x".into()).http_status(), 400);
        assert_eq!(FaceIdError::NoFaceDetected.http_status(), 400);
        assert_eq!(
            FaceIdError::IdentityNotFound {
                identity: "a@x.com".into()
            }
            .http_status(),
            404
        );
        assert_eq!(
            FaceIdError::EmbeddingDimensionMismatch {
                stored: 128,
                probe: 512
            }
            .http_status(),
            500
        );
        assert_eq!(
            FaceIdError::IssuerFailure(anyhow::anyhow!("signing key")).http_status(),
            500
        );
    }

    #[test]
    fn body_carries_kind_and_message() {
        let err = FaceIdError::IdentityNotFound {
            identity: "a@x.com".into(),
        };
        let body = err.to_body();
        assert_eq!(body["error"]["kind"], "IdentityNotFound");
        assert_eq!(body["error"]["message"], "identity a@x.com is not enrolled");
    }

    #[test]
    fn collaborator_failures_are_not_recoverable() {
        assert!(ErrorKind::NoFaceDetected.is_recoverable());
        assert!(!ErrorKind::EmbeddingDimensionMismatch.is_recoverable());
        assert!(!ErrorKind::StoreFailure.is_recoverable());
    }
}
