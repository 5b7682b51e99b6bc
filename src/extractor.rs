use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub use faceid_vision::FaceRegion;

/// Face detection and embedding extraction over decoded pixels.
///
/// Implementations must be deterministic for a fixed model version: the same
/// pixels and region always yield the same vector.
pub trait FeatureExtractor {
    /// Every face found in `image`, possibly none.
    fn detect_faces(&mut self, image: &DynamicImage) -> Result<Vec<FaceRegion>>;

    /// Fixed-length feature vector for one detected region.
    fn extract_embedding(&mut self, image: &DynamicImage, region: &FaceRegion) -> Result<Vec<f32>>;
}

impl FeatureExtractor for faceid_vision::Pipeline {
    fn detect_faces(&mut self, image: &DynamicImage) -> Result<Vec<FaceRegion>> {
        self.detect(image)
    }

    fn extract_embedding(&mut self, image: &DynamicImage, region: &FaceRegion) -> Result<Vec<f32>> {
        self.embed(image, region)
    }
}

impl<E: FeatureExtractor + ?Sized> FeatureExtractor for &mut E {
    fn detect_faces(&mut self, image: &DynamicImage) -> Result<Vec<FaceRegion>> {
        (**self).detect_faces(image)
    }

    fn extract_embedding(&mut self, image: &DynamicImage, region: &FaceRegion) -> Result<Vec<f32>> {
        (**self).extract_embedding(image, region)
    }
}

/// Which region to use when a photo contains several faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelection {
    /// Largest bounding box.
    #[default]
    Largest,
    /// Highest detector confidence.
    HighestScore,
    /// Whatever the detector returned first.
    First,
}

impl FaceSelection {
    /// Ties go to the region the detector listed earliest.
    pub fn select<'a>(&self, regions: &'a [FaceRegion]) -> Option<&'a FaceRegion> {
        let key: fn(&FaceRegion) -> f32 = match self {
            Self::First => return regions.first(),
            Self::Largest => FaceRegion::area,
            Self::HighestScore => |r| r.score,
        };

        regions.iter().fold(None, |best, region| match best {
            Some(current) if key(current) >= key(region) => Some(current),
            _ => Some(region),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(w: f32, h: f32, score: f32) -> FaceRegion {
        FaceRegion {
            bbox: [0.0, 0.0, w, h],
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn largest_picks_biggest_box() {
        let faces = [region(10.0, 10.0, 0.99), region(40.0, 50.0, 0.7), region(20.0, 20.0, 0.8)];
        let picked = FaceSelection::Largest.select(&faces).unwrap();
        assert_eq!(picked, &faces[1]);
    }

    #[test]
    fn highest_score_picks_most_confident() {
        let faces = [region(10.0, 10.0, 0.7), region(40.0, 50.0, 0.65), region(20.0, 20.0, 0.95)];
        let picked = FaceSelection::HighestScore.select(&faces).unwrap();
        assert_eq!(picked, &faces[2]);
    }

    #[test]
    fn ties_resolve_to_earliest() {
        let faces = [region(30.0, 30.0, 0.8), region(30.0, 30.0, 0.8)];
        assert!(std::ptr::eq(
            FaceSelection::Largest.select(&faces).unwrap(),
            &faces[0]
        ));
        assert!(std::ptr::eq(
            FaceSelection::HighestScore.select(&faces).unwrap(),
            &faces[0]
        ));
    }

    #[test]
    fn first_keeps_detector_order() {
        let faces = [region(10.0, 10.0, 0.6), region(90.0, 90.0, 0.99)];
        assert_eq!(FaceSelection::First.select(&faces).unwrap(), &faces[0]);
    }

    #[test]
    fn no_regions_selects_nothing() {
        for policy in [FaceSelection::Largest, FaceSelection::HighestScore, FaceSelection::First] {
            assert!(policy.select(&[]).is_none());
        }
    }

    #[test]
    fn parses_from_config_names() {
        let parsed: FaceSelection = serde_json::from_str("\"highest_score\"").unwrap();
        assert_eq!(parsed, FaceSelection::HighestScore);
    }
}
