use crate::yunet::{self, RawDetection};
use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Tensor};

/// YuNet runs on a fixed square canvas.
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input edge.
pub const ENCODER_INPUT: u32 = 112;

// ArcFace reference eye centres for a 112x112 crop.
const REFERENCE_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REFERENCE_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// A detected face in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegion {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // right eye, left eye, nose, mouth corners (x, y pairs)
}

impl FaceRegion {
    pub fn area(&self) -> f32 {
        self.bbox[2].max(0.0) * self.bbox[3].max(0.0)
    }
}

/// Aspect-preserving placement of a source image on the detector canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn fit(src_width: u32, src_height: u32, size: u32) -> Self {
        let scale = size as f32 / src_width.max(src_height) as f32;
        let width = ((src_width as f32 * scale) as u32).clamp(1, size);
        let height = ((src_height as f32 * scale) as u32).clamp(1, size);
        Self {
            size,
            scale,
            width,
            height,
            offset_x: (size - width) / 2,
            offset_y: (size - height) / 2,
        }
    }

    pub fn apply(&self, img: &DynamicImage) -> RgbImage {
        let resized = img.resize_exact(self.width, self.height, FilterType::Triangle);
        let mut canvas = DynamicImage::new_rgb8(self.size, self.size);
        image::imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas.to_rgb8()
    }

    fn unmap_x(&self, x: f32) -> f32 {
        (x - self.offset_x as f32) / self.scale
    }

    fn unmap_y(&self, y: f32) -> f32 {
        (y - self.offset_y as f32) / self.scale
    }

    /// Maps a canvas-space detection back onto the source image.
    pub fn unmap(&self, raw: &RawDetection) -> FaceRegion {
        let mut landmarks = [0.0f32; 10];
        for point in 0..5 {
            landmarks[point * 2] = self.unmap_x(raw.landmarks[point * 2]);
            landmarks[point * 2 + 1] = self.unmap_y(raw.landmarks[point * 2 + 1]);
        }
        FaceRegion {
            bbox: [
                self.unmap_x(raw.bbox[0]),
                self.unmap_y(raw.bbox[1]),
                raw.bbox[2] / self.scale,
                raw.bbox[3] / self.scale,
            ],
            score: raw.score,
            landmarks,
        }
    }
}

/// Lays out an RGB image as planar BGR floats in `[0, 255]`, the layout both models take.
fn planar_bgr(rgb: &RgbImage) -> Vec<f32> {
    let plane = (rgb.width() * rgb.height()) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, px) in rgb.pixels().enumerate() {
        data[i] = px[2] as f32;
        data[plane + i] = px[1] as f32;
        data[2 * plane + i] = px[0] as f32;
    }
    data
}

fn input_tensor(rgb: &RgbImage) -> Result<Tensor<f32>> {
    let shape = (1, 3, rgb.height() as usize, rgb.width() as usize);
    let array = Array4::from_shape_vec(shape, planar_bgr(rgb))?;
    Ok(Tensor::from_array(array)?)
}

/// Detect faces with YuNet. Regions are in source pixels; after NMS they are ordered best score first.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<FaceRegion>> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        bail!("image has no pixels");
    }

    let letterbox = Letterbox::fit(width, height, DETECTOR_INPUT);
    let input = input_tensor(&letterbox.apply(img))?;
    let outputs = session.run(ort::inputs![input])?;

    let mut heads = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        heads.push(yunet::Head {
            shape: shape.iter().copied().collect(),
            data: data.to_vec(),
        });
    }

    let regions: Vec<FaceRegion> =
        yunet::decode(&heads, DETECTOR_INPUT as usize, score_threshold)?
            .iter()
            .map(|raw| letterbox.unmap(raw))
            .collect();

    if nms_threshold < 1.0 {
        Ok(nms(regions, nms_threshold))
    } else {
        Ok(regions)
    }
}

/// Greedy non-maximum suppression; the survivors are ordered by descending score.
pub fn nms(mut regions: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    regions.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<FaceRegion> = Vec::with_capacity(regions.len());
    for candidate in regions {
        if keep
            .iter()
            .all(|kept| iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let left = a[0].max(b[0]);
    let top = a[1].max(b[1]);
    let right = (a[0] + a[2]).min(b[0] + b[2]);
    let bottom = (a[1] + a[3]).min(b[1] + b[3]);
    if right <= left || bottom <= top {
        return 0.0;
    }

    let inter = (right - left) * (bottom - top);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

fn bilinear(src: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = src.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let corners = [
        (src.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (src.get_pixel(x1, y0), fx * (1.0 - fy)),
        (src.get_pixel(x0, y1), (1.0 - fx) * fy),
        (src.get_pixel(x1, y1), fx * fy),
    ];
    let mut out = [0u8; 3];
    for (channel, value) in out.iter_mut().enumerate() {
        let sum: f32 = corners
            .iter()
            .map(|(px, weight)| px[channel] as f32 * weight)
            .sum();
        *value = sum.round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Rotate, scale and crop so the eyes land on the ArcFace reference positions.
pub fn align_face(img: &DynamicImage, region: &FaceRegion, size: u32) -> Result<DynamicImage> {
    let src = img.to_rgb8();
    if src.width() == 0 || src.height() == 0 {
        bail!("image has no pixels");
    }

    // YuNet reports the subject's right eye first, which sits on the image left.
    let left_eye = (region.landmarks[0], region.landmarks[1]);
    let right_eye = (region.landmarks[2], region.landmarks[3]);
    let (dx, dy) = (right_eye.0 - left_eye.0, right_eye.1 - left_eye.1);
    let eye_dist = dx.hypot(dy);
    if !eye_dist.is_finite() || eye_dist < 1e-3 {
        bail!("degenerate eye landmarks");
    }

    let unit = size as f32 / ENCODER_INPUT as f32;
    let ref_dx = (REFERENCE_RIGHT_EYE.0 - REFERENCE_LEFT_EYE.0) * unit;
    let ref_dy = (REFERENCE_RIGHT_EYE.1 - REFERENCE_LEFT_EYE.1) * unit;
    let scale = ref_dx.hypot(ref_dy) / eye_dist;
    let rotation = ref_dy.atan2(ref_dx) - dy.atan2(dx);
    let (sin, cos) = rotation.sin_cos();

    let src_center = ((left_eye.0 + right_eye.0) / 2.0, (left_eye.1 + right_eye.1) / 2.0);
    let dst_center = (
        (REFERENCE_LEFT_EYE.0 + REFERENCE_RIGHT_EYE.0) / 2.0 * unit,
        (REFERENCE_LEFT_EYE.1 + REFERENCE_RIGHT_EYE.1) / 2.0 * unit,
    );

    let mut output = RgbImage::new(size, size);
    for (x, y, px) in output.enumerate_pixels_mut() {
        let ox = x as f32 - dst_center.0;
        let oy = y as f32 - dst_center.1;
        let sx = (cos * ox + sin * oy) / scale + src_center.0;
        let sy = (-sin * ox + cos * oy) / scale + src_center.1;
        if let Some(rgb) = bilinear(&src, sx, sy) {
            *px = rgb;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Encode an aligned crop with SFace into an L2-normalised embedding.
pub fn encode_face(session: &mut Session, face: &DynamicImage) -> Result<Vec<f32>> {
    let crop = if face.dimensions() == (ENCODER_INPUT, ENCODER_INPUT) {
        face.to_rgb8()
    } else {
        face.resize_exact(ENCODER_INPUT, ENCODER_INPUT, FilterType::Triangle)
            .to_rgb8()
    };

    let input = input_tensor(&crop)?;
    let outputs = session.run(ort::inputs![input])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let len = match shape.len() {
        2 => shape[1] as usize,
        _ => data.len(),
    };
    if len == 0 || len > data.len() {
        bail!("encoder returned an invalid embedding shape {:?}", shape);
    }

    let mut embedding = data[..len].to_vec();
    l2_normalize(&mut embedding);
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bbox: [f32; 4], score: f32) -> FaceRegion {
        FaceRegion {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn iou_overlap_and_disjoint() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let overlap = iou(&a, &b);
        assert!(overlap > 0.0 && overlap < 1.0);
        assert_eq!(iou(&a, &[100.0, 100.0, 10.0, 10.0]), 0.0);
    }

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let kept = nms(
            vec![
                region([12.0, 12.0, 20.0, 20.0], 0.8),
                region([10.0, 10.0, 20.0, 20.0], 0.9),
                region([100.0, 100.0, 20.0, 20.0], 0.85),
            ],
            0.3,
        );
        let scores: Vec<f32> = kept.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.85]);
    }

    #[test]
    fn letterbox_round_trips_coordinates() {
        let letterbox = Letterbox::fit(1280, 720, DETECTOR_INPUT);
        assert_eq!(letterbox.width, 640);
        assert_eq!(letterbox.height, 360);
        assert_eq!(letterbox.offset_y, 140);

        let raw = RawDetection {
            bbox: [64.0, 140.0 + 36.0, 32.0, 32.0],
            score: 0.7,
            landmarks: [0.0; 10],
        };
        let mapped = letterbox.unmap(&raw);
        assert!((mapped.bbox[0] - 128.0).abs() < 1e-3);
        assert!((mapped.bbox[1] - 72.0).abs() < 1e-3);
        assert!((mapped.bbox[2] - 64.0).abs() < 1e-3);
    }

    #[test]
    fn align_places_eyes_on_reference() {
        let mut img = RgbImage::new(200, 200);
        for y in 77..=83 {
            for x in 57..=63 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let mut landmarks = [0.0f32; 10];
        landmarks[..4].copy_from_slice(&[60.0, 80.0, 140.0, 80.0]);
        let face = FaceRegion {
            bbox: [40.0, 40.0, 120.0, 120.0],
            score: 0.9,
            landmarks,
        };

        let aligned = align_face(&DynamicImage::ImageRgb8(img), &face, ENCODER_INPUT)
            .unwrap()
            .to_rgb8();
        assert_eq!(aligned.dimensions(), (ENCODER_INPUT, ENCODER_INPUT));
        let (x, y) = (
            REFERENCE_LEFT_EYE.0.round() as u32,
            REFERENCE_LEFT_EYE.1.round() as u32,
        );
        assert!(aligned.get_pixel(x, y)[0] > 0);
    }

    #[test]
    fn align_rejects_collapsed_landmarks() {
        let img = DynamicImage::new_rgb8(50, 50);
        let face = region([0.0, 0.0, 10.0, 10.0], 0.9);
        assert!(align_face(&img, &face, ENCODER_INPUT).is_err());
    }

    #[test]
    fn planar_layout_is_bgr() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));
        assert_eq!(planar_bgr(&img), vec![3.0, 6.0, 2.0, 5.0, 1.0, 4.0]);
    }

    #[test]
    fn normalize_yields_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
