use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// Output dimension of the SFace recognition model.
pub const EMBEDDING_DIM: usize = 128;

const DETECT_INPUT: u32 = 640;
const ENCODE_INPUT: u32 = 112;

/// One detected face in source-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // left eye, right eye, nose, mouth corners
}

impl Detection {
    /// Rescale all coordinates by `factor`, mapping a detection computed on
    /// a downscaled frame back onto the full-resolution frame.
    pub fn scaled(&self, factor: f32) -> Detection {
        let mut out = self.clone();
        for v in out.bbox.iter_mut() {
            *v *= factor;
        }
        for v in out.landmarks.iter_mut() {
            *v *= factor;
        }
        out
    }
}

/// L2-normalized face embedding.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

/// Detect faces with the YuNet detector. Returns every face scoring above
/// `score_threshold`, NMS-filtered, in source-image pixel coordinates.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    // Letterbox onto a square canvas; the model wants a fixed 640x640 input.
    let (orig_w, orig_h) = img.dimensions();
    let scale = DETECT_INPUT as f32 / orig_w.max(orig_h) as f32;
    let new_w = (orig_w as f32 * scale) as u32;
    let new_h = (orig_h as f32 * scale) as u32;
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);
    let mut canvas = DynamicImage::new_rgb8(DETECT_INPUT, DETECT_INPUT);
    let offset_x = (DETECT_INPUT - new_w) / 2;
    let offset_y = (DETECT_INPUT - new_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let planes = bgr_planes(&canvas.to_rgb8());
    let input = Array4::from_shape_vec(
        (1, 3, DETECT_INPUT as usize, DETECT_INPUT as usize),
        planes,
    )?;
    let tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![tensor])?;

    let mut raw_outputs: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        raw_outputs.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = raw_outputs
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let raw = yunet::decode(&output_refs, score_threshold, DETECT_INPUT as usize)?;

    // Undo the letterbox: normalized canvas coordinates back to source pixels.
    let side = DETECT_INPUT as f32;
    let unmap_x = |x: f32| (x * side - offset_x as f32) / scale;
    let unmap_y = |y: f32| (y * side - offset_y as f32) / scale;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for i in 0..5 {
                landmarks[i * 2] = unmap_x(d.landmarks[i * 2]);
                landmarks[i * 2 + 1] = unmap_y(d.landmarks[i * 2 + 1]);
            }
            Detection {
                bbox: [
                    unmap_x(d.bbox[0]),
                    unmap_y(d.bbox[1]),
                    d.bbox[2] * side / scale,
                    d.bbox[3] * side / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    Ok(if nms_threshold < 1.0 {
        nms(&detections, nms_threshold)
    } else {
        detections
    })
}

/// Greedy non-maximum suppression by detection score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| detections[b].score.total_cmp(&detections[a].score));

    let mut keep: Vec<Detection> = Vec::new();
    for &i in &order {
        if keep
            .iter()
            .all(|k| iou(&k.bbox, &detections[i].bbox) <= iou_threshold)
        {
            keep.push(detections[i].clone());
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale, and crop a face so the eyes land on the reference
/// positions the recognition model was trained with. Pixels pulled from
/// outside the source frame stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> RgbImage {
    // ArcFace-standard eye positions for a 112x112 crop.
    const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
    const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let angle = eye_dy.atan2(eye_dx);

    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt().max(f32::EPSILON);
    let scale = (size as f32 / 112.0) * (ref_dist / eye_dist);

    let eye_center = (
        (left_eye.0 + right_eye.0) / 2.0,
        (left_eye.1 + right_eye.1) / 2.0,
    );
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * size as f32 / 112.0,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * size as f32 / 112.0,
    );

    // Forward affine: rotate by the eye angle, scale, then translate the eye
    // midpoint onto the reference midpoint.
    let a = scale * angle.cos();
    let b = scale * angle.sin();
    let c = -scale * angle.sin();
    let d = scale * angle.cos();
    let tx = ref_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center.1 - (c * eye_center.0 + d * eye_center.1);
    let det = a * d - b * c;

    let (img_w, img_h) = img.dimensions();
    let mut output = RgbImage::new(size, size);
    for out_y in 0..size {
        for out_x in 0..size {
            // Pull each output pixel through the inverse transform with
            // bilinear sampling.
            let rx = out_x as f32 - tx;
            let ry = out_y as f32 - ty;
            let in_x = (d * rx - b * ry) / det;
            let in_y = (-c * rx + a * ry) / det;
            if in_x < 0.0 || in_x >= img_w as f32 || in_y < 0.0 || in_y >= img_h as f32 {
                continue;
            }

            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);
            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut px = [0u8; 3];
            for ch in 0..3 {
                px[ch] = (p00[ch] as f32 * w00
                    + p10[ch] as f32 * w10
                    + p01[ch] as f32 * w01
                    + p11[ch] as f32 * w11) as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(px));
        }
    }
    output
}

/// Encode an aligned face crop into an L2-normalized SFace embedding.
pub fn encode_face(session: &mut Session, face: &RgbImage) -> Result<Embedding> {
    let resized = image::imageops::resize(
        face,
        ENCODE_INPUT,
        ENCODE_INPUT,
        image::imageops::FilterType::Triangle,
    );
    let planes = bgr_planes(&resized);
    let input = Array4::from_shape_vec(
        (1, 3, ENCODE_INPUT as usize, ENCODE_INPUT as usize),
        planes,
    )?;
    let tensor = Value::from_array(input)?;

    let outputs = session.run(ort::inputs![tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim != EMBEDDING_DIM {
        anyhow::bail!(
            "recognition model produced a {}-dimension vector, expected {}",
            dim,
            EMBEDDING_DIM
        );
    }

    let mut vector: Vec<f32> = data[..dim].to_vec();
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }

    Ok(Embedding {
        vector: Array1::from_vec(vector),
    })
}

/// Split an RGB8 image into planar BGR f32 channels, the layout both models
/// expect, values kept in [0, 255].
fn bgr_planes(img: &RgbImage) -> Vec<f32> {
    let count = (img.width() * img.height()) as usize;
    let mut planes = vec![0.0f32; 3 * count];
    let (b, rest) = planes.split_at_mut(count);
    let (g, r) = rest.split_at_mut(count);
    for (i, px) in img.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn iou_overlap_and_disjoint() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let v = iou(&a, &b);
        assert!(v > 0.0 && v < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(iou(&a, &c), 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_boxes() {
        let detections = vec![
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];
        let kept = nms(&detections, 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn detection_scaling_inverts_downscale() {
        let mut d = det([10.0, 20.0, 30.0, 40.0], 0.9);
        d.landmarks[0] = 5.0;
        let up = d.scaled(4.0);
        assert_eq!(up.bbox, [40.0, 80.0, 120.0, 160.0]);
        assert_eq!(up.landmarks[0], 20.0);
        assert_eq!(up.score, 0.9);
    }

    #[test]
    fn bgr_planes_channel_order() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([10, 20, 30]));
        img.put_pixel(1, 0, image::Rgb([40, 50, 60]));
        let planes = bgr_planes(&img);
        // Planar B, then G, then R.
        assert_eq!(planes, vec![30.0, 60.0, 20.0, 50.0, 10.0, 40.0]);
    }

    #[test]
    fn align_face_output_dimensions() {
        let img = DynamicImage::new_rgb8(64, 64);
        let mut d = det([10.0, 10.0, 40.0, 40.0], 0.9);
        // Level eyes inside the frame.
        d.landmarks = [20.0, 30.0, 44.0, 30.0, 32.0, 38.0, 24.0, 48.0, 40.0, 48.0];
        let crop = align_face(&img, &d, 112);
        assert_eq!(crop.dimensions(), (112, 112));
    }
}
