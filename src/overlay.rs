use image::{Rgb, RgbImage};

// Deep sky blue for known identities, red for unknowns.
const KNOWN_COLOR: Rgb<u8> = Rgb([0, 191, 255]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const OUTLINE_WEIGHT: u32 = 2;
const LABEL_BAR_HEIGHT: u32 = 40;
const LABEL_ALPHA: f32 = 0.6;

/// A detection plus whatever the matcher decided about it, kept around for
/// drawing on the frames between extraction runs.
#[derive(Debug, Clone)]
pub struct LabeledBox {
    pub bbox: [f32; 4],
    pub name: String,
    pub known: bool,
}

/// Draw every labeled box onto the frame: a solid outline plus a
/// semi-transparent bar along the bottom edge. Purely cosmetic.
pub fn draw(frame: &mut RgbImage, boxes: &[LabeledBox]) {
    for b in boxes {
        let color = if b.known { KNOWN_COLOR } else { UNKNOWN_COLOR };
        let (x, y, w, h) = clip_bbox(frame, &b.bbox);
        if w == 0 || h == 0 {
            continue;
        }
        blend_bar(frame, x, y, w, h, color);
        outline(frame, x, y, w, h, color);
    }
}

/// Clamp a float bbox to integer pixel bounds inside the frame.
fn clip_bbox(frame: &RgbImage, bbox: &[f32; 4]) -> (u32, u32, u32, u32) {
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let x0 = bbox[0].clamp(0.0, fw - 1.0);
    let y0 = bbox[1].clamp(0.0, fh - 1.0);
    let x1 = (bbox[0] + bbox[2]).clamp(x0, fw);
    let y1 = (bbox[1] + bbox[3]).clamp(y0, fh);
    (
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    )
}

fn outline(frame: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    for dy in 0..h {
        for dx in 0..w {
            let edge = dx < OUTLINE_WEIGHT
                || dy < OUTLINE_WEIGHT
                || dx >= w.saturating_sub(OUTLINE_WEIGHT)
                || dy >= h.saturating_sub(OUTLINE_WEIGHT);
            if edge {
                frame.put_pixel(x + dx, y + dy, color);
            }
        }
    }
}

/// Alpha-blend the label bar over the bottom strip of the box.
fn blend_bar(frame: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let bar_top = (y + h).saturating_sub(LABEL_BAR_HEIGHT.min(h));
    for py in bar_top..y + h {
        for px in x..x + w {
            let old = *frame.get_pixel(px, py);
            frame.put_pixel(px, py, blend(old, color, LABEL_ALPHA));
        }
    }
}

fn blend(under: Rgb<u8>, over: Rgb<u8>, alpha: f32) -> Rgb<u8> {
    let mut out = [0u8; 3];
    for ch in 0..3 {
        out[ch] = (over[ch] as f32 * alpha + under[ch] as f32 * (1.0 - alpha)) as u8;
    }
    Rgb(out)
}
