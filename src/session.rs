use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::cooldown::CooldownGate;
use crate::directory::{DirectoryClient, Roster};
use crate::matcher::{self, Match};
use crate::overlay::{self, LabeledBox};
use crate::reporter::{self, Report, Reporter};
use crate::{Camera, Detection, Embedding, Extractor, ModelPaths};

/// Run a full attendance session: one directory sync, then the capture loop
/// until the quit signal fires or the camera stops producing frames.
pub fn run(cfg: Config) -> Result<()> {
    let roster = DirectoryClient::new(&cfg.directory_url).sync();
    if roster.is_empty() {
        warn!("Empty roster: every face will be treated as unknown");
    }

    let mut camera = Camera::open(&cfg.camera).context("Failed to open camera")?;
    let mut extractor = Extractor::open(&ModelPaths::from_dir(&cfg.model_dir))
        .context("Failed to initialize face extraction")?;
    let reporter = Reporter::spawn(&cfg.directory_url, cfg.report_queue_depth);
    let mut gate = CooldownGate::new(cfg.cooldown());

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = quit.clone();
        ctrlc::set_handler(move || quit.store(true, Ordering::SeqCst))
            .context("Failed to install quit handler")?;
    }

    info!("Camera opened. Press Ctrl+C to stop.");

    let mut frame_count: u64 = 0;
    let mut cache: Vec<LabeledBox> = Vec::new();
    while !quit.load(Ordering::SeqCst) {
        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(err) => {
                // Device failure is the one condition that ends the loop.
                error!("Camera stopped: {:#}", err);
                break;
            }
        };
        frame_count += 1;

        if should_process(frame_count, cfg.frame_interval) {
            let small = downscale(&frame, cfg.downscale);
            let image = DynamicImage::ImageRgb8(small);
            match extractor.extract(&image, cfg.score_threshold, cfg.nms_threshold) {
                Ok(observations) => {
                    let upscale = if cfg.downscale > 0.0 && cfg.downscale < 1.0 {
                        1.0 / cfg.downscale
                    } else {
                        1.0
                    };
                    let outcome = evaluate(
                        observations,
                        &roster,
                        cfg.tolerance,
                        &mut gate,
                        Instant::now(),
                        upscale,
                    );
                    for user_id in outcome.admitted {
                        reporter.enqueue(Report {
                            user_id,
                            evidence: reporter::encode_evidence(&frame),
                        });
                    }
                    cache = outcome.boxes;
                }
                Err(err) => warn!("Skipping frame: {:#}", err),
            }
        }

        if let Some(path) = &cfg.preview_path {
            let mut annotated = frame.clone();
            overlay::draw(&mut annotated, &cache);
            write_preview(path, &annotated);
        }
    }

    reporter.stop();
    info!("Session ended after {} frames", frame_count);
    Ok(())
}

struct FrameOutcome {
    boxes: Vec<LabeledBox>,
    admitted: Vec<i64>,
}

/// Match each observed face against the roster and run known identities
/// through the cooldown gate. Free of I/O, so the whole admission path is
/// testable without a camera or a network.
fn evaluate(
    observations: Vec<(Detection, Embedding)>,
    roster: &Roster,
    tolerance: f32,
    gate: &mut CooldownGate,
    now: Instant,
    upscale: f32,
) -> FrameOutcome {
    let mut boxes = Vec::with_capacity(observations.len());
    let mut admitted = Vec::new();
    for (detection, embedding) in observations {
        let bbox = detection.scaled(upscale).bbox;
        match matcher::resolve(roster, &embedding, tolerance) {
            Match::Known { id, name, distance } => {
                if gate.admit(id, now) {
                    debug!("Admitted {} (user {}, distance {:.3})", name, id, distance);
                    admitted.push(id);
                } else {
                    debug!("Suppressed repeat sighting of {} (user {})", name, id);
                }
                boxes.push(LabeledBox {
                    bbox,
                    name,
                    known: true,
                });
            }
            Match::Unknown => boxes.push(LabeledBox {
                bbox,
                name: "Unknown".to_string(),
                known: false,
            }),
        }
    }
    FrameOutcome { boxes, admitted }
}

fn should_process(frame_count: u64, interval: u32) -> bool {
    interval <= 1 || frame_count % interval as u64 == 0
}

fn downscale(frame: &RgbImage, factor: f32) -> RgbImage {
    if factor <= 0.0 || factor >= 1.0 {
        return frame.clone();
    }
    let w = ((frame.width() as f32 * factor) as u32).max(1);
    let h = ((frame.height() as f32 * factor) as u32).max(1);
    image::imageops::resize(frame, w, h, image::imageops::FilterType::Triangle)
}

/// Write beside the target then rename, so a preview consumer never reads a
/// torn file. Failures only cost the preview, never the session.
fn write_preview(path: &Path, frame: &RgbImage) {
    let tmp = path.with_extension("tmp");
    let result = frame
        .save_with_format(&tmp, image::ImageFormat::Jpeg)
        .map_err(anyhow::Error::from)
        .and_then(|_| std::fs::rename(&tmp, path).map_err(Into::into));
    if let Err(err) = result {
        warn!("Failed to write preview frame: {:#}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EMBEDDING_DIM;
    use ndarray::Array1;
    use std::time::Duration;

    fn embedding(first: f32) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = first;
        Embedding {
            vector: Array1::from_vec(v),
        }
    }

    fn observation(first: f32) -> (Detection, Embedding) {
        (
            Detection {
                bbox: [10.0, 20.0, 30.0, 40.0],
                score: 0.9,
                landmarks: [0.0; 10],
            },
            embedding(first),
        )
    }

    fn alice_roster() -> Roster {
        let mut roster = Roster::default();
        roster.push(1, "Alice".to_string(), embedding(0.0));
        roster
    }

    #[test]
    fn empty_roster_yields_unknown_and_no_reports() {
        let roster = Roster::default();
        let mut gate = CooldownGate::new(Duration::from_secs(60));
        let outcome = evaluate(
            vec![observation(0.0)],
            &roster,
            0.5,
            &mut gate,
            Instant::now(),
            1.0,
        );
        assert!(outcome.admitted.is_empty());
        assert_eq!(outcome.boxes.len(), 1);
        assert!(!outcome.boxes[0].known);
    }

    #[test]
    fn exact_match_is_admitted_then_suppressed_then_readmitted() {
        let roster = alice_roster();
        let mut gate = CooldownGate::new(Duration::from_secs(60));
        let t0 = Instant::now();

        // First sighting: admitted.
        let first = evaluate(vec![observation(0.0)], &roster, 0.5, &mut gate, t0, 1.0);
        assert_eq!(first.admitted, vec![1]);
        assert!(first.boxes[0].known);
        assert_eq!(first.boxes[0].name, "Alice");

        // Ten seconds later: matched but suppressed.
        let second = evaluate(
            vec![observation(0.0)],
            &roster,
            0.5,
            &mut gate,
            t0 + Duration::from_secs(10),
            1.0,
        );
        assert!(second.admitted.is_empty());
        assert!(second.boxes[0].known);

        // Seventy seconds after the first: admitted again.
        let third = evaluate(
            vec![observation(0.0)],
            &roster,
            0.5,
            &mut gate,
            t0 + Duration::from_secs(70),
            1.0,
        );
        assert_eq!(third.admitted, vec![1]);
    }

    #[test]
    fn tolerance_boundary_admits_and_epsilon_beyond_does_not() {
        let roster = alice_roster();
        let mut gate = CooldownGate::new(Duration::from_secs(60));
        let at_boundary = evaluate(
            vec![observation(0.5)],
            &roster,
            0.5,
            &mut gate,
            Instant::now(),
            1.0,
        );
        assert_eq!(at_boundary.admitted, vec![1]);

        let mut gate = CooldownGate::new(Duration::from_secs(60));
        let beyond = evaluate(
            vec![observation(0.5001)],
            &roster,
            0.5,
            &mut gate,
            Instant::now(),
            1.0,
        );
        assert!(beyond.admitted.is_empty());
        assert!(!beyond.boxes[0].known);
    }

    #[test]
    fn boxes_are_scaled_back_to_frame_coordinates() {
        let roster = alice_roster();
        let mut gate = CooldownGate::new(Duration::from_secs(60));
        let outcome = evaluate(
            vec![observation(0.0)],
            &roster,
            0.5,
            &mut gate,
            Instant::now(),
            4.0,
        );
        assert_eq!(outcome.boxes[0].bbox, [40.0, 80.0, 120.0, 160.0]);
    }

    #[test]
    fn two_faces_resolve_independently_in_one_frame() {
        let mut roster = alice_roster();
        roster.push(2, "Bob".to_string(), embedding(3.0));
        let mut gate = CooldownGate::new(Duration::from_secs(60));
        let outcome = evaluate(
            vec![observation(0.0), observation(3.0)],
            &roster,
            0.5,
            &mut gate,
            Instant::now(),
            1.0,
        );
        assert_eq!(outcome.admitted, vec![1, 2]);
    }

    #[test]
    fn sampler_processes_every_nth_frame() {
        let processed: Vec<u64> = (1..=9).filter(|&n| should_process(n, 3)).collect();
        assert_eq!(processed, vec![3, 6, 9]);
        assert!((1..=5).all(|n| should_process(n, 1)));
        assert!((1..=5).all(|n| should_process(n, 0)));
    }

    #[test]
    fn downscale_shrinks_by_the_factor() {
        let frame = RgbImage::new(100, 80);
        let small = downscale(&frame, 0.25);
        assert_eq!((small.width(), small.height()), (25, 20));
        // Degenerate factors leave the frame alone.
        let same = downscale(&frame, 1.0);
        assert_eq!((same.width(), same.height()), (100, 80));
    }
}
