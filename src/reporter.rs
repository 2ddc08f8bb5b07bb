use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// One accepted sighting, ready for delivery to the attendance sink.
#[derive(Debug)]
pub struct Report {
    pub user_id: i64,
    pub evidence: Option<Vec<u8>>,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Report>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

/// Best-effort attendance submission, decoupled from the capture loop by a
/// bounded queue and one background worker. Delivery failures are logged
/// and swallowed; nothing is retried.
pub struct Reporter {
    shared: Arc<Shared>,
    depth: usize,
    join: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(base_url: &str, depth: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let base_url = base_url.trim_end_matches('/').to_string();
        let join = std::thread::spawn(move || run_worker(worker_shared, base_url));
        Self {
            shared,
            depth: depth.max(1),
            join: Some(join),
        }
    }

    /// Queue a report without blocking the capture loop. A full queue drops
    /// its oldest entry so memory stays bounded during sink outages.
    pub fn enqueue(&self, report: Report) {
        let mut queue = self.shared.queue.lock().unwrap();
        if let Some(dropped) = push_bounded(&mut queue.pending, self.depth, report) {
            warn!(
                "report queue full, dropping oldest report (user {})",
                dropped.user_id
            );
        }
        drop(queue);
        self.shared.available.notify_one();
    }

    /// Stop the worker and wait for it to exit. Pending reports are not
    /// drained; an abrupt stop may drop them.
    pub fn stop(mut self) {
        self.shared.queue.lock().unwrap().closed = true;
        self.shared.available.notify_all();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("reporter worker panicked");
            }
        }
    }
}

/// Push onto a bounded queue, evicting and returning the oldest entry when
/// the queue is at capacity.
fn push_bounded(pending: &mut VecDeque<Report>, depth: usize, report: Report) -> Option<Report> {
    let dropped = if pending.len() >= depth {
        pending.pop_front()
    } else {
        None
    };
    pending.push_back(report);
    dropped
}

fn run_worker(shared: Arc<Shared>, base_url: String) {
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(10))
        .build();
    loop {
        let report = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if queue.closed {
                    return;
                }
                if let Some(report) = queue.pending.pop_front() {
                    break report;
                }
                queue = shared.available.wait(queue).unwrap();
            }
        };
        match submit(&agent, &base_url, &report) {
            Ok(()) => info!("Logged attendance for user {}", report.user_id),
            Err(err) => warn!(
                "Failed to log attendance for user {}: {:#}",
                report.user_id, err
            ),
        }
    }
}

fn submit(agent: &ureq::Agent, base_url: &str, report: &Report) -> Result<()> {
    let boundary = format!("rollcall-{}", uuid::Uuid::new_v4().simple());
    let body = multipart_body(&boundary, report);
    agent
        .post(&format!("{}/attendance/", base_url))
        .set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        )
        .send_bytes(&body)
        .context("submitting attendance")?;
    Ok(())
}

fn multipart_body(boundary: &str, report: &Report) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"user_id\"\r\n\r\n{}\r\n",
            report.user_id
        )
        .as_bytes(),
    );
    if let Some(evidence) = &report.evidence {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"evidence.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(evidence);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// JPEG-encode the current frame for audit evidence. Best-effort: a failed
/// encode means the report goes without an image.
pub fn encode_evidence(frame: &RgbImage) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, 80);
    match frame.write_with_encoder(encoder) {
        Ok(()) => Some(buf),
        Err(err) => {
            warn!("failed to encode evidence image: {}", err);
            None
        }
    }
}
