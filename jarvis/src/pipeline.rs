//! Four-stage frame pipeline: capture, preprocess, detect, draw.
//!
//! Each stage is one OS thread; stages hand owned buffers forward through
//! bounded channels, so nothing is shared but the queues and the running
//! flag. Cancellation is cooperative: clearing the flag makes every stage
//! drain out, and dropped senders cascade shutdown downstream.

use crate::{
    config::{DetectorConfig, PipelineConfig, ProductionConfig},
    detector::HandDetection,
    error::Result,
    frame::{DisplaySink, Frame, FrameSource, PixelFormat},
    pad::{PadSnapshot, SketchPad},
    pixel,
    production::ProductionDetector,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const QUEUE_WAIT: Duration = Duration::from_millis(50);
const PREPROCESS_GAMMA: f32 = 0.8;

struct CapturedFrame {
    yuv: Vec<u8>,
    timestamp_ns: u64,
}

struct DetectFrame {
    rgb: Vec<u8>,
    timestamp_ns: u64,
}

struct DetectionBatch {
    detections: Vec<HandDetection>,
    timestamp_ns: u64,
}

/// Detect-stage output shaping: hold the last non-empty result through brief
/// dropouts, and keep a short window of recent results.
struct DetectionSmoother {
    last_valid: Vec<HandDetection>,
    held_frames: u32,
    window: VecDeque<Vec<HandDetection>>,
}

impl DetectionSmoother {
    const HOLD_MAX: u32 = 3;
    const WINDOW: usize = 5;

    fn new() -> DetectionSmoother {
        DetectionSmoother {
            last_valid: Vec::new(),
            held_frames: 0,
            window: VecDeque::new(),
        }
    }

    fn push(&mut self, detections: Vec<HandDetection>) -> Vec<HandDetection> {
        let effective = if !detections.is_empty() {
            self.last_valid = detections.clone();
            self.held_frames = 0;
            detections
        } else if !self.last_valid.is_empty() && self.held_frames < Self::HOLD_MAX {
            self.held_frames += 1;
            self.last_valid.clone()
        } else {
            detections
        };

        self.window.push_back(effective);
        while self.window.len() > Self::WINDOW {
            self.window.pop_front();
        }
        self.window.back().cloned().unwrap_or_default()
    }
}

fn send_while_running<T>(tx: &Sender<T>, running: &AtomicBool, mut item: T) -> bool {
    loop {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        match tx.send_timeout(item, QUEUE_WAIT) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => item = back,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// The running pipeline. Dropping it stops and joins every stage.
pub struct Pipeline {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    snapshot: Arc<Mutex<PadSnapshot>>,
}

impl Pipeline {
    /// Spawn all four stages. The detector and pad move into their stage
    /// threads; pad state is observable through [`Pipeline::snapshot`].
    pub fn start(
        config: PipelineConfig,
        detector_config: DetectorConfig,
        production_config: ProductionConfig,
        source: Box<dyn FrameSource>,
        pad: SketchPad,
        sink: Option<Box<dyn DisplaySink>>,
    ) -> Result<Pipeline> {
        let detector = ProductionDetector::new(detector_config, production_config)?;

        let running = Arc::new(AtomicBool::new(true));
        let snapshot = Arc::new(Mutex::new(pad.snapshot()));

        let (yuv_tx, yuv_rx) = bounded::<CapturedFrame>(config.queue_depth);
        let (rgb_tx, rgb_rx) = bounded::<DetectFrame>(config.queue_depth);
        let (det_tx, det_rx) = bounded::<DetectionBatch>(config.queue_depth);

        tracing::info!(
            "pipeline starting: camera {}x{}@{}, detect {}x{}",
            config.camera_width,
            config.camera_height,
            config.camera_fps,
            config.detect_width,
            config.detect_height,
        );

        let mut handles = Vec::with_capacity(4);

        handles.push(spawn_named("capture", {
            let running = running.clone();
            let config = config.clone();
            move || capture_stage(source, yuv_tx, &running, &config)
        }));
        handles.push(spawn_named("preprocess", {
            let running = running.clone();
            let config = config.clone();
            move || preprocess_stage(yuv_rx, rgb_tx, &running, &config)
        }));
        handles.push(spawn_named("detect", {
            let running = running.clone();
            let config = config.clone();
            move || detect_stage(rgb_rx, det_tx, detector, &running, &config)
        }));
        handles.push(spawn_named("draw", {
            let running = running.clone();
            let snapshot = snapshot.clone();
            let config = config.clone();
            move || draw_stage(det_rx, pad, sink, snapshot, &running, &config)
        }));

        Ok(Pipeline {
            running,
            handles,
            snapshot,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Current pad state as last published by the draw stage.
    pub fn snapshot(&self) -> PadSnapshot {
        self.snapshot
            .lock()
            .expect("snapshot lock never poisoned")
            .clone()
    }

    /// Cooperative shutdown: clear the flag, let the stages drain, join.
    pub fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        tracing::info!("pipeline stopping");
        self.running.store(false, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_named(name: &str, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("jarvis-{name}"))
        .spawn(f)
        .expect("spawning a pipeline thread")
}

fn capture_stage(
    mut source: Box<dyn FrameSource>,
    tx: Sender<CapturedFrame>,
    running: &AtomicBool,
    config: &PipelineConfig,
) {
    let expected = (config.camera_width * config.camera_height * 3 / 2) as usize;

    while running.load(Ordering::Relaxed) {
        let Some(frame) = source.capture_frame() else {
            tracing::warn!("frame capture failed, continuing");
            std::thread::sleep(Duration::from_millis(5));
            continue;
        };
        if frame.format != PixelFormat::Yuv420 || frame.pixels.len() < expected {
            tracing::warn!("capture stage dropping {:?} frame", frame.format);
            continue;
        }

        let item = CapturedFrame {
            yuv: frame.pixels,
            timestamp_ns: frame.timestamp_ns,
        };
        if !send_while_running(&tx, running, item) {
            break;
        }
    }
    tracing::debug!("capture stage done");
}

fn preprocess_stage(
    rx: Receiver<CapturedFrame>,
    tx: Sender<DetectFrame>,
    running: &AtomicBool,
    config: &PipelineConfig,
) {
    let (cw, ch) = (config.camera_width, config.camera_height);
    let (dw, dh) = (config.detect_width, config.detect_height);
    let mut rgb = vec![0u8; (cw * ch * 3) as usize];

    while running.load(Ordering::Relaxed) {
        let captured = match rx.recv_timeout(QUEUE_WAIT) {
            Ok(captured) => captured,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        pixel::yuv420_to_rgb888(&captured.yuv, &mut rgb, cw, ch);
        pixel::gamma_correct(&mut rgb, PREPROCESS_GAMMA);

        let mut detect = vec![0u8; (dw * dh * 3) as usize];
        pixel::resize_bilinear(&rgb, &mut detect, cw, ch, dw, dh, 3);

        let item = DetectFrame {
            rgb: detect,
            timestamp_ns: captured.timestamp_ns,
        };
        if !send_while_running(&tx, running, item) {
            break;
        }
    }
    tracing::debug!("preprocess stage done");
}

fn detect_stage(
    rx: Receiver<DetectFrame>,
    tx: Sender<DetectionBatch>,
    mut detector: ProductionDetector,
    running: &AtomicBool,
    config: &PipelineConfig,
) {
    let mut smoother = DetectionSmoother::new();

    while running.load(Ordering::Relaxed) {
        let input = match rx.recv_timeout(QUEUE_WAIT) {
            Ok(input) => input,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let frame = Frame::rgb888(
            input.rgb,
            config.detect_width,
            config.detect_height,
            input.timestamp_ns,
        );
        let detections = detector.detect(&frame);
        let smoothed = smoother.push(detections);

        let item = DetectionBatch {
            detections: smoothed,
            timestamp_ns: input.timestamp_ns,
        };
        if !send_while_running(&tx, running, item) {
            break;
        }
    }
    tracing::debug!("detect stage done");
}

fn draw_stage(
    rx: Receiver<DetectionBatch>,
    mut pad: SketchPad,
    mut sink: Option<Box<dyn DisplaySink>>,
    snapshot: Arc<Mutex<PadSnapshot>>,
    running: &AtomicBool,
    config: &PipelineConfig,
) {
    let frame_period = Duration::from_millis(1000 / config.camera_fps.max(1) as u64);
    let mut next_frame = Instant::now() + frame_period;
    let mut surface = sink.as_ref().map(|s| {
        let (_, height, stride) = s.dimensions();
        vec![0u8; (stride * height) as usize]
    });

    while running.load(Ordering::Relaxed) {
        match rx.recv_timeout(frame_period) {
            Ok(batch) => {
                pad.update(&batch.detections);
                if let Ok(mut shared) = snapshot.lock() {
                    *shared = pad.snapshot();
                }
                if let (Some(sink), Some(buffer)) = (sink.as_mut(), surface.as_mut()) {
                    let (width, height, stride) = sink.dimensions();
                    buffer.fill(0);
                    pad.render(buffer, stride, width, height);
                    sink.blit(buffer);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // absolute-deadline pacing at the display rate
        let now = Instant::now();
        if now < next_frame {
            std::thread::sleep(next_frame - now);
        }
        next_frame += frame_period;
    }
    tracing::debug!("draw stage done");
}
