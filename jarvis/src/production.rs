//! Production detection path: the single-frame detector wrapped with
//! temporal tracking, adaptive lighting, confidence shaping, and a region
//! hint for the capture side.

use crate::{
    config::{DetectorConfig, ProductionConfig},
    contour::Point,
    detector::{DetectionStats, HandDetection, HandDetector},
    error::Result,
    frame::Frame,
    gesture::Gesture,
    lighting::AdaptiveLighting,
    track::Tracker,
};

const LIGHTING_RETUNE_INTERVAL: u64 = 30;

/// Search-region hint derived from recent detections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

pub struct ProductionDetector {
    detector: HandDetector,
    tracker: Tracker,
    lighting: AdaptiveLighting,
    config: ProductionConfig,
    frame_counter: u64,
    roi: Option<Roi>,
}

impl ProductionDetector {
    pub fn new(
        detector_config: DetectorConfig,
        production_config: ProductionConfig,
    ) -> Result<ProductionDetector> {
        let lighting = AdaptiveLighting::new(
            detector_config.hsv,
            production_config.lighting_adaptation_rate,
        );
        let detector = HandDetector::new(detector_config)?;
        tracing::info!(
            "production detector up (tracking: {}, adaptive lighting: {}, roi: {})",
            production_config.enable_tracking,
            production_config.adaptive_lighting,
            production_config.enable_roi_tracking,
        );
        Ok(ProductionDetector {
            tracker: Tracker::new(&production_config),
            detector,
            lighting,
            config: production_config,
            frame_counter: 0,
            roi: None,
        })
    }

    pub fn stats(&self) -> &DetectionStats {
        self.detector.stats()
    }

    pub fn detector_config(&self) -> &DetectorConfig {
        self.detector.config()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn roi_hint(&self) -> Option<Roi> {
        self.roi
    }

    pub fn reset_tracking(&mut self) {
        self.tracker.reset();
    }

    pub fn reset_stats(&mut self) {
        self.detector.reset_stats();
    }

    pub fn detect(&mut self, frame: &Frame) -> Vec<HandDetection> {
        if self.config.adaptive_lighting && self.frame_counter % LIGHTING_RETUNE_INTERVAL == 0 {
            let mut config = self.detector.config().clone();
            self.lighting.retune(frame, &mut config.hsv);
            self.detector.set_config(config);
        }

        let mut detections = self.detector.detect(frame);

        // stable tracks vouch for overlapping detections
        if self.config.enable_tracking {
            for det in &mut detections {
                for track in self.tracker.tracks() {
                    if det.bbox.iou(&track.detection.bbox) > 0.3 {
                        let boost = (1.0 + track.frames_tracked as f32 * 0.02).min(1.2);
                        det.bbox.confidence = (det.bbox.confidence * boost).min(1.0);
                    }
                }
            }

            self.tracker.update(&detections);

            for det in &mut detections {
                let Some(track) = self.tracker.match_for(det) else {
                    continue;
                };
                if track.frames_tracked < 5 || track.gesture_history.len() < 3 {
                    continue;
                }

                let stabilized = self.tracker.stabilized_gesture(track);
                if stabilized != Gesture::Unknown {
                    det.gesture = stabilized;
                    let stability = track
                        .gesture_history
                        .iter()
                        .filter(|&&g| g == stabilized)
                        .count() as f32
                        / track.gesture_history.len() as f32;
                    det.gesture_confidence = stability * track.confidence;
                }

                // average the last few centers to suppress jitter
                if track.center_history.len() >= 3 {
                    let recent = track.center_history.len().min(5);
                    let (mut sx, mut sy) = (0i64, 0i64);
                    for c in track.center_history.iter().rev().take(recent) {
                        sx += c.x as i64;
                        sy += c.y as i64;
                    }
                    det.center = Point::new(
                        (sx / recent as i64) as i32,
                        (sy / recent as i64) as i32,
                    );
                }
            }
        }

        if self.config.filter_low_confidence {
            let quality = self.config.min_detection_quality;
            let tracker = &self.tracker;
            detections.retain(|det| {
                let tracked = tracker
                    .tracks()
                    .iter()
                    .any(|t| det.bbox.iou(&t.detection.bbox) > 0.3 && t.frames_tracked > 5);
                if tracked {
                    // temporal hysteresis: known hands get a lower bar
                    det.bbox.confidence >= quality * 0.7
                } else {
                    det.bbox.confidence >= quality
                }
            });
        }

        self.update_roi(frame, &detections);

        self.frame_counter += 1;
        detections
    }

    fn update_roi(&mut self, frame: &Frame, detections: &[HandDetection]) {
        if self.config.enable_roi_tracking && !detections.is_empty() {
            let mut min_x = detections[0].bbox.x;
            let mut min_y = detections[0].bbox.y;
            let mut max_x = detections[0].bbox.x + detections[0].bbox.width;
            let mut max_y = detections[0].bbox.y + detections[0].bbox.height;
            for det in &detections[1..] {
                min_x = min_x.min(det.bbox.x);
                min_y = min_y.min(det.bbox.y);
                max_x = max_x.max(det.bbox.x + det.bbox.width);
                max_y = max_y.max(det.bbox.y + det.bbox.height);
            }

            // fast hands get a wider margin
            let mut expansion = self.config.roi_expansion_pixels;
            for track in self.tracker.tracks() {
                if track.center_history.len() >= 2 {
                    let motion =
                        track.velocity.0.abs() as i32 + track.velocity.1.abs() as i32;
                    expansion = expansion.max((expansion + motion / 2).min(120));
                }
            }

            let x = (min_x - expansion).max(0);
            let y = (min_y - expansion).max(0);
            self.roi = Some(Roi {
                x,
                y,
                width: (max_x - min_x + 2 * expansion).min(frame.width as i32 - x),
                height: (max_y - min_y + 2 * expansion).min(frame.height as i32 - y),
            });
        } else if detections.is_empty() {
            // widen the stale region a little every frame until found again
            if let Some(roi) = &mut self.roi {
                let expansion = 20;
                roi.x = (roi.x - expansion).max(0);
                roi.y = (roi.y - expansion).max(0);
                roi.width = (roi.width + 2 * expansion).min(frame.width as i32 - roi.x);
                roi.height = (roi.height + 2 * expansion).min(frame.height as i32 - roi.y);
            }
        }
    }

    pub fn calibrate_skin(
        &mut self,
        frame: &Frame,
        roi_x: i32,
        roi_y: i32,
        roi_w: i32,
        roi_h: i32,
    ) -> Result<()> {
        self.detector.calibrate_skin(frame, roi_x, roi_y, roi_w, roi_h)?;
        self.lighting.rebase(self.detector.config().hsv);
        Ok(())
    }

    /// Detect first, then calibrate from the best hand found.
    pub fn auto_calibrate(&mut self, frame: &Frame) -> Result<bool> {
        let detections = self.detector.detect(frame);
        let Some(hand) = detections.first() else {
            return Ok(false);
        };
        let bbox = hand.bbox;
        self.calibrate_skin(frame, bbox.x, bbox.y, bbox.width, bbox.height)?;
        Ok(true)
    }
}
