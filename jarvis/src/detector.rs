//! Single-frame classical-CV hand detection: downscale, HSV, skin mask,
//! morphology, connected components, shape analysis, gesture classification,
//! history stabilization.

use crate::{
    config::DetectorConfig,
    contour::{self, Point},
    error::Result,
    frame::{Frame, PixelFormat},
    gesture::{self, Gesture, GESTURE_COUNT},
    pixel,
    shape::{self, BoundingBox},
};
use std::collections::VecDeque;
use std::time::Instant;

/// Counters and per-stage timings, reset on demand.
#[derive(Debug, Default, Clone)]
pub struct DetectionStats {
    pub frames_processed: u64,
    pub hands_detected: u64,
    pub avg_process_time_ms: f64,
    pub last_detection_timestamp: u64,

    pub conversion_ms: f64,
    pub masking_ms: f64,
    pub morphology_ms: f64,
    pub contours_ms: f64,
    pub analysis_ms: f64,
}

impl DetectionStats {
    pub fn reset(&mut self) {
        *self = DetectionStats::default();
    }
}

/// One detected hand.
#[derive(Debug, Default, Clone)]
pub struct HandDetection {
    pub bbox: BoundingBox,
    /// Center of mass of the blob.
    pub center: Point,
    pub gesture: Gesture,
    pub gesture_confidence: f32,
    /// Extended fingers, 0..=5.
    pub num_fingers: i32,
    /// Blob area in pixels at full resolution scale.
    pub contour_area: u32,
    /// Downsampled blob points, at most ~50.
    pub contour: Vec<Point>,
    /// Up to five fingertip positions.
    pub fingertips: Vec<Point>,
}

pub struct HandDetector {
    config: DetectorConfig,
    stats: DetectionStats,

    // scratch reused across frames, owned by the detect thread
    hsv_buffer: Vec<u8>,
    mask_buffer: Vec<u8>,
    scale_buffer: Vec<u8>,
    morph_scratch: Vec<u8>,

    gesture_history: VecDeque<Gesture>,
}

impl HandDetector {
    pub fn new(config: DetectorConfig) -> Result<HandDetector> {
        config.validate()?;
        tracing::debug!(
            "detector ready, skin H[{}-{}] S[{}-{}] V[{}-{}]",
            config.hsv.hue_min,
            config.hsv.hue_max,
            config.hsv.sat_min,
            config.hsv.sat_max,
            config.hsv.val_min,
            config.hsv.val_max,
        );
        Ok(HandDetector {
            config,
            stats: DetectionStats::default(),
            hsv_buffer: Vec::new(),
            mask_buffer: Vec::new(),
            scale_buffer: Vec::new(),
            morph_scratch: Vec::new(),
            gesture_history: VecDeque::new(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: DetectorConfig) {
        self.config = config;
    }

    pub fn stats(&self) -> &DetectionStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
        self.gesture_history.clear();
    }

    /// Run the full detection pipeline on one frame. Only `Rgb888` input is
    /// processed; anything else yields an empty list.
    pub fn detect(&mut self, frame: &Frame) -> Vec<HandDetection> {
        let start = Instant::now();
        let mut detections = Vec::new();

        if frame.width == 0 || frame.height == 0 || frame.validate().is_err() {
            tracing::warn!("dropping malformed frame");
            return detections;
        }
        if frame.format != PixelFormat::Rgb888 {
            tracing::debug!("detector skipping {:?} frame", frame.format);
            return detections;
        }

        let k = self.config.downscale_factor.max(1);
        let work_w = frame.width / k;
        let work_h = frame.height / k;
        let pixel_count = (work_w * work_h) as usize;
        if pixel_count == 0 {
            return detections;
        }

        self.hsv_buffer.resize(pixel_count * 3, 0);
        self.mask_buffer.resize(pixel_count, 0);

        // stage 1: downscale + HSV
        let stage = Instant::now();
        if k > 1 {
            self.scale_buffer.resize(pixel_count * 3, 0);
            pixel::resize_nearest(
                &frame.pixels,
                &mut self.scale_buffer,
                frame.width,
                frame.height,
                work_w,
                work_h,
                3,
            );
            pixel::rgb_to_hsv(&self.scale_buffer, &mut self.hsv_buffer, pixel_count);
        } else {
            pixel::rgb_to_hsv(&frame.pixels, &mut self.hsv_buffer, pixel_count);
        }
        self.stats.conversion_ms = stage.elapsed().as_secs_f64() * 1e3;

        // stage 2: skin mask
        let stage = Instant::now();
        pixel::skin_mask(
            &self.hsv_buffer,
            &mut self.mask_buffer,
            pixel_count,
            &self.config.hsv,
        );
        self.stats.masking_ms = stage.elapsed().as_secs_f64() * 1e3;

        // a hand needs at least min_hand_area/3 skin pixels before morphology
        let skin_pixels = self.mask_buffer.iter().filter(|&&m| m > 0).count();
        if skin_pixels < (self.config.min_hand_area / 3).max(0) as usize {
            self.finish_frame(frame, start, 0);
            return detections;
        }

        // stage 3: morphology
        if self.config.enable_morphology {
            let stage = Instant::now();
            pixel::morph_open_then_close(
                &mut self.mask_buffer,
                work_w,
                work_h,
                self.config.morph_iterations,
                &mut self.morph_scratch,
            );
            self.stats.morphology_ms = stage.elapsed().as_secs_f64() * 1e3;
        }

        // stage 4: connected components
        let stage = Instant::now();
        let contours = contour::find_contours(&self.mask_buffer, work_w, work_h);
        self.stats.contours_ms = stage.elapsed().as_secs_f64() * 1e3;

        // stage 5: analyze the three largest blobs
        let stage = Instant::now();
        for blob in contours.iter().take(3) {
            // the contour carries every pixel of the blob, so its length is
            // the region area
            let area = blob.len() as i64;
            if area < self.config.min_hand_area as i64 || area > self.config.max_hand_area as i64 {
                continue;
            }

            let mut hand = self.analyze_contour(blob, work_w, work_h);

            let solidity = if hand.bbox.area() > 0 {
                area as f32 / hand.bbox.area() as f32
            } else {
                0.0
            };
            if !(0.30..=0.98).contains(&solidity) {
                continue;
            }

            hand.contour_area = (area as u32) * k * k;

            if k > 1 {
                let s = k as i32;
                hand.bbox.x *= s;
                hand.bbox.y *= s;
                hand.bbox.width *= s;
                hand.bbox.height *= s;
                hand.center.x *= s;
                hand.center.y *= s;
                for p in hand.contour.iter_mut().chain(hand.fingertips.iter_mut()) {
                    p.x *= s;
                    p.y *= s;
                }
            }

            if self.config.enable_gesture && hand.bbox.confidence >= self.config.min_confidence {
                hand.gesture = gesture::classify(&hand);
                hand.gesture = self.stabilize_gesture(hand.gesture);
            }

            tracing::trace!(
                "blob area {area} solidity {solidity:.2} fingers {} conf {:.2} gesture {}",
                hand.num_fingers,
                hand.bbox.confidence,
                hand.gesture,
            );

            if hand.bbox.confidence >= self.config.min_confidence {
                detections.push(hand);
            }
        }
        self.stats.analysis_ms = stage.elapsed().as_secs_f64() * 1e3;

        self.finish_frame(frame, start, detections.len());
        detections
    }

    fn finish_frame(&mut self, frame: &Frame, start: Instant, hands: usize) {
        self.stats.frames_processed += 1;
        self.stats.hands_detected += hands as u64;
        self.stats.last_detection_timestamp = frame.timestamp_ns;

        let elapsed = start.elapsed().as_secs_f64() * 1e3;
        let n = self.stats.frames_processed as f64;
        self.stats.avg_process_time_ms = (self.stats.avg_process_time_ms * (n - 1.0) + elapsed) / n;
    }

    fn analyze_contour(&self, blob: &[Point], work_w: u32, work_h: u32) -> HandDetection {
        let mut hand = HandDetection {
            bbox: shape::bounding_box(blob),
            center: shape::centroid(blob),
            ..HandDetection::default()
        };

        hand.num_fingers = shape::finger_count(blob, &hand.center);
        hand.fingertips = shape::fingertips(blob, &hand.center);

        let step = (blob.len() / 50).max(1);
        hand.contour = blob.iter().step_by(step).copied().collect();

        let frame_area = (work_w * work_h) as f32;
        let area_ratio = hand.bbox.area() as f32 / frame_area;
        let aspect = hand.bbox.width as f32 / hand.bbox.height.max(1) as f32;

        let mut confidence = 0.55f32;

        if (0.005..=0.6).contains(&area_ratio) {
            confidence += 0.20;
        } else if !(0.003..=0.8).contains(&area_ratio) {
            confidence *= 0.35;
        } else {
            confidence *= 0.65;
        }

        if (0.4..=2.5).contains(&aspect) {
            confidence += 0.15;
        } else if !(0.3..=3.0).contains(&aspect) {
            confidence *= 0.5;
        } else {
            confidence *= 0.7;
        }

        if (0..=6).contains(&hand.num_fingers) {
            confidence += 0.05;
        } else if hand.num_fingers > 8 {
            confidence *= 0.6;
        }

        if !hand.fingertips.is_empty() && hand.fingertips.len() <= 7 {
            confidence += 0.05;
        }

        hand.bbox.confidence = confidence.clamp(0.0, 1.0);
        hand.gesture_confidence = hand.bbox.confidence;
        hand
    }

    /// Push the current gesture into the history ring and emit the mode.
    /// Ties go to the lower tag index.
    fn stabilize_gesture(&mut self, current: Gesture) -> Gesture {
        self.gesture_history.push_back(current);
        while self.gesture_history.len() > self.config.gesture_history {
            self.gesture_history.pop_front();
        }

        let mut counts = [0u32; GESTURE_COUNT];
        for g in &self.gesture_history {
            counts[g.index()] += 1;
        }

        let mut best = Gesture::Unknown;
        let mut best_count = 0;
        for (i, &count) in counts.iter().enumerate() {
            if count > best_count {
                best_count = count;
                best = Gesture::from_index(i);
            }
        }
        best
    }

    /// Sample an ROI known to contain skin and widen the HSV box around what
    /// is actually there.
    pub fn calibrate_skin(
        &mut self,
        frame: &Frame,
        roi_x: i32,
        roi_y: i32,
        roi_w: i32,
        roi_h: i32,
    ) -> Result<()> {
        use crate::error::JarvisError;

        if frame.format != PixelFormat::Rgb888 {
            return Err(JarvisError::UnsupportedFormat(frame.format));
        }

        let (mut h_min, mut h_max) = (180, 0);
        let (mut s_min, mut s_max) = (255, 0);
        let (mut v_min, mut v_max) = (255, 0);
        let mut samples = 0u32;

        for y in roi_y.max(0)..(roi_y + roi_h).min(frame.height as i32) {
            for x in roi_x.max(0)..(roi_x + roi_w).min(frame.width as i32) {
                let Some((r, g, b)) = frame.rgb_at(x as u32, y as u32) else {
                    continue;
                };
                let mut px = [0u8; 3];
                pixel::rgb_to_hsv(&[r, g, b], &mut px, 1);

                h_min = h_min.min(px[0] as i32);
                h_max = h_max.max(px[0] as i32);
                s_min = s_min.min(px[1] as i32);
                s_max = s_max.max(px[1] as i32);
                v_min = v_min.min(px[2] as i32);
                v_max = v_max.max(px[2] as i32);
                samples += 1;
            }
        }

        if samples == 0 {
            return Err(JarvisError::Capture("empty calibration region".into()));
        }

        self.config.hsv.hue_min = (h_min - 10).max(0);
        self.config.hsv.hue_max = (h_max + 10).min(179);
        self.config.hsv.sat_min = (s_min - 30).max(0);
        self.config.hsv.sat_max = (s_max + 30).min(255);
        self.config.hsv.val_min = (v_min - 30).max(0);
        self.config.hsv.val_max = (v_max + 30).min(255);

        tracing::info!(
            "calibrated skin to H[{}-{}] S[{}-{}] V[{}-{}] from {samples} samples",
            self.config.hsv.hue_min,
            self.config.hsv.hue_max,
            self.config.hsv.sat_min,
            self.config.hsv.sat_max,
            self.config.hsv.val_min,
            self.config.hsv.val_max,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKIN: (u8, u8, u8) = (220, 180, 140);

    fn black_frame(w: u32, h: u32) -> Frame {
        Frame::rgb888(vec![0; (w * h * 3) as usize], w, h, 1)
    }

    fn paint_rect(frame: &mut Frame, x0: u32, y0: u32, w: u32, h: u32, rgb: (u8, u8, u8)) {
        for y in y0..(y0 + h).min(frame.height) {
            for x in x0..(x0 + w).min(frame.width) {
                let idx = ((y * frame.width + x) * 3) as usize;
                frame.pixels[idx] = rgb.0;
                frame.pixels[idx + 1] = rgb.1;
                frame.pixels[idx + 2] = rgb.2;
            }
        }
    }

    fn paint_disc(frame: &mut Frame, cx: i32, cy: i32, r: i32, rgb: (u8, u8, u8)) {
        for y in 0..frame.height as i32 {
            for x in 0..frame.width as i32 {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    let idx = ((y as u32 * frame.width + x as u32) * 3) as usize;
                    frame.pixels[idx] = rgb.0;
                    frame.pixels[idx + 1] = rgb.1;
                    frame.pixels[idx + 2] = rgb.2;
                }
            }
        }
    }

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            min_hand_area: 1000,
            downscale_factor: 1,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn empty_frame_detects_nothing_but_counts() {
        let mut detector = HandDetector::new(test_config()).unwrap();
        let detections = detector.detect(&black_frame(320, 240));
        assert!(detections.is_empty());
        assert_eq!(detector.stats().frames_processed, 1);
    }

    #[test]
    fn unsupported_format_is_empty_and_uncounted() {
        let mut detector = HandDetector::new(test_config()).unwrap();
        let frame = Frame {
            pixels: vec![0; 320 * 240 * 3 / 2],
            width: 320,
            height: 240,
            stride: 320,
            format: PixelFormat::Yuv420,
            timestamp_ns: 0,
        };
        assert!(detector.detect(&frame).is_empty());
        assert_eq!(detector.stats().frames_processed, 0);
    }

    #[test]
    fn skin_disc_is_detected() {
        let mut detector = HandDetector::new(test_config()).unwrap();
        let mut frame = black_frame(320, 240);
        paint_disc(&mut frame, 160, 120, 40, SKIN);

        let detections = detector.detect(&frame);
        assert_eq!(detections.len(), 1);

        let hand = &detections[0];
        assert!(hand.bbox.x >= 118 && hand.bbox.x + hand.bbox.width <= 202);
        assert!(hand.bbox.y >= 78 && hand.bbox.y + hand.bbox.height <= 162);
        assert!(hand.num_fingers >= 0);
        assert!(hand.bbox.confidence > 0.8);
        assert_eq!(hand.gesture, Gesture::Fist);
        assert_eq!(detector.stats().frames_processed, 1);
        assert_eq!(detector.stats().hands_detected, 1);
    }

    #[test]
    fn mostly_skin_frame_with_black_corner_is_detected() {
        let mut detector = HandDetector::new(test_config()).unwrap();
        let mut frame = black_frame(320, 240);
        paint_rect(&mut frame, 0, 0, 320, 240, SKIN);
        paint_rect(&mut frame, 0, 0, 60, 80, (0, 0, 0));

        let detections = detector.detect(&frame);
        assert!(!detections.is_empty());
        let best = detections
            .iter()
            .max_by(|a, b| {
                a.bbox
                    .confidence
                    .partial_cmp(&b.bbox.confidence)
                    .unwrap()
            })
            .unwrap();
        assert!(best.num_fingers >= 0);
        assert_eq!(detector.stats().frames_processed, 1);
    }

    #[test]
    fn blob_below_area_floor_is_rejected() {
        let mut config = test_config();
        config.min_hand_area = 8000;
        let mut detector = HandDetector::new(config).unwrap();
        let mut frame = black_frame(320, 240);
        paint_disc(&mut frame, 160, 120, 40, SKIN); // ~5000 px

        assert!(detector.detect(&frame).is_empty());
    }

    #[test]
    fn invalid_config_is_surfaced() {
        let mut config = test_config();
        config.hsv.val_max = 999;
        assert!(HandDetector::new(config).is_err());
    }

    #[test]
    fn stats_reset() {
        let mut detector = HandDetector::new(test_config()).unwrap();
        detector.detect(&black_frame(320, 240));
        detector.detect(&black_frame(320, 240));
        assert_eq!(detector.stats().frames_processed, 2);
        detector.reset_stats();
        assert_eq!(detector.stats().frames_processed, 0);
        assert_eq!(detector.stats().hands_detected, 0);
    }

    #[test]
    fn calibration_widens_around_samples() {
        let mut detector = HandDetector::new(test_config()).unwrap();
        let mut frame = black_frame(320, 240);
        paint_rect(&mut frame, 110, 70, 100, 100, SKIN);

        detector.calibrate_skin(&frame, 110, 70, 100, 100).unwrap();
        let hsv = &detector.config().hsv;
        // skin tone lands at H 15, S ~92, V ~220; tolerance is +/-10 H, +/-30 S/V
        assert_eq!(hsv.hue_min, 5);
        assert_eq!(hsv.hue_max, 25);
        assert!(hsv.sat_min >= 60 && hsv.sat_min <= 64);
        assert!(hsv.val_min >= 188 && hsv.val_min <= 192);
        assert!(hsv.val_max >= 248 && hsv.val_max <= 252);
    }

    #[test]
    fn calibration_rejects_empty_roi() {
        let mut detector = HandDetector::new(test_config()).unwrap();
        let frame = black_frame(64, 64);
        assert!(detector.calibrate_skin(&frame, 200, 200, 10, 10).is_err());
    }
}
