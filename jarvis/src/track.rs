//! Frame-to-frame association of detections by bounding-box IoU, with
//! per-track gesture and position history for stabilization.

use crate::{
    config::ProductionConfig,
    contour::Point,
    detector::HandDetection,
    gesture::{Gesture, GESTURE_COUNT},
};
use std::collections::VecDeque;

/// Tracks unseen for more than this many update cycles are dropped.
const MAX_FRAMES_LOST: u32 = 30;

/// One hand followed across frames.
#[derive(Debug, Clone)]
pub struct Track {
    /// Monotonically increasing, never reused.
    pub id: u64,
    pub detection: HandDetection,
    pub last_center: Point,
    /// Pixels per update cycle, from the last two observed centers.
    pub velocity: (f32, f32),
    pub frames_tracked: u32,
    pub frames_lost: u32,
    pub gesture_history: VecDeque<Gesture>,
    pub center_history: VecDeque<Point>,
    /// Exponentially smoothed tracking confidence in [0, 1].
    pub confidence: f32,
}

pub struct Tracker {
    tracks: Vec<Track>,
    next_id: u64,
    iou_threshold: f32,
    gesture_window: usize,
    center_window: usize,
    confidence_threshold: f32,
}

impl Tracker {
    pub fn new(config: &ProductionConfig) -> Tracker {
        Tracker {
            tracks: Vec::new(),
            next_id: 0,
            iou_threshold: config.tracking_iou_threshold,
            gesture_window: config.gesture_stabilization_frames.max(1),
            center_window: config.tracking_history_frames.max(1),
            confidence_threshold: config.gesture_confidence_threshold,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Drop all tracks. Ids keep counting up so none is ever reused.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    /// The track a detection belongs to, if any.
    pub fn match_for(&self, detection: &HandDetection) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| detection.bbox.iou(&t.detection.bbox) > self.iou_threshold)
    }

    /// Associate one batch of detections. Each detection greedily claims the
    /// unclaimed track with the highest IoU above the threshold; leftovers
    /// start fresh tracks, and stale tracks are pruned.
    pub fn update(&mut self, detections: &[HandDetection]) {
        for track in &mut self.tracks {
            track.frames_lost += 1;
        }

        let mut track_taken = vec![false; self.tracks.len()];

        for det in detections {
            let mut best_iou = 0.0f32;
            let mut best_idx = None;

            for (j, track) in self.tracks.iter().enumerate() {
                if track_taken[j] {
                    continue;
                }
                let iou = det.bbox.iou(&track.detection.bbox);
                if iou > self.iou_threshold && iou > best_iou {
                    best_iou = iou;
                    best_idx = Some(j);
                }
            }

            match best_idx {
                Some(j) => {
                    track_taken[j] = true;
                    let track = &mut self.tracks[j];

                    let prev_center = track.last_center;
                    track.detection = det.clone();
                    track.last_center = det.center;
                    track.velocity = (
                        (det.center.x - prev_center.x) as f32,
                        (det.center.y - prev_center.y) as f32,
                    );
                    track.frames_tracked += 1;
                    track.frames_lost = 0;

                    track.gesture_history.push_back(det.gesture);
                    while track.gesture_history.len() > self.gesture_window {
                        track.gesture_history.pop_front();
                    }
                    track.center_history.push_back(det.center);
                    while track.center_history.len() > self.center_window {
                        track.center_history.pop_front();
                    }

                    track.confidence =
                        (track.confidence * 0.9 + det.bbox.confidence * 0.1).min(1.0);
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    tracing::debug!("new track {id} at {:?}", det.bbox);

                    self.tracks.push(Track {
                        id,
                        detection: det.clone(),
                        last_center: det.center,
                        velocity: (0.0, 0.0),
                        frames_tracked: 1,
                        frames_lost: 0,
                        gesture_history: VecDeque::from([det.gesture]),
                        center_history: VecDeque::from([det.center]),
                        confidence: det.bbox.confidence,
                    });
                    track_taken.push(true);
                }
            }
        }

        self.tracks.retain(|t| {
            if t.frames_lost > MAX_FRAMES_LOST {
                tracing::debug!("pruning track {} after {} lost frames", t.id, t.frames_lost);
                false
            } else {
                true
            }
        });
    }

    /// Weighted-recency vote over a track's gesture ring. Recent entries
    /// weigh up to twice as much as old ones; common gestures get a lower
    /// acceptance bar, and a clear finger count can override the vote.
    pub fn stabilized_gesture(&self, track: &Track) -> Gesture {
        if track.gesture_history.is_empty() {
            return Gesture::Unknown;
        }

        let n = track.gesture_history.len();
        let mut scores = [0.0f32; GESTURE_COUNT];
        let mut total = 0.0f32;
        for (i, g) in track.gesture_history.iter().enumerate() {
            let weight = 0.5 + 0.5 * (i as f32 / n as f32);
            scores[g.index()] += weight;
            total += weight;
        }

        let mut best = Gesture::Unknown;
        let mut best_score = 0.0f32;
        for (i, &score) in scores.iter().enumerate() {
            if score > best_score {
                best_score = score;
                best = Gesture::from_index(i);
            }
        }

        let confidence = best_score / total;
        let mut threshold = self.confidence_threshold;
        if matches!(best, Gesture::Pointing | Gesture::Fist | Gesture::OpenPalm) {
            threshold *= 0.85;
        }
        if confidence < threshold {
            return Gesture::Unknown;
        }

        let expected = match track.detection.num_fingers {
            0 => Gesture::Fist,
            1 => Gesture::Pointing,
            2 => Gesture::Peace,
            5 => Gesture::OpenPalm,
            _ => Gesture::Unknown,
        };
        if expected != Gesture::Unknown
            && best != expected
            && confidence > threshold * 0.75
        {
            return expected;
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::BoundingBox;

    fn det(x: i32, y: i32, w: i32, h: i32, gesture: Gesture, fingers: i32) -> HandDetection {
        let bbox = BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.8,
        };
        HandDetection {
            bbox,
            center: bbox.center(),
            gesture,
            num_fingers: fingers,
            ..HandDetection::default()
        }
    }

    fn tracker() -> Tracker {
        Tracker::new(&ProductionConfig::default())
    }

    #[test]
    fn overlapping_detection_keeps_its_id() {
        let mut tracker = tracker();
        tracker.update(&[det(0, 0, 100, 100, Gesture::Pointing, 1)]);
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].id, 0);

        // IoU ~0.67 with the first box, plus a disjoint newcomer
        tracker.update(&[
            det(0, 20, 100, 100, Gesture::Pointing, 1),
            det(300, 300, 50, 50, Gesture::Fist, 0),
        ]);

        let ids: Vec<u64> = tracker.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(tracker.tracks()[0].frames_tracked, 2);
        assert_eq!(tracker.tracks()[1].frames_tracked, 1);
    }

    #[test]
    fn new_ids_are_strictly_increasing() {
        let mut tracker = tracker();
        tracker.update(&[det(0, 0, 50, 50, Gesture::Fist, 0)]);
        // lose it
        for _ in 0..40 {
            tracker.update(&[]);
        }
        assert!(tracker.tracks().is_empty());

        tracker.update(&[det(0, 0, 50, 50, Gesture::Fist, 0)]);
        assert_eq!(tracker.tracks()[0].id, 1);
    }

    #[test]
    fn no_track_is_matched_twice_per_cycle() {
        let mut tracker = tracker();
        tracker.update(&[det(0, 0, 100, 100, Gesture::Pointing, 1)]);

        // two near-identical detections; only one may claim track 0
        tracker.update(&[
            det(0, 5, 100, 100, Gesture::Pointing, 1),
            det(5, 0, 100, 100, Gesture::Pointing, 1),
        ]);
        let ids: Vec<u64> = tracker.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn rings_stay_bounded() {
        let mut tracker = tracker();
        for _ in 0..30 {
            tracker.update(&[det(0, 0, 100, 100, Gesture::Pointing, 1)]);
        }
        let track = &tracker.tracks()[0];
        assert_eq!(
            track.gesture_history.len(),
            ProductionConfig::default().gesture_stabilization_frames
        );
        assert_eq!(
            track.center_history.len(),
            ProductionConfig::default().tracking_history_frames
        );
    }

    #[test]
    fn confidence_is_ema_of_detection_confidence() {
        let mut tracker = tracker();
        tracker.update(&[det(0, 0, 100, 100, Gesture::Pointing, 1)]);
        assert!((tracker.tracks()[0].confidence - 0.8).abs() < 1e-6);

        tracker.update(&[det(0, 0, 100, 100, Gesture::Pointing, 1)]);
        // 0.9 * 0.8 + 0.1 * 0.8
        assert!((tracker.tracks()[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn velocity_follows_motion() {
        let mut tracker = tracker();
        tracker.update(&[det(0, 0, 100, 100, Gesture::Pointing, 1)]);
        tracker.update(&[det(10, 0, 100, 100, Gesture::Pointing, 1)]);
        let v = tracker.tracks()[0].velocity;
        assert_eq!(v, (10.0, 0.0));
    }

    #[test]
    fn stabilized_gesture_prefers_recent_majority() {
        let mut tracker = tracker();
        let seq = [
            Gesture::Fist,
            Gesture::Fist,
            Gesture::OpenPalm,
            Gesture::OpenPalm,
            Gesture::OpenPalm,
            Gesture::OpenPalm,
            Gesture::OpenPalm,
        ];
        for g in seq {
            tracker.update(&[det(0, 0, 100, 100, g, 5)]);
        }
        let track = &tracker.tracks()[0];
        assert_eq!(tracker.stabilized_gesture(track), Gesture::OpenPalm);
    }

    #[test]
    fn finger_count_overrides_vote() {
        let mut tracker = tracker();
        let seq = [
            Gesture::Fist,
            Gesture::Fist,
            Gesture::OpenPalm,
            Gesture::OpenPalm,
            Gesture::OpenPalm,
            Gesture::OpenPalm,
        ];
        for g in seq {
            tracker.update(&[det(0, 0, 100, 100, g, 5)]);
        }
        // last observation says one finger
        tracker.update(&[det(0, 0, 100, 100, Gesture::OpenPalm, 1)]);
        let track = &tracker.tracks()[0];
        assert_eq!(tracker.stabilized_gesture(track), Gesture::Pointing);
    }

    #[test]
    fn sparse_history_votes_unknown() {
        let mut tracker = tracker();
        let seq = [
            Gesture::Fist,
            Gesture::Peace,
            Gesture::OkSign,
            Gesture::Pointing,
            Gesture::OpenPalm,
            Gesture::Peace,
            Gesture::OkSign,
        ];
        for g in seq {
            tracker.update(&[det(0, 0, 100, 100, g, 3)]);
        }
        let track = &tracker.tracks()[0];
        assert_eq!(tracker.stabilized_gesture(track), Gesture::Unknown);
    }
}
