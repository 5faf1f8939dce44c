//! The closed gesture tag set and the rule-based classifier mapping contour
//! statistics to a tag.

use crate::detector::HandDetection;
use std::fmt::{Display, Formatter};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    #[default]
    Unknown,
    OpenPalm,
    Fist,
    Pointing,
    ThumbsUp,
    Peace,
    OkSign,
    Custom,
}

/// Number of tags, for counting buckets.
pub const GESTURE_COUNT: usize = 8;

impl Gesture {
    /// Stable bucket index; also the tie-break order for history voting.
    pub fn index(&self) -> usize {
        match self {
            Gesture::Unknown => 0,
            Gesture::OpenPalm => 1,
            Gesture::Fist => 2,
            Gesture::Pointing => 3,
            Gesture::ThumbsUp => 4,
            Gesture::Peace => 5,
            Gesture::OkSign => 6,
            Gesture::Custom => 7,
        }
    }

    pub fn from_index(i: usize) -> Gesture {
        match i {
            1 => Gesture::OpenPalm,
            2 => Gesture::Fist,
            3 => Gesture::Pointing,
            4 => Gesture::ThumbsUp,
            5 => Gesture::Peace,
            6 => Gesture::OkSign,
            7 => Gesture::Custom,
            _ => Gesture::Unknown,
        }
    }

    pub fn from_name(name: &str) -> Gesture {
        match name {
            "Open Palm" => Gesture::OpenPalm,
            "Fist" => Gesture::Fist,
            "Pointing" => Gesture::Pointing,
            "Thumbs Up" => Gesture::ThumbsUp,
            "Peace" => Gesture::Peace,
            "OK Sign" => Gesture::OkSign,
            "Custom" => Gesture::Custom,
            _ => Gesture::Unknown,
        }
    }

    /// Gestures that drive the drawing state machine.
    pub fn is_drawing(&self) -> bool {
        matches!(self, Gesture::Pointing | Gesture::Peace)
    }
}

impl Display for Gesture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Gesture::Unknown => "Unknown",
            Gesture::OpenPalm => "Open Palm",
            Gesture::Fist => "Fist",
            Gesture::Pointing => "Pointing",
            Gesture::ThumbsUp => "Thumbs Up",
            Gesture::Peace => "Peace",
            Gesture::OkSign => "OK Sign",
            Gesture::Custom => "Custom",
        };
        write!(f, "{name}")
    }
}

/// Map (finger count, aspect, solidity, fingertip geometry) to a tag.
/// Rules are ordered; the first match wins.
pub fn classify(hand: &HandDetection) -> Gesture {
    let fingers = hand.num_fingers;
    let aspect = hand.bbox.width as f32 / hand.bbox.height.max(1) as f32;
    let solidity = hand.contour_area as f32 / (hand.bbox.area().max(1) as f32);

    let is_compact = solidity > 0.72;
    let is_square = (0.75..=1.35).contains(&aspect);
    let is_elongated = aspect < 0.6 || aspect > 1.6;

    // fist first, so compact blobs never leak into the finger rules
    if fingers == 0 || (fingers == 1 && is_compact && is_square) {
        return Gesture::Fist;
    }

    if fingers >= 4 {
        return Gesture::OpenPalm;
    }
    if fingers == 3 && !is_compact {
        return Gesture::OpenPalm;
    }
    if fingers >= 2 && solidity < 0.65 && !is_elongated {
        return Gesture::OpenPalm;
    }

    if fingers == 1 && (is_elongated || aspect < 0.7 || aspect > 1.5) {
        return Gesture::Pointing;
    }
    if fingers == 2 && hand.fingertips.len() >= 2 && is_elongated {
        let d0 = hand.fingertips[0].distance(&hand.center);
        let d1 = hand.fingertips[1].distance(&hand.center);
        let hand_size =
            ((hand.bbox.width as f64).powi(2) + (hand.bbox.height as f64).powi(2)).sqrt();
        let dist_ratio = d0.max(d1) / d0.min(d1).max(1.0);

        // one clearly dominant fingertip reads as pointing
        if dist_ratio > 1.4 || (d0 - d1).abs() > hand_size * 0.3 {
            return Gesture::Pointing;
        }
    }

    if (fingers == 2 || fingers == 3) && hand.fingertips.len() >= 2 {
        let tip_dist = hand.fingertips[0].distance(&hand.fingertips[1]);
        let hand_size =
            ((hand.bbox.width as f64).powi(2) + (hand.bbox.height as f64).powi(2)).sqrt();

        if tip_dist < hand_size * 0.28 && is_compact {
            return Gesture::OkSign;
        }
        if tip_dist < hand_size * 0.65 && !is_elongated && (0.6..=1.6).contains(&aspect) {
            return Gesture::Peace;
        }
    }

    if fingers <= 1 {
        if is_compact && is_square {
            Gesture::Fist
        } else {
            Gesture::Pointing
        }
    } else if fingers == 2 {
        if is_elongated {
            Gesture::Pointing
        } else {
            Gesture::Peace
        }
    } else if fingers >= 3 || !is_compact {
        Gesture::OpenPalm
    } else if is_compact {
        Gesture::Fist
    } else {
        Gesture::OpenPalm
    }
}
