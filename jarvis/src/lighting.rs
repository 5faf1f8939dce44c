//! Scene brightness estimation and HSV threshold retuning.
//!
//! A 3x3 grid of sample windows feeds an exponential moving average of
//! perceived brightness; the ratio against a mid-gray target selects a
//! retune band applied to the base thresholds.

use crate::{
    frame::{Frame, PixelFormat},
    pixel::HsvRange,
};

const TARGET_BRIGHTNESS: f32 = 128.0;

pub struct AdaptiveLighting {
    base: HsvRange,
    brightness_ema: f32,
    rate: f32,
}

impl AdaptiveLighting {
    pub fn new(base: HsvRange, rate: f32) -> AdaptiveLighting {
        AdaptiveLighting {
            base,
            brightness_ema: TARGET_BRIGHTNESS,
            rate,
        }
    }

    pub fn brightness(&self) -> f32 {
        self.brightness_ema
    }

    /// Replace the baseline thresholds, e.g. after skin calibration.
    pub fn rebase(&mut self, base: HsvRange) {
        self.base = base;
    }

    /// Stratified luma/saturation sample: the center of each cell of a 3x3
    /// grid, an 11x11 window stepped by 2. Returns `(luma, saturation)`
    /// averages or `None` for non-RGB frames.
    fn sample(&self, frame: &Frame) -> Option<(f32, f32)> {
        if frame.format != PixelFormat::Rgb888 {
            return None;
        }

        let region_w = frame.width as i32 / 3;
        let region_h = frame.height as i32 / 3;
        let mut luma_sum = 0.0f32;
        let mut sat_sum = 0.0f32;
        let mut samples = 0u32;

        for ry in 0..3 {
            for rx in 0..3 {
                let cx = rx * region_w + region_w / 2;
                let cy = ry * region_h + region_h / 2;

                for dy in (-5i32..=5).step_by(2) {
                    for dx in (-5i32..=5).step_by(2) {
                        let px = (cx + dx).clamp(0, frame.width as i32 - 1);
                        let py = (cy + dy).clamp(0, frame.height as i32 - 1);
                        let idx = py as usize * frame.stride as usize + px as usize * 3;
                        if idx + 2 >= frame.pixels.len() {
                            continue;
                        }

                        let r = frame.pixels[idx] as f32;
                        let g = frame.pixels[idx + 1] as f32;
                        let b = frame.pixels[idx + 2] as f32;

                        luma_sum += 0.2126 * r + 0.7152 * g + 0.0722 * b;

                        let max = r.max(g).max(b);
                        let min = r.min(g).min(b);
                        sat_sum += if max == 0.0 { 0.0 } else { (max - min) / max * 255.0 };

                        samples += 1;
                    }
                }
            }
        }

        if samples == 0 {
            return None;
        }
        Some((luma_sum / samples as f32, sat_sum / samples as f32))
    }

    /// Update the brightness average from `frame` and rewrite `active` with
    /// band-adjusted thresholds derived from the base set.
    pub fn retune(&mut self, frame: &Frame, active: &mut HsvRange) {
        let Some((luma, saturation)) = self.sample(frame) else {
            return;
        };

        self.brightness_ema = self.brightness_ema * (1.0 - self.rate) + luma * self.rate;
        let ratio = self.brightness_ema / TARGET_BRIGHTNESS;

        let mut adjusted = self.base;
        if ratio < 0.5 {
            adjusted.val_min = (self.base.val_min as f32 * 0.5) as i32;
            adjusted.val_min = adjusted.val_min.max(15);
            adjusted.sat_min = ((self.base.sat_min as f32 * 0.65) as i32).max(10);
            adjusted.val_max = 255;
        } else if ratio < 0.75 {
            adjusted.val_min = ((self.base.val_min as f32 * 0.75) as i32).max(25);
            adjusted.sat_min = ((self.base.sat_min as f32 * 0.85) as i32).max(15);
        } else if ratio > 1.5 {
            adjusted.val_min = ((self.base.val_min as f32 * 1.5) as i32).min(90);
            adjusted.sat_max = ((self.base.sat_max as f32 * 1.15) as i32).min(255);
            adjusted.sat_min = ((self.base.sat_min as f32 * 1.1) as i32).max(15);
        } else if ratio > 1.2 {
            adjusted.val_min = ((self.base.val_min as f32 * 1.2) as i32).min(70);
            adjusted.sat_max = ((self.base.sat_max as f32 * 1.08) as i32).min(255);
        }

        // washed-out scenes need a wider hue net
        if saturation < 30.0 {
            adjusted.hue_max = (self.base.hue_max + 5).min(35);
        }

        tracing::trace!(
            "lighting retune: brightness {:.1} ratio {ratio:.2} V[{}-{}] S[{}-{}] H[{}-{}]",
            self.brightness_ema,
            adjusted.val_min,
            adjusted.val_max,
            adjusted.sat_min,
            adjusted.sat_max,
            adjusted.hue_min,
            adjusted.hue_max,
        );

        *active = adjusted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(rgb: (u8, u8, u8)) -> Frame {
        let (w, h) = (90u32, 90u32);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for _ in 0..w * h {
            pixels.extend_from_slice(&[rgb.0, rgb.1, rgb.2]);
        }
        Frame::rgb888(pixels, w, h, 0)
    }

    #[test]
    fn dark_scene_lowers_value_floor() {
        let mut lighting = AdaptiveLighting::new(HsvRange::default(), 0.1);
        let mut active = HsvRange::default();
        let frame = flat_frame((40, 40, 40));

        for _ in 0..20 {
            lighting.retune(&frame, &mut active);
        }

        // EMA converges toward 40, ratio well under 0.5
        assert!(lighting.brightness() < 64.0);
        assert_eq!(active.val_min, 20); // max(15, 0.5 * 40)
        assert_eq!(active.val_max, 255);
        assert_eq!(active.sat_min, 13); // max(10, 0.65 * 20)
        // flat gray is unsaturated, so the hue net widens
        assert_eq!(active.hue_max, 30);
    }

    #[test]
    fn bright_scene_raises_thresholds() {
        let mut lighting = AdaptiveLighting::new(HsvRange::default(), 0.1);
        let mut active = HsvRange::default();
        let frame = flat_frame((240, 240, 240));

        for _ in 0..25 {
            lighting.retune(&frame, &mut active);
        }

        assert!(lighting.brightness() > 192.0);
        assert_eq!(active.val_min, 60); // min(90, 1.5 * 40)
        assert_eq!(active.sat_max, 230); // min(255, 1.15 * 200)
        assert_eq!(active.sat_min, 22); // max(15, 1.1 * 20)
    }

    #[test]
    fn neutral_scene_leaves_thresholds_alone() {
        let mut lighting = AdaptiveLighting::new(HsvRange::default(), 0.1);
        let mut active = HsvRange::default();
        // luma ~104, saturated enough to keep the hue net narrow
        let frame = flat_frame((128, 100, 80));

        lighting.retune(&frame, &mut active);
        assert_eq!(active, HsvRange::default());
    }

    #[test]
    fn non_rgb_frames_are_ignored(){
        let mut lighting = AdaptiveLighting::new(HsvRange::default(), 0.1);
        let mut active = HsvRange::default();
        let frame = Frame {
            pixels: vec![0; 96 * 96 * 3 / 2],
            width: 96,
            height: 96,
            stride: 96,
            format: PixelFormat::Yuv420,
            timestamp_ns: 0,
        };
        lighting.retune(&frame, &mut active);
        assert_eq!(lighting.brightness(), TARGET_BRIGHTNESS);
    }
}
