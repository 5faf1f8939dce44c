//! The drawing state machine: point, hold, change gesture, point again.
//!
//! A line is anchored by two confirmed positions. A position confirms when a
//! pointing (or peace) hand holds still within a tolerance for a configured
//! number of frames; a gesture change (or losing the hand, or moving far)
//! releases the start anchor and arms the end anchor. Everything runs in
//! canvas coordinates.

use crate::{
    config::PadConfig,
    detector::HandDetection,
    disk,
    error::Result,
    gesture::Gesture,
    graphics::{self, PixelCanvas},
    sketch::{now_ms, CanvasPoint, GridConfig, Line, Sketch},
};
use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawingState {
    /// Waiting for a stable pointing gesture to anchor the start.
    WaitingForStart,
    /// Start locked; waiting for the gesture to change or the hand to move.
    StartConfirmed,
    /// Armed; waiting for a stable pointing gesture to anchor the end.
    WaitingForEnd,
    /// Both anchors locked; the line finalizes immediately.
    EndConfirmed,
}

#[derive(Debug, Default)]
struct GestureConfirmation {
    gesture: Gesture,
    consecutive_frames: u32,
    position: CanvasPoint,
    confidence_sum: f32,
}

impl GestureConfirmation {
    fn reset(&mut self) {
        *self = GestureConfirmation::default();
    }

    fn restart(&mut self, gesture: Gesture, position: CanvasPoint, confidence: f32) {
        self.gesture = gesture;
        self.consecutive_frames = 1;
        self.position = position;
        self.confidence_sum = confidence;
    }

    fn avg_confidence(&self) -> f32 {
        if self.consecutive_frames == 0 {
            0.0
        } else {
            self.confidence_sum / self.consecutive_frames as f32
        }
    }
}

/// Read-only copy of pad state for threads that do not own the pad.
#[derive(Debug, Clone)]
pub struct PadSnapshot {
    pub sketch: Sketch,
    pub grid: GridConfig,
    pub state: DrawingState,
    pub start_point: CanvasPoint,
    pub preview_end: CanvasPoint,
    pub frames_processed: u64,
}

pub struct SketchPad {
    sketch: Sketch,
    grid: GridConfig,
    config: PadConfig,

    state: DrawingState,
    start_point: CanvasPoint,
    preview_end: CanvasPoint,
    confirmation: GestureConfirmation,
    gesture_changed_since_start: bool,

    position_buffer: VecDeque<CanvasPoint>,
    last_raw_position: Option<CanvasPoint>,

    /// When set, every finalized line persists the sketch here.
    save_dir: Option<PathBuf>,
    secret: Option<Vec<u8>>,

    frames_processed: u64,
}

impl SketchPad {
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        config: PadConfig,
        grid: GridConfig,
    ) -> SketchPad {
        let sketch = Sketch::new(name, width, height);
        tracing::info!(
            "sketch pad '{}' at {}x{}, grid {} ({}% / {} cm), confirm {} frames",
            sketch.name,
            width,
            height,
            if grid.enabled { "on" } else { "off" },
            grid.grid_spacing_percent,
            grid.real_world_spacing_cm,
            config.required_confirmation_frames,
        );
        SketchPad {
            sketch,
            grid,
            config,
            state: DrawingState::WaitingForStart,
            start_point: CanvasPoint::default(),
            preview_end: CanvasPoint::default(),
            confirmation: GestureConfirmation::default(),
            gesture_changed_since_start: false,
            position_buffer: VecDeque::new(),
            last_raw_position: None,
            save_dir: None,
            secret: None,
            frames_processed: 0,
        }
    }

    /// Re-initialize for a (possibly new) name and resolution. Lines are
    /// preserved when the name matches, so a reload keeps prior work.
    pub fn init(&mut self, name: &str, width: u32, height: u32) {
        let preserving = self.sketch.name == name && !self.sketch.lines.is_empty();
        if preserving {
            tracing::info!(
                "keeping {} lines across re-init of '{name}'",
                self.sketch.lines.len()
            );
        } else {
            self.sketch = Sketch::new(name, width, height);
        }
        self.sketch.name = name.to_string();
        self.sketch.width = width;
        self.sketch.height = height;
        self.reset_machine();
    }

    pub fn set_save_dir(&mut self, dir: impl Into<PathBuf>) {
        self.save_dir = Some(dir.into());
    }

    pub fn set_secret(&mut self, secret: Option<Vec<u8>>) {
        self.secret = secret;
    }

    pub fn sketch(&self) -> &Sketch {
        &self.sketch
    }

    pub fn grid(&self) -> &GridConfig {
        &self.grid
    }

    pub fn state(&self) -> DrawingState {
        self.state
    }

    pub fn start_point(&self) -> CanvasPoint {
        self.start_point
    }

    pub fn preview_end_point(&self) -> CanvasPoint {
        self.preview_end
    }

    pub fn has_preview(&self) -> bool {
        matches!(
            self.state,
            DrawingState::StartConfirmed | DrawingState::WaitingForEnd
        )
    }

    pub fn snapshot(&self) -> PadSnapshot {
        PadSnapshot {
            sketch: self.sketch.clone(),
            grid: self.grid,
            state: self.state,
            start_point: self.start_point,
            preview_end: self.preview_end,
            frames_processed: self.frames_processed,
        }
    }

    pub fn clear(&mut self) {
        self.sketch.lines.clear();
        self.reset_machine();
    }

    fn reset_machine(&mut self) {
        self.state = DrawingState::WaitingForStart;
        self.confirmation.reset();
        self.gesture_changed_since_start = false;
        self.position_buffer.clear();
        self.last_raw_position = None;
    }

    /// Feed one batch of detections. Returns true while a line is being
    /// anchored.
    pub fn update(&mut self, hands: &[HandDetection]) -> bool {
        self.frames_processed += 1;
        self.step_machine(hands);
        self.state != DrawingState::WaitingForStart
    }

    fn step_machine(&mut self, hands: &[HandDetection]) {
        // best drawing hand, by confidence
        let mut drawing_hand: Option<&HandDetection> = None;
        for hand in hands {
            if hand.gesture.is_drawing()
                && drawing_hand
                    .map(|best| hand.bbox.confidence > best.bbox.confidence)
                    .unwrap_or(true)
            {
                drawing_hand = Some(hand);
            }
        }

        let mut has_pointing = false;
        let mut current = CanvasPoint::default();
        let mut active_gesture = Gesture::Unknown;
        let mut confidence = 0.0f32;

        if let Some(hand) = drawing_hand {
            if hand.bbox.confidence > self.config.draw_confidence {
                has_pointing = true;
                active_gesture = hand.gesture;
                confidence = hand.bbox.confidence;

                // fingertip beats blob center for precision
                let (px, py) = match hand.fingertips.first() {
                    Some(tip) => (tip.x as f32, tip.y as f32),
                    None => (hand.center.x as f32, hand.center.y as f32),
                };
                let raw = CanvasPoint::from_pixels(px, py, self.sketch.width, self.sketch.height);
                let raw = self.filter_jitter(raw);

                self.position_buffer.push_back(raw);
                while self.position_buffer.len() > self.config.smoothing_window.max(1) {
                    self.position_buffer.pop_front();
                }

                current = if self.config.predictive_smoothing && self.position_buffer.len() >= 5 {
                    self.predictive_position()
                } else {
                    self.smoothed_position()
                };
            }
        }

        let has_other_gesture = hands.iter().any(|hand| {
            !hand.gesture.is_drawing()
                && hand.gesture != Gesture::Unknown
                && hand.bbox.confidence > self.config.gesture_change_confidence
        });

        match self.state {
            DrawingState::WaitingForStart => {
                if has_pointing {
                    self.advance_confirmation(active_gesture, current, confidence);
                    if self.confirmation.consecutive_frames
                        >= self.config.required_confirmation_frames
                    {
                        self.start_point = self.grid.snap(self.confirmation.position);
                        self.preview_end = self.start_point;
                        self.state = DrawingState::StartConfirmed;
                        self.gesture_changed_since_start = false;
                        tracing::debug!(
                            "start anchored at ({:.1}, {:.1}) after {} frames ({}%, {})",
                            self.start_point.x,
                            self.start_point.y,
                            self.confirmation.consecutive_frames,
                            (self.confirmation.avg_confidence() * 100.0) as i32,
                            active_gesture,
                        );
                        self.confirmation.reset();
                        self.position_buffer.clear();
                    }
                } else if self.confirmation.consecutive_frames > 0 {
                    self.confirmation.reset();
                }
            }

            DrawingState::StartConfirmed => {
                if has_other_gesture {
                    self.arm_end_anchor("gesture changed");
                } else if has_pointing {
                    self.preview_end = current;
                    // same gesture, far enough away, also counts as intent
                    let moved = self.start_point.distance(&current);
                    if moved > self.config.restart_distance_percent {
                        self.arm_end_anchor("hand moved");
                    }
                } else if !self.gesture_changed_since_start {
                    self.arm_end_anchor("hand lost");
                }
            }

            DrawingState::WaitingForEnd => {
                if has_pointing {
                    self.preview_end = current;
                    self.advance_confirmation(active_gesture, current, confidence);
                    if self.confirmation.consecutive_frames
                        >= self.config.required_confirmation_frames
                    {
                        self.preview_end = self.grid.snap(self.confirmation.position);
                        self.state = DrawingState::EndConfirmed;
                        tracing::debug!(
                            "end anchored at ({:.1}, {:.1}) after {} frames ({}%, {})",
                            self.preview_end.x,
                            self.preview_end.y,
                            self.confirmation.consecutive_frames,
                            (self.confirmation.avg_confidence() * 100.0) as i32,
                            active_gesture,
                        );
                    }
                } else if self.confirmation.consecutive_frames > 0 {
                    self.confirmation.reset();
                }
            }

            DrawingState::EndConfirmed => {}
        }

        // both anchors locked: the line lands now
        if self.state == DrawingState::EndConfirmed {
            self.finalize_line();
            self.reset_machine();
        }
    }

    fn advance_confirmation(
        &mut self,
        gesture: Gesture,
        position: CanvasPoint,
        confidence: f32,
    ) {
        if self.confirmation.consecutive_frames > 0
            && position.distance(&self.confirmation.position)
                <= self.config.position_tolerance_percent
        {
            // stable at this spot, keep the latest position
            self.confirmation.consecutive_frames += 1;
            self.confirmation.confidence_sum += confidence;
            self.confirmation.position = position;
            self.confirmation.gesture = gesture;
        } else {
            self.confirmation.restart(gesture, position, confidence);
        }
    }

    fn arm_end_anchor(&mut self, why: &str) {
        tracing::debug!("{why}, waiting for end point");
        self.gesture_changed_since_start = true;
        self.state = DrawingState::WaitingForEnd;
        self.confirmation.reset();
        self.position_buffer.clear();
    }

    fn filter_jitter(&mut self, raw: CanvasPoint) -> CanvasPoint {
        let used = match self.last_raw_position {
            Some(last) if raw.distance(&last) < self.config.jitter_threshold_percent => last,
            _ => raw,
        };
        self.last_raw_position = Some(used);
        used
    }

    /// Exponentially weighted average over the ring, recent samples heavier.
    fn smoothed_position(&self) -> CanvasPoint {
        if self.position_buffer.is_empty() {
            return CanvasPoint::default();
        }
        let n = self.position_buffer.len() as f32;
        let (mut sx, mut sy, mut sw) = (0.0f32, 0.0f32, 0.0f32);
        for (i, p) in self.position_buffer.iter().enumerate() {
            let weight = (i as f32 / n).exp();
            sx += p.x * weight;
            sy += p.y * weight;
            sw += weight;
        }
        CanvasPoint::new(sx / sw, sy / sw)
    }

    /// Smoothed position plus a damped velocity extrapolation from the last
    /// three samples.
    fn predictive_position(&self) -> CanvasPoint {
        let n = self.position_buffer.len();
        if n < 3 {
            return self.smoothed_position();
        }

        let samples = n.min(3);
        let (mut vx, mut vy) = (0.0f32, 0.0f32);
        for i in 0..samples - 1 {
            let idx = n - samples + i;
            vx += self.position_buffer[idx + 1].x - self.position_buffer[idx].x;
            vy += self.position_buffer[idx + 1].y - self.position_buffer[idx].y;
        }
        vx /= (samples - 1) as f32;
        vy /= (samples - 1) as f32;

        const DAMPING: f32 = 0.3;
        let smoothed = self.smoothed_position();
        CanvasPoint::new(smoothed.x + vx * DAMPING, smoothed.y + vy * DAMPING)
    }

    fn finalize_line(&mut self) {
        let length = self.start_point.distance(&self.preview_end);
        if length < self.config.min_line_length_percent {
            tracing::debug!("line too short ({length:.1}%), discarded");
            return;
        }

        let line = Line {
            start: self.start_point,
            end: self.preview_end,
            color: self.config.line_color,
            thickness: self.config.line_thickness,
            timestamp: now_ms(),
        };
        self.sketch.lines.push(line);

        tracing::info!(
            "line #{}: ({:.1}, {:.1}) to ({:.1}, {:.1}), {:.1}% ({:.1} cm)",
            self.sketch.lines.len(),
            line.start.x,
            line.start.y,
            line.end.x,
            line.end.y,
            length,
            line.real_length_cm(&self.grid),
        );

        // persist each confirmed line so a crash loses nothing
        if self.save_dir.is_some() {
            if let Err(err) = self.save(None) {
                tracing::warn!("auto-save after line failed: {err}");
            }
        }
    }

    /// Append a line programmatically, snapped like a drawn one. Segments
    /// under 0.1% are ignored.
    pub fn add_line(&mut self, start: CanvasPoint, end: CanvasPoint) {
        let s = self.grid.snap(start.clamped());
        let e = self.grid.snap(end.clamped());
        if s.distance(&e) < 0.1 {
            tracing::debug!("add_line ignored, too short");
            return;
        }
        self.sketch.lines.push(Line {
            start: s,
            end: e,
            color: self.config.line_color,
            thickness: self.config.line_thickness,
            timestamp: now_ms(),
        });
    }

    /// Persist under `name` (default: the sketch's own name) in the save
    /// directory.
    pub fn save(&self, name: Option<&str>) -> Result<()> {
        let dir = self.save_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        let path = disk::sketch_path(name.unwrap_or(&self.sketch.name), &dir);
        disk::save(&self.sketch, &self.grid, &path, self.secret.as_deref())
    }

    /// Load a signed sketch, replacing the current one. On any failure the
    /// in-memory sketch and state machine are untouched.
    pub fn load(&mut self, name: &str) -> Result<()> {
        let dir = self.save_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let path = disk::sketch_path(name, &dir);
        let (sketch, grid) = disk::load(&path, self.secret.as_deref())?;

        self.sketch = sketch;
        self.grid = grid;
        self.reset_machine();
        Ok(())
    }

    /// Render the grid, all lines, and the live preview into a display
    /// buffer (32bpp XRGB or 16bpp RGB565, selected by `stride / width`).
    pub fn render(&self, buffer: &mut [u8], stride: u32, width: u32, height: u32) {
        let mut canvas = PixelCanvas::new(buffer, stride, width, height);

        if self.grid.enabled && self.grid.grid_spacing_percent > 0.0 {
            self.render_grid(&mut canvas);
        }

        for line in &self.sketch.lines {
            let (x0, y0) = line.start.to_pixels(width, height);
            let (x1, y1) = line.end.to_pixels(width, height);
            let color = if line.color == 0 { 0x00FF_FFFF } else { line.color };

            canvas.fill_disc(x0 as i32, y0 as i32, 4, 0x00FF_FFFF);
            canvas.fill_disc(x1 as i32, y1 as i32, 4, 0x00FF_FFFF);

            if self.config.anti_aliasing {
                graphics::draw_line_aa(
                    &mut canvas,
                    (x0, y0),
                    (x1, y1),
                    color,
                    line.thickness as i32,
                );
            } else {
                graphics::draw_line(
                    &mut canvas,
                    x0 as i32,
                    y0 as i32,
                    x1 as i32,
                    y1 as i32,
                    color,
                    line.thickness as i32,
                );
            }

            if self.grid.show_measurements {
                let mid = CanvasPoint::new(
                    (line.start.x + line.end.x) / 2.0,
                    (line.start.y + line.end.y) / 2.0,
                );
                let (mx, my) = mid.to_pixels(width, height);
                canvas.fill_disc(mx as i32, my as i32, 3, 0x00FF_FF00);
            }
        }

        if self.has_preview() {
            let (x0, y0) = self.start_point.to_pixels(width, height);
            let (x1, y1) = self.preview_end.to_pixels(width, height);
            let color = self.config.line_color & 0x00FF_FFFF;

            if self.config.anti_aliasing {
                graphics::draw_line_aa(
                    &mut canvas,
                    (x0, y0),
                    (x1, y1),
                    color,
                    self.config.line_thickness as i32,
                );
            } else {
                graphics::draw_line(
                    &mut canvas,
                    x0 as i32,
                    y0 as i32,
                    x1 as i32,
                    y1 as i32,
                    color,
                    self.config.line_thickness as i32,
                );
            }

            // green start marker
            canvas.fill_disc(x0 as i32, y0 as i32, 6, 0x0000_FF00);

            // end marker pulses toward white as confirmation progresses
            if self.state == DrawingState::WaitingForEnd {
                let progress = self.confirmation.consecutive_frames as f32
                    / self.config.required_confirmation_frames.max(1) as f32;
                let intensity = (128.0 + 127.0 * progress.min(1.0)) as u32;
                let pulse = (intensity << 16) | (intensity << 8);
                canvas.fill_disc(x1 as i32, y1 as i32, 6, pulse);
            }
        }
    }

    fn render_grid(&self, canvas: &mut PixelCanvas<'_>) {
        let spacing = self.grid.grid_spacing_percent;
        let width = canvas.width();
        let height = canvas.height();

        let mut percent = 0.0f32;
        while percent <= 100.0 {
            let x = (percent / 100.0 * width as f32) as i32;
            for y in 0..height {
                canvas.set(x.min(width - 1), y, self.grid.grid_color);
            }
            percent += spacing;
        }

        let mut percent = 0.0f32;
        while percent <= 100.0 {
            let y = (percent / 100.0 * height as f32) as i32;
            for x in 0..width {
                canvas.set(x, y.min(height - 1), self.grid.grid_color);
            }
            percent += spacing;
        }
    }
}
