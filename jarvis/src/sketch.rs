//! The persisted drawing model. Everything here lives in canvas
//! coordinates: percentages of the canvas in [0, 100] on both axes, so a
//! sketch renders identically at any output resolution. Pixel coordinates
//! never reach this layer.

use crate::CANVAS_MAX;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resolution-independent point in percent of the canvas.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasPoint {
    pub x: f32,
    pub y: f32,
}

impl CanvasPoint {
    pub fn new(x: f32, y: f32) -> CanvasPoint {
        CanvasPoint { x, y }
    }

    pub fn distance(&self, other: &CanvasPoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Map a pixel position into canvas space, clamped to the canvas.
    pub fn from_pixels(px: f32, py: f32, width: u32, height: u32) -> CanvasPoint {
        CanvasPoint {
            x: (px / width.max(1) as f32 * CANVAS_MAX).clamp(0.0, CANVAS_MAX),
            y: (py / height.max(1) as f32 * CANVAS_MAX).clamp(0.0, CANVAS_MAX),
        }
    }

    /// Clamp onto the canvas.
    pub fn clamped(self) -> CanvasPoint {
        CanvasPoint {
            x: self.x.clamp(0.0, CANVAS_MAX),
            y: self.y.clamp(0.0, CANVAS_MAX),
        }
    }

    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32) {
        (
            self.x / CANVAS_MAX * width as f32,
            self.y / CANVAS_MAX * height as f32,
        )
    }
}

/// Grid geometry and behavior, persisted with the sketch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "grid_default::enabled")]
    pub enabled: bool,
    #[serde(default = "grid_default::grid_spacing_percent")]
    pub grid_spacing_percent: f32,
    /// Real-world length of one grid cell, for measurement labels.
    #[serde(default = "grid_default::real_world_spacing_cm")]
    pub real_world_spacing_cm: f32,
    #[serde(default = "grid_default::snap_to_grid")]
    pub snap_to_grid: bool,
    #[serde(default = "grid_default::show_measurements")]
    pub show_measurements: bool,
    #[serde(default = "grid_default::grid_color")]
    pub grid_color: u32,
}

mod grid_default {
    pub fn enabled() -> bool {
        true
    }
    pub fn grid_spacing_percent() -> f32 {
        5.0
    }
    pub fn real_world_spacing_cm() -> f32 {
        10.0
    }
    pub fn snap_to_grid() -> bool {
        true
    }
    pub fn show_measurements() -> bool {
        false
    }
    pub fn grid_color() -> u32 {
        0x0030_3030
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            enabled: grid_default::enabled(),
            grid_spacing_percent: grid_default::grid_spacing_percent(),
            real_world_spacing_cm: grid_default::real_world_spacing_cm(),
            snap_to_grid: grid_default::snap_to_grid(),
            show_measurements: grid_default::show_measurements(),
            grid_color: grid_default::grid_color(),
        }
    }
}

impl GridConfig {
    /// Project a point onto the nearest grid intersection, clamped to the
    /// canvas. A no-op when snapping or the grid is off.
    pub fn snap(&self, p: CanvasPoint) -> CanvasPoint {
        if !self.snap_to_grid || !self.enabled {
            return p;
        }
        let spacing = self.grid_spacing_percent;
        CanvasPoint {
            x: ((p.x / spacing).round() * spacing).clamp(0.0, CANVAS_MAX),
            y: ((p.y / spacing).round() * spacing).clamp(0.0, CANVAS_MAX),
        }
    }
}

/// One anchored line segment in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: CanvasPoint,
    pub end: CanvasPoint,
    /// ARGB, rendered opaque.
    pub color: u32,
    pub thickness: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Default for Line {
    fn default() -> Self {
        Line {
            start: CanvasPoint::default(),
            end: CanvasPoint::default(),
            color: 0x00FF_FFFF,
            thickness: 3,
            timestamp: 0,
        }
    }
}

impl Line {
    pub fn length_percent(&self) -> f32 {
        self.start.distance(&self.end)
    }

    /// Length in real-world centimeters through the grid scale.
    pub fn real_length_cm(&self, grid: &GridConfig) -> f32 {
        if grid.grid_spacing_percent <= 0.0 {
            return 0.0;
        }
        self.length_percent() / grid.grid_spacing_percent * grid.real_world_spacing_cm
    }
}

/// A named drawing: ordered lines plus capture-time canvas geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Milliseconds since the Unix epoch at creation.
    pub created_timestamp: u64,
    pub lines: Vec<Line>,
}

impl Default for Sketch {
    fn default() -> Self {
        Sketch {
            name: String::new(),
            width: 640,
            height: 480,
            created_timestamp: 0,
            lines: Vec::new(),
        }
    }
}

impl Sketch {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Sketch {
        Sketch {
            name: name.into(),
            width,
            height,
            created_timestamp: now_ms(),
            lines: Vec::new(),
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
