//! Signed `.jarvis` sketch files.
//!
//! The on-disk format is UTF-8 RON text with the sketch fields plus a
//! `signature` entry. The signature is computed over a canonical binary
//! encoding of the document with the signature itself excluded: the typed
//! document is bincode-encoded (field order fixed by the types, so the bytes
//! are deterministic), then HMAC-SHA256 under the configured secret, or
//! plain SHA-256 when no secret is set. Writes go through a temp file with
//! mode 0600 and an atomic rename.

use crate::{
    error::{JarvisError, Result},
    sketch::{CanvasPoint, GridConfig, Line, Sketch},
    SKETCH_EXT,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode)]
pub struct LineDoc {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    #[serde(default = "default_line_color")]
    pub color: u32,
    #[serde(default = "default_line_thickness")]
    pub thickness: u32,
}

fn default_line_color() -> u32 {
    0x00FF_FFFF
}

fn default_line_thickness() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode)]
pub struct GridDoc {
    pub grid_spacing_percent: f32,
    pub real_world_spacing_cm: f32,
    pub snap_to_grid: bool,
    pub show_measurements: bool,
}

/// The signed portion of a sketch file.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode)]
pub struct SketchDoc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub created_timestamp: u64,
    pub grid: GridDoc,
    pub lines: Vec<LineDoc>,
}

/// The complete on-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SketchFile {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub created_timestamp: u64,
    pub grid: GridDoc,
    pub lines: Vec<LineDoc>,
    /// Lowercase hex digest over the canonical encoding of the rest.
    pub signature: String,
}

impl SketchFile {
    pub fn doc(&self) -> SketchDoc {
        SketchDoc {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            created_timestamp: self.created_timestamp,
            grid: self.grid.clone(),
            lines: self.lines.clone(),
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}

/// Digest of an arbitrary payload: HMAC-SHA256 under `secret`, or SHA-256
/// when unsigned.
pub fn signature_hex(payload: &[u8], secret: Option<&[u8]>) -> String {
    match secret {
        Some(key) => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key)
                .expect("hmac-sha256 accepts any key length");
            mac.update(payload);
            hex_string(&mac.finalize().into_bytes())
        }
        None => hex_string(&Sha256::digest(payload)),
    }
}

/// Canonical signature of a document.
pub fn signature_for(doc: &SketchDoc, secret: Option<&[u8]>) -> Result<String> {
    let payload = bincode::encode_to_vec(doc, bincode::config::standard())
        .map_err(|e| JarvisError::Parse(format!("canonical encoding failed: {e}")))?;
    Ok(signature_hex(&payload, secret))
}

fn to_doc(sketch: &Sketch, grid: &GridConfig) -> SketchDoc {
    SketchDoc {
        name: sketch.name.clone(),
        width: sketch.width,
        height: sketch.height,
        created_timestamp: sketch.created_timestamp,
        grid: GridDoc {
            grid_spacing_percent: grid.grid_spacing_percent,
            real_world_spacing_cm: grid.real_world_spacing_cm,
            snap_to_grid: grid.snap_to_grid,
            show_measurements: grid.show_measurements,
        },
        lines: sketch
            .lines
            .iter()
            .map(|line| LineDoc {
                x0: line.start.x,
                y0: line.start.y,
                x1: line.end.x,
                y1: line.end.y,
                color: line.color,
                thickness: line.thickness,
            })
            .collect(),
    }
}

fn from_doc(doc: SketchDoc) -> (Sketch, GridConfig) {
    let grid = GridConfig {
        // grid info in the file means the grid was in use
        enabled: true,
        grid_spacing_percent: doc.grid.grid_spacing_percent,
        real_world_spacing_cm: doc.grid.real_world_spacing_cm,
        snap_to_grid: doc.grid.snap_to_grid,
        show_measurements: doc.grid.show_measurements,
        ..GridConfig::default()
    };
    let sketch = Sketch {
        name: doc.name,
        width: doc.width,
        height: doc.height,
        created_timestamp: doc.created_timestamp,
        lines: doc
            .lines
            .into_iter()
            .map(|l| Line {
                start: CanvasPoint::new(l.x0, l.y0),
                end: CanvasPoint::new(l.x1, l.y1),
                color: l.color,
                thickness: l.thickness,
                timestamp: 0,
            })
            .collect(),
    };
    (sketch, grid)
}

/// Resolve `name` under `dir`, appending the sketch extension if absent.
pub fn sketch_path(name: &str, dir: &Path) -> PathBuf {
    let mut path = dir.join(name);
    let has_ext = path.extension() == Some(std::ffi::OsStr::new(SKETCH_EXT));
    if !has_ext {
        let mut os = path.into_os_string();
        os.push(".");
        os.push(SKETCH_EXT);
        path = PathBuf::from(os);
    }
    path
}

/// Serialize, sign, and atomically replace `path`. On any write failure the
/// temp file is removed and the previous file is left untouched.
pub fn save(sketch: &Sketch, grid: &GridConfig, path: &Path, secret: Option<&[u8]>) -> Result<()> {
    let doc = to_doc(sketch, grid);
    let signature = signature_for(&doc, secret)?;
    let file = SketchFile {
        name: doc.name,
        width: doc.width,
        height: doc.height,
        created_timestamp: doc.created_timestamp,
        grid: doc.grid,
        lines: doc.lines,
        signature,
    };

    write_file(&file, path)?;
    tracing::info!("saved sketch to {}", path.display());
    Ok(())
}

/// Serialize a complete document and atomically replace `path`.
pub fn write_file(file: &SketchFile, path: &Path) -> Result<()> {
    let text = ron::ser::to_string_pretty(
        file,
        ron::ser::PrettyConfig::new()
            .new_line(String::from("\n"))
            .indentor(String::from("  ")),
    )
    .map_err(|e| JarvisError::Parse(format!("sketch serialization failed: {e}")))?;

    let mut tmp_os = path.as_os_str().to_owned();
    tmp_os.push(".tmp");
    let tmp = PathBuf::from(tmp_os);

    if let Err(err) = write_private(&tmp, text.as_bytes()) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    Ok(())
}

/// Parse and verify a sketch file without converting it, for tooling.
pub fn read_file(path: &Path) -> Result<SketchFile> {
    let text = std::fs::read_to_string(path)?;
    ron::from_str(&text).map_err(|e| JarvisError::Parse(e.to_string()))
}

/// Load a signed sketch. Fails with [`JarvisError::Parse`] on malformed
/// content and [`JarvisError::Tamper`] when the signature does not match;
/// neither touches any caller state.
pub fn load(path: &Path, secret: Option<&[u8]>) -> Result<(Sketch, GridConfig)> {
    let file = read_file(path)?;

    let expected = signature_for(&file.doc(), secret)?;
    if expected != file.signature.to_lowercase() {
        tracing::warn!("signature mismatch on {}", path.display());
        return Err(JarvisError::Tamper);
    }

    tracing::info!("loaded sketch from {}", path.display());
    Ok(from_doc(file.doc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sketch() -> Sketch {
        let mut sketch = Sketch::new("t", 640, 480);
        sketch.lines.push(Line {
            start: CanvasPoint::new(0.0, 0.0),
            end: CanvasPoint::new(100.0, 100.0),
            ..Line::default()
        });
        sketch
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = sketch_path("t", dir.path());
        let sketch = sample_sketch();
        save(&sketch, &GridConfig::default(), &path, None).unwrap();

        let (loaded, grid) = load(&path, None).unwrap();
        assert_eq!(loaded.name, "t");
        assert_eq!((loaded.width, loaded.height), (640, 480));
        assert_eq!(loaded.lines.len(), 1);
        assert!((loaded.lines[0].start.x - 0.0).abs() < 1e-6);
        assert!((loaded.lines[0].end.x - 100.0).abs() < 1e-6);
        assert!((loaded.lines[0].end.y - 100.0).abs() < 1e-6);
        assert!(grid.snap_to_grid);
    }

    #[test]
    fn extension_is_appended_once() {
        let dir = Path::new("/tmp");
        assert_eq!(
            sketch_path("t", dir),
            PathBuf::from("/tmp/t.jarvis")
        );
        assert_eq!(
            sketch_path("t.jarvis", dir),
            PathBuf::from("/tmp/t.jarvis")
        );
    }

    #[test]
    fn tampered_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = sketch_path("t", dir.path());
        save(&sample_sketch(), &GridConfig::default(), &path, None).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let bent = text.replacen("x0: 0", "x0: 9", 1);
        assert_ne!(text, bent);
        std::fs::write(&path, bent).unwrap();

        assert!(matches!(load(&path, None), Err(JarvisError::Tamper)));
    }

    #[test]
    fn secret_mismatch_is_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let path = sketch_path("t", dir.path());
        save(
            &sample_sketch(),
            &GridConfig::default(),
            &path,
            Some(b"alpha"),
        )
        .unwrap();

        assert!(load(&path, Some(b"alpha")).is_ok());
        assert!(matches!(
            load(&path, Some(b"beta")),
            Err(JarvisError::Tamper)
        ));
        assert!(matches!(load(&path, None), Err(JarvisError::Tamper)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = sketch_path("junk", dir.path());
        std::fs::write(&path, "not a sketch at all").unwrap();
        assert!(matches!(load(&path, None), Err(JarvisError::Parse(_))));
    }

    #[test]
    fn missing_signature_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = sketch_path("nosig", dir.path());
        std::fs::write(
            &path,
            "(name: \"x\", width: 1, height: 1, created_timestamp: 0, \
             grid: (grid_spacing_percent: 5.0, real_world_spacing_cm: 10.0, \
             snap_to_grid: true, show_measurements: false), lines: [])",
        )
        .unwrap();
        assert!(matches!(load(&path, None), Err(JarvisError::Parse(_))));
    }

    #[test]
    fn missing_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = sketch_path("absent", dir.path());
        assert!(matches!(load(&path, None), Err(JarvisError::Io(_))));
    }

    #[test]
    fn signature_is_deterministic_and_keyed() {
        let doc = to_doc(&sample_sketch(), &GridConfig::default());
        let a = signature_for(&doc, None).unwrap();
        let b = signature_for(&doc, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let keyed = signature_for(&doc, Some(b"k")).unwrap();
        assert_ne!(a, keyed);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = sketch_path("perm", dir.path());
        save(&sample_sketch(), &GridConfig::default(), &path, None).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
