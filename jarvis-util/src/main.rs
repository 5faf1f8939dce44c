//! Inspect, verify, and re-sign `.jarvis` sketch files.

use anyhow::{bail, Context, Result};
use gumdrop::Options;
use jarvis::disk;
use std::path::PathBuf;

#[derive(gumdrop::Options, Debug)]
pub struct Args {
    #[options(help = "Show this message")]
    help: bool,

    #[options(help = "Print the version", short = "V")]
    pub version: bool,

    #[options(help = "Signing secret (default: the JARVIS_SECRET environment variable)")]
    pub secret: Option<String>,

    #[options(help = "Recompute and store the signature", short = "R")]
    pub resign: bool,

    #[options(free, help = "Sketch file to analyze")]
    pub path: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse_args_default_or_exit();

    if args.version {
        println!("jarvis file util version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(path) = args.path.as_ref() else {
        bail!("no file given, try --help");
    };

    let secret = args
        .secret
        .map(String::into_bytes)
        .or_else(jarvis::secret_from_env);

    let file = disk::read_file(path)
        .with_context(|| format!("reading {}", path.display()))?;

    println!("{}", path.display());
    println!("  name:    {}", file.name);
    println!("  canvas:  {}x{}", file.width, file.height);
    println!("  created: {} ms since epoch", file.created_timestamp);
    println!(
        "  grid:    {}% per cell, {} cm, snap {}",
        file.grid.grid_spacing_percent,
        file.grid.real_world_spacing_cm,
        if file.grid.snap_to_grid { "on" } else { "off" },
    );
    println!("  lines:   {}", file.lines.len());

    let expected = disk::signature_for(&file.doc(), secret.as_deref())?;
    let valid = expected == file.signature.to_lowercase();
    println!(
        "  signature: {} ({})",
        file.signature,
        if valid { "valid" } else { "MISMATCH" },
    );

    if args.resign {
        if valid {
            println!("signature already correct, nothing to do");
            return Ok(());
        }
        let mut resigned = file;
        resigned.signature = expected;
        disk::write_file(&resigned, path)
            .with_context(|| format!("rewriting {}", path.display()))?;
        println!("re-signed {}", path.display());
    } else if !valid {
        bail!("signature mismatch (use --resign to fix after intentional edits)");
    }

    Ok(())
}
