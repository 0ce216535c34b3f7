//! `certivo setup` downloads the face-mesh ONNX model and pins its checksum.

use anyhow::{bail, Context, Result};
use certivo_media::{sha256_file_hex, verify_model, IntegrityError};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// `$XDG_DATA_HOME/certivo/models`, falling back to `~/.local/share/certivo/models`.
fn default_model_dir(get: impl Fn(&str) -> Option<String>) -> PathBuf {
    let data_home = get("XDG_DATA_HOME").unwrap_or_else(|| {
        let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
        format!("{home}/.local/share")
    });
    PathBuf::from(data_home).join("certivo/models")
}

fn is_sha256_hex(digest: &str) -> bool {
    digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Stream `url` into `dest` via a `.part` file, renaming only once the checksum matches.
fn download_model(url: &str, expected_sha256: &str, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {url}...");

    let resp = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length.filter(|&len| len > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    drop(file);

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    if let Err(e) = verify_model(&tmp_path, expected_sha256) {
        fs::remove_file(&tmp_path).ok();
        return Err(e.into());
    }
    println!("ok");

    tracing::info!(url, bytes = total, dest = %dest.display(), "model downloaded");
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    Ok(())
}

/// Download the model into `model_dir/file_name` unless an intact copy is already there.
///
/// Returns the model path.
pub fn run(
    url: &str,
    expected_sha256: &str,
    model_dir: Option<PathBuf>,
    file_name: &str,
) -> Result<PathBuf> {
    let expected = expected_sha256.trim().to_ascii_lowercase();
    if !is_sha256_hex(&expected) {
        bail!("--sha256 must be 64 hex characters, got {expected_sha256:?}");
    }

    let dir = model_dir.unwrap_or_else(|| default_model_dir(|key| std::env::var(key).ok()));
    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let dest = dir.join(file_name);
    if dest.exists() {
        match verify_model(&dest, &expected) {
            Ok(()) => {
                println!("  {file_name} already present (checksum ok)");
                return Ok(dest);
            }
            Err(IntegrityError::Mismatch { got, .. }) => {
                tracing::warn!(file = file_name, got = %got, "checksum mismatch");
                println!("  {file_name} exists but checksum differs, re-downloading");
            }
            Err(e) => {
                tracing::warn!(file = file_name, error = %e, "existing model unreadable");
                println!("  {file_name} exists but unreadable ({e}), re-downloading");
            }
        }
    }

    download_model(url, &expected, &dest)?;
    println!();
    println!(
        "Setup complete: {} ({})",
        dest.display(),
        sha256_file_hex(&dest)?
    );
    Ok(dest)
}
