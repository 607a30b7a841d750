//! Makes sure the camera's video file is on disk before the pipeline starts.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    /// On disk, nothing to verify against.
    Present,
    /// On disk with the configured checksum.
    Verified,
    Downloaded,
}

/// Checks `path` against `md5` and downloads it from `url` when it is missing
/// or corrupt. A download is written next to the target and only renamed into
/// place once verified.
pub async fn ensure_video(path: &Path, md5: Option<&str>, url: Option<&str>) -> anyhow::Result<AssetStatus> {
    let expected = md5.map(|s| s.trim().to_ascii_lowercase());

    if tokio::fs::try_exists(path).await? {
        let Some(expected) = &expected else {
            log::warn!("[Assets] {} present, no checksum configured", path.display());
            return Ok(AssetStatus::Present);
        };
        let actual = file_md5(path).await?;
        if &actual == expected {
            log::info!("[Assets] {} verified ({})", path.display(), actual);
            return Ok(AssetStatus::Verified);
        }
        log::warn!(
            "[Assets] {} checksum mismatch: expected {}, got {}",
            path.display(),
            expected,
            actual
        );
    }

    let Some(url) = url else {
        anyhow::bail!(
            "video {} is missing or corrupt and no download_url is configured",
            path.display()
        );
    };

    let partial = partial_path(path);
    let result = fetch_verified(url, &partial, expected.as_deref()).await;
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    tokio::fs::rename(&partial, path).await?;
    log::info!("[Assets] {} downloaded from {}", path.display(), url);
    Ok(AssetStatus::Downloaded)
}

async fn fetch_verified(url: &str, dest: &Path, expected: Option<&str>) -> anyhow::Result<()> {
    let written = download(url, dest).await?;
    log::info!("[Assets] fetched {} bytes from {}", written, url);
    if let Some(expected) = expected {
        let actual = file_md5(dest).await?;
        if actual != expected {
            anyhow::bail!("downloaded file checksum {} does not match {}", actual, expected);
        }
    }
    Ok(())
}

async fn download(url: &str, dest: &Path) -> anyhow::Result<u64> {
    let mut response = reqwest::get(url).await?.error_for_status()?;
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

/// Lowercase hex MD5 of a file, hashed off the async runtime.
pub async fn file_md5(path: &Path) -> anyhow::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut context = md5::Context::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            context.consume(&buf[..n]);
        }
        Ok(format!("{:x}", context.compute()))
    })
    .await?
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
