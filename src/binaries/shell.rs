//! Shell binary materialization.
//!
//! Servers 4.0 and newer no longer bundle a shell, so a pinned release of
//! the modern shell is fetched from the downloads host alongside the
//! server binaries. The pin avoids consulting a rate-limited release API
//! during bring-up. A failed shell fetch degrades to a warning; the server
//! binaries remain usable.

use std::path::Path;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::archive;
use crate::errors::BinaryError;
use crate::platform::{Arch, Os, Platform};
use crate::version::wants_modern_shell;

/// The modern shell release fetched for servers >= 4.0.
pub const MONGOSH_PINNED_VERSION: &str = "2.3.8";

/// Make sure a shell sits next to the server binaries in `bin_dir`.
/// Never fails the overall materialization.
pub async fn ensure_shell(
    http: &reqwest::Client,
    bin_dir: &Path,
    server_version: &str,
    platform: Platform,
) {
    if wants_modern_shell(server_version) {
        let mongosh = bin_dir.join(format!("mongosh{}", platform.os.exe_suffix()));
        if mongosh.exists() {
            return;
        }
        if let Err(err) = fetch_mongosh(http, bin_dir, platform).await {
            println!("Warning: failed to fetch mongosh {MONGOSH_PINNED_VERSION}: {err}");
            warn!(%err, "mongosh fetch failed; continuing without a shell");
        }
    } else {
        // Pre-4.0 servers bundle the legacy shell in the server archive.
        let legacy = bin_dir.join(format!("mongo{}", platform.os.exe_suffix()));
        if !legacy.exists() {
            println!(
                "Warning: server archive for {server_version} did not include the legacy mongo shell"
            );
        }
    }
}

/// Download URL for the pinned shell on one platform.
pub(crate) fn mongosh_url(platform: Platform) -> String {
    let arch = match platform.arch {
        Arch::Amd64 => "x64",
        Arch::Arm64 => "arm64",
    };
    match platform.os {
        Os::Linux => format!(
            "https://downloads.mongodb.com/compass/mongosh-{MONGOSH_PINNED_VERSION}-linux-{arch}.tgz"
        ),
        Os::Darwin => format!(
            "https://downloads.mongodb.com/compass/mongosh-{MONGOSH_PINNED_VERSION}-darwin-{arch}.zip"
        ),
        Os::Windows => format!(
            "https://downloads.mongodb.com/compass/mongosh-{MONGOSH_PINNED_VERSION}-win32-x64.zip"
        ),
    }
}

async fn fetch_mongosh(
    http: &reqwest::Client,
    bin_dir: &Path,
    platform: Platform,
) -> Result<(), BinaryError> {
    let url = mongosh_url(platform);
    debug!(url, "fetching pinned mongosh");

    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|source| BinaryError::Download {
            url: url.clone(),
            source,
        })?;
    if !response.status().is_success() {
        return Err(BinaryError::DownloadStatus {
            url,
            status: response.status().as_u16(),
        });
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|source| BinaryError::Download {
            url: url.clone(),
            source,
        })?;

    let staging = bin_dir
        .parent()
        .unwrap_or(bin_dir)
        .join(format!(".shell-staging-{}", Uuid::new_v4()));
    let result = unpack_shell(&bytes, &url, &staging, bin_dir, platform).await;
    let _ = std::fs::remove_dir_all(&staging);
    result
}

async fn unpack_shell(
    bytes: &[u8],
    url: &str,
    staging: &Path,
    bin_dir: &Path,
    platform: Platform,
) -> Result<(), BinaryError> {
    std::fs::create_dir_all(staging).map_err(|source| BinaryError::CacheIo {
        path: staging.to_path_buf(),
        source,
    })?;
    let filename = url.rsplit('/').next().unwrap_or("mongosh.tgz");
    let archive_path = staging.join(filename);
    std::fs::write(&archive_path, bytes).map_err(|source| BinaryError::CacheIo {
        path: archive_path.clone(),
        source,
    })?;

    let extract_dir = staging.join("extract");
    {
        let archive_path = archive_path.clone();
        let extract_dir_for_closure = extract_dir.clone();
        tokio::task::spawn_blocking(move || {
            archive::extract_archive(&archive_path, &extract_dir_for_closure)
        })
        .await
        .map_err(|e| BinaryError::CacheIo {
            path: extract_dir.clone(),
            source: std::io::Error::other(e),
        })??;
    }

    let shell_name = format!("mongosh{}", platform.os.exe_suffix());
    let extracted = extract_dir.join("bin").join(&shell_name);
    let source_path = if extracted.exists() {
        extracted
    } else {
        // Some shell archives place the binary at the extract root.
        extract_dir.join(&shell_name)
    };
    let target = bin_dir.join(&shell_name);
    std::fs::copy(&source_path, &target).map_err(|source| BinaryError::CacheIo {
        path: target,
        source,
    })?;
    Ok(())
}
