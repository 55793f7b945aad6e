//! Binary cache and materialization.
//!
//! For each `(variant, version, platform)` triple the manager produces a
//! directory containing `mongod`, `mongos`, and a shell binary, cached on
//! disk under `packages/` and memoized in memory for the life of the
//! process. Extraction always happens in a staging directory; the presence
//! of `bin/mongod` in the cache slot is the commit point, so two processes
//! racing on the same slot cannot observe a half-written cache.

pub mod shell;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::archive;
use crate::catalog::CatalogClient;
use crate::errors::BinaryError;
use crate::paths::StateRoot;
use crate::platform::{Arch, Os, Platform};
use crate::version::Variant;

/// Debian/Ubuntu codenames probed for percona minimal tarballs and
/// packages, newest first.
const PERCONA_CODENAMES: &[&str] = &[
    "noble", "jammy", "focal", "bookworm", "bullseye", "buster", "stretch", "bionic", "xenial",
];

/// The three packages assembled when no percona tarball exists.
const PERCONA_PACKAGES: &[&str] = &["server", "mongos", "shell"];

pub struct BinaryManager {
    root: StateRoot,
    catalog: Arc<CatalogClient>,
    http: reqwest::Client,
    resolved: Mutex<HashMap<(Variant, String, Platform), PathBuf>>,
}

impl BinaryManager {
    pub fn new(root: StateRoot, catalog: Arc<CatalogClient>) -> Self {
        Self {
            root,
            catalog,
            http: reqwest::Client::new(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a version specifier and materialize the binaries, returning
    /// the cached `bin/` directory. Repeated calls with the same arguments
    /// short-circuit in memory.
    pub async fn get_bin_path(
        &self,
        variant: Variant,
        version_spec: &str,
        platform: Platform,
    ) -> Result<PathBuf, BinaryError> {
        let key = (variant, version_spec.to_string(), platform);
        {
            let resolved = self.resolved.lock().await;
            if let Some(path) = resolved.get(&key) {
                return Ok(path.clone());
            }
        }

        let version = self.catalog.resolve_version(variant, version_spec).await?;
        let cache_dir = self.root.package_dir(variant, &version, platform);
        let bin_dir = cache_dir.join("bin");
        let mongod = bin_dir.join(format!("mongod{}", platform.os.exe_suffix()));

        if mongod.exists() {
            ensure_executable(&mongod).map_err(|source| BinaryError::CacheIo {
                path: mongod.clone(),
                source,
            })?;
            debug!(path = %bin_dir.display(), "binary cache hit");
            self.resolved.lock().await.insert(key, bin_dir.clone());
            return Ok(bin_dir);
        }

        // Serialize materialization of this slot across processes. The
        // post-lock re-check covers a racer that finished while we waited.
        let _guard = self.lock_slot(&cache_dir)?;
        if !mongod.exists() {
            self.materialize(variant, &version, platform, &cache_dir)
                .await?;
            shell::ensure_shell(&self.http, &bin_dir, &version, platform).await;
        }

        self.resolved.lock().await.insert(key, bin_dir.clone());
        Ok(bin_dir)
    }

    fn lock_slot(&self, cache_dir: &Path) -> Result<std::fs::File, BinaryError> {
        let packages = self.root.packages_dir();
        std::fs::create_dir_all(&packages).map_err(|source| BinaryError::CacheIo {
            path: packages.clone(),
            source,
        })?;
        let lock_path = cache_dir.with_extension("lock");
        let lock = std::fs::File::create(&lock_path).map_err(|source| BinaryError::CacheIo {
            path: lock_path.clone(),
            source,
        })?;
        lock.lock_exclusive().map_err(|source| BinaryError::CacheIo {
            path: lock_path,
            source,
        })?;
        Ok(lock)
    }

    /// Download and unpack server binaries into the cache slot.
    async fn materialize(
        &self,
        variant: Variant,
        version: &str,
        platform: Platform,
        cache_dir: &Path,
    ) -> Result<(), BinaryError> {
        info!(%variant, version, %platform, "materializing server binaries");
        let staging = self
            .root
            .packages_dir()
            .join(format!(".staging-{}", Uuid::new_v4()));
        let result = self
            .materialize_into(variant, version, platform, cache_dir, &staging)
            .await;
        let _ = std::fs::remove_dir_all(&staging);
        result
    }

    async fn materialize_into(
        &self,
        variant: Variant,
        version: &str,
        platform: Platform,
        cache_dir: &Path,
        staging: &Path,
    ) -> Result<(), BinaryError> {
        match variant {
            Variant::Official => {
                let url = self.catalog.download_url(version, platform).await?;
                let archive_path = self.download(&url, staging).await?;
                let extract_dir = staging.join("extract");
                run_extract(archive_path, extract_dir.clone()).await?;
                let bin = locate_bin_dir(&extract_dir)?;
                install_executables(&bin, &cache_dir.join("bin"))?;
                Ok(())
            }
            Variant::Percona => {
                if platform.os == Os::Darwin {
                    return Err(BinaryError::PerconaOnDarwin);
                }
                for url in percona_tarball_urls(version, platform) {
                    match self.download(&url, staging).await {
                        Ok(archive_path) => {
                            let extract_dir = staging.join("extract");
                            run_extract(archive_path, extract_dir.clone()).await?;
                            let bin = locate_bin_dir(&extract_dir)?;
                            install_executables(&bin, &cache_dir.join("bin"))?;
                            return Ok(());
                        }
                        Err(err) => debug!(url, %err, "percona tarball candidate failed"),
                    }
                }

                if platform.is_linux_amd64() {
                    println!(
                        "Warning: no percona tarball found for {version}; assembling from packages"
                    );
                    return self.assemble_from_packages(version, cache_dir, staging).await;
                }

                Err(BinaryError::AllSourcesExhausted {
                    variant: variant.to_string(),
                    version: version.to_string(),
                    platform: platform.to_string(),
                })
            }
        }
    }

    /// Older percona releases ship no tarball at all; pull the `server`,
    /// `mongos`, and `shell` packages and merge their executables.
    async fn assemble_from_packages(
        &self,
        version: &str,
        cache_dir: &Path,
        staging: &Path,
    ) -> Result<(), BinaryError> {
        for package in PERCONA_PACKAGES {
            let mut unpacked = false;
            for url in percona_package_urls(version, package) {
                match self.download(&url, staging).await {
                    Ok(archive_path) => {
                        let extract_dir = staging.join(format!("extract-{package}"));
                        run_extract(archive_path, extract_dir.clone()).await?;
                        install_executables(&extract_dir.join("bin"), &cache_dir.join("bin"))?;
                        unpacked = true;
                        break;
                    }
                    Err(err) => debug!(url, %err, "percona package candidate failed"),
                }
            }
            if !unpacked {
                return Err(BinaryError::AllSourcesExhausted {
                    variant: Variant::Percona.to_string(),
                    version: format!("{version} ({package} package)"),
                    platform: "linux-amd64".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Fetch a URL into the staging directory, verifying the HTTP status.
    async fn download(&self, url: &str, staging: &Path) -> Result<PathBuf, BinaryError> {
        std::fs::create_dir_all(staging).map_err(|source| BinaryError::CacheIo {
            path: staging.to_path_buf(),
            source,
        })?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| BinaryError::Download {
                url: url.to_string(),
                source,
            })?;
        let status = response.status().as_u16();
        if !(response.status().is_success() || status == 301 || status == 302) {
            return Err(BinaryError::DownloadStatus {
                url: url.to_string(),
                status,
            });
        }

        let filename = url.rsplit('/').next().unwrap_or("download");
        let target = staging.join(filename);
        let bytes = response
            .bytes()
            .await
            .map_err(|source| BinaryError::Download {
                url: url.to_string(),
                source,
            })?;
        std::fs::write(&target, &bytes).map_err(|source| BinaryError::CacheIo {
            path: target.clone(),
            source,
        })?;
        debug!(url, bytes = bytes.len(), "downloaded archive");
        Ok(target)
    }
}

async fn run_extract(archive_path: PathBuf, dest: PathBuf) -> Result<(), BinaryError> {
    let dest_for_error = dest.clone();
    tokio::task::spawn_blocking(move || archive::extract_archive(&archive_path, &dest))
        .await
        .map_err(|e| BinaryError::CacheIo {
            path: dest_for_error,
            source: std::io::Error::other(e),
        })?
        .map_err(BinaryError::from)
}

/// Find the `bin/` directory of an extracted archive: either directly at
/// the extract root, or inside exactly one `mongodb-*` child.
pub(crate) fn locate_bin_dir(extract_root: &Path) -> Result<PathBuf, BinaryError> {
    let direct = extract_root.join("bin");
    if direct.is_dir() {
        return Ok(direct);
    }

    let mut candidates = Vec::new();
    if let Ok(entries) = std::fs::read_dir(extract_root) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("mongodb-") && entry.path().join("bin").is_dir() {
                candidates.push(entry.path().join("bin"));
            }
        }
    }
    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        _ => Err(BinaryError::NoBinDirectory(extract_root.to_path_buf())),
    }
}

/// Copy executable files from a staging `bin/` into the cache slot.
pub(crate) fn install_executables(src_bin: &Path, dest_bin: &Path) -> Result<(), BinaryError> {
    std::fs::create_dir_all(dest_bin).map_err(|source| BinaryError::CacheIo {
        path: dest_bin.to_path_buf(),
        source,
    })?;
    let entries = std::fs::read_dir(src_bin).map_err(|source| BinaryError::CacheIo {
        path: src_bin.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_executable(&path) {
            continue;
        }
        let target = dest_bin.join(entry.file_name());
        std::fs::copy(&path, &target).map_err(|source| BinaryError::CacheIo {
            path: target.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path)?;
    let mut permissions = metadata.permissions();
    if permissions.mode() & 0o111 == 0 {
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Minimal-tarball candidates across the codename list.
pub(crate) fn percona_tarball_urls(version: &str, platform: Platform) -> Vec<String> {
    let minor = version
        .split('.')
        .take(2)
        .collect::<Vec<_>>()
        .join(".");
    let arch = match platform.arch {
        Arch::Amd64 => "x86_64",
        Arch::Arm64 => "aarch64",
    };
    PERCONA_CODENAMES
        .iter()
        .map(|codename| {
            format!(
                "https://downloads.percona.com/downloads/percona-server-mongodb-{minor}/percona-server-mongodb-{version}/binary/tarball/percona-server-mongodb-{version}-{arch}.{codename}-minimal.tar.gz"
            )
        })
        .collect()
}

/// Candidate package URLs for one of the `server` / `mongos` / `shell`
/// packages, across the codename list. linux/amd64 only.
pub(crate) fn percona_package_urls(version: &str, package: &str) -> Vec<String> {
    let repo = version
        .split('.')
        .take(2)
        .collect::<Vec<_>>()
        .join("");
    PERCONA_CODENAMES
        .iter()
        .map(|codename| {
            format!(
                "https://repo.percona.com/psmdb-{repo}/apt/pool/main/p/percona-server-mongodb/percona-server-mongodb-{package}_{version}.{codename}_amd64.deb"
            )
        })
        .collect()
}
