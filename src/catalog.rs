//! Upstream version catalog client.
//!
//! Fetches the official download manifest once per process, backed by a
//! disk cache with a 24 hour max age under the state root. Resolution and
//! URL selection are pure functions over the parsed catalog so they stay
//! testable without a network.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::CatalogError;
use crate::paths::StateRoot;
use crate::platform::{Arch, Os, Platform};
use crate::version::{Variant, Version, parse_minor_spec};

pub const MANIFEST_URL: &str = "https://downloads.mongodb.org/full.json";
const CACHE_MAX_AGE_HOURS: i64 = 24;

/// One downloadable artifact listed for a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Download {
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub edition: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    pub downloads: Vec<Download>,
}

/// A cached, time-bounded snapshot of the upstream manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionCatalog {
    pub fetched_at: DateTime<Utc>,
    pub entries: Vec<VersionEntry>,
}

impl VersionCatalog {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at < ChronoDuration::hours(CACHE_MAX_AGE_HOURS)
    }

    /// Resolve an official two- or three-component specifier to an exact
    /// listed version.
    ///
    /// A `X.Y` spec selects the highest `X.Y.Z` that is not a pre-release;
    /// a `X.Y.Z` spec must be listed verbatim.
    pub fn resolve_official(&self, spec: &str) -> Result<String, CatalogError> {
        if let Some((major, minor)) = parse_minor_spec(spec) {
            let best = self
                .entries
                .iter()
                .filter_map(|e| Version::parse(&e.version))
                .filter(|v| v.matches_minor(major, minor) && !v.is_prerelease())
                .max();
            return match best {
                Some(v) => Ok(v.to_string()),
                None => Err(CatalogError::VersionNotFound {
                    variant: Variant::Official.to_string(),
                    spec: spec.to_string(),
                }),
            };
        }

        if self.entries.iter().any(|e| e.version == spec) {
            Ok(spec.to_string())
        } else {
            Err(CatalogError::VersionNotFound {
                variant: Variant::Official.to_string(),
                spec: spec.to_string(),
            })
        }
    }

    /// Pick the download URL for `(version, platform)`.
    ///
    /// Community editions (`""`, `base`, `targeted`) are preferred over
    /// `enterprise`; within an edition rank the first listed match wins.
    pub fn download_for(&self, version: &str, platform: Platform) -> Result<String, CatalogError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.version == version)
            .ok_or_else(|| CatalogError::VersionNotFound {
                variant: Variant::Official.to_string(),
                spec: version.to_string(),
            })?;

        let mut best: Option<(u8, &Download)> = None;
        for download in &entry.downloads {
            if !platform.arch.matches_token(&download.arch) {
                continue;
            }
            if !target_matches_os(platform.os, &download.target, &download.url) {
                continue;
            }
            let rank = edition_rank(&download.edition);
            if best.map_or(true, |(r, _)| rank < r) {
                best = Some((rank, download));
            }
        }

        best.map(|(_, d)| d.url.clone())
            .ok_or_else(|| CatalogError::NoDownloadForPlatform {
                version: version.to_string(),
                platform: platform.to_string(),
            })
    }
}

fn edition_rank(edition: &str) -> u8 {
    match edition {
        "" | "base" | "targeted" => 0,
        "enterprise" => 1,
        _ => 2,
    }
}

/// OS target token matching. Darwin accepts both the `osx` and `macos`
/// spellings seen in different manifest eras; linux matches any
/// distribution token or a URL that names linux.
fn target_matches_os(os: Os, target: &str, url: &str) -> bool {
    match os {
        Os::Darwin => {
            target == "osx" || target == "osx-ssl" || target.starts_with("macos") || target.starts_with("osx")
        }
        Os::Linux => {
            ["linux", "ubuntu", "rhel", "debian"]
                .iter()
                .any(|t| target.contains(t))
                || url.contains("linux")
        }
        Os::Windows => target.contains("windows"),
    }
}

// Raw shapes of the upstream manifest; flattened into `VersionCatalog` on
// parse.
#[derive(Debug, Deserialize)]
struct RawManifest {
    versions: Vec<RawVersion>,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    version: String,
    #[serde(default)]
    downloads: Vec<RawDownload>,
}

#[derive(Debug, Deserialize)]
struct RawDownload {
    #[serde(default)]
    arch: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    edition: String,
    #[serde(default)]
    archive: Option<RawArchive>,
}

#[derive(Debug, Deserialize)]
struct RawArchive {
    url: String,
}

fn flatten_manifest(raw: RawManifest, fetched_at: DateTime<Utc>) -> VersionCatalog {
    let entries = raw
        .versions
        .into_iter()
        .map(|v| VersionEntry {
            version: v.version,
            downloads: v
                .downloads
                .into_iter()
                .filter_map(|d| {
                    d.archive.map(|a| Download {
                        arch: d.arch,
                        target: d.target,
                        edition: d.edition,
                        url: a.url,
                    })
                })
                .collect(),
        })
        .collect();
    VersionCatalog {
        fetched_at,
        entries,
    }
}

/// The catalog client: lazy fetch, in-memory handle behind a mutex, disk
/// cache consulted on first use in a process.
pub struct CatalogClient {
    http: reqwest::Client,
    cache_file: PathBuf,
    manifest_url: String,
    loaded: Mutex<Option<Arc<VersionCatalog>>>,
}

impl CatalogClient {
    pub fn new(root: &StateRoot) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache_file: root.catalog_file(),
            manifest_url: MANIFEST_URL.to_string(),
            loaded: Mutex::new(None),
        }
    }

    /// Point the client at a different manifest endpoint (tests).
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    /// The parsed catalog, loading the disk cache or fetching as needed.
    pub async fn catalog(&self) -> Result<Arc<VersionCatalog>, CatalogError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(catalog) = loaded.as_ref() {
            return Ok(Arc::clone(catalog));
        }

        if let Some(cached) = self.read_cache() {
            if cached.is_fresh(Utc::now()) {
                debug!(path = %self.cache_file.display(), "using cached version manifest");
                let arc = Arc::new(cached);
                *loaded = Some(Arc::clone(&arc));
                return Ok(arc);
            }
        }

        let fetched = self.fetch().await?;
        self.write_cache(&fetched);
        let arc = Arc::new(fetched);
        *loaded = Some(Arc::clone(&arc));
        Ok(arc)
    }

    /// Resolve a version specifier to an exact version. Percona versions
    /// are taken verbatim and never consult the official manifest.
    pub async fn resolve_version(
        &self,
        variant: Variant,
        spec: &str,
    ) -> Result<String, CatalogError> {
        variant.validate_spec(spec)?;
        match variant {
            Variant::Official => self.catalog().await?.resolve_official(spec),
            Variant::Percona => Ok(spec.to_string()),
        }
    }

    /// Resolve the download URL for an official version, falling back to
    /// constructed candidates probed by HEAD when the manifest has no
    /// matching entry.
    pub async fn download_url(
        &self,
        version: &str,
        platform: Platform,
    ) -> Result<String, CatalogError> {
        match self.catalog().await?.download_for(version, platform) {
            Ok(url) => Ok(url),
            Err(err) => {
                emit_apple_silicon_hint(version, platform);
                for candidate in candidate_urls(version, platform) {
                    if self.head_ok(&candidate).await {
                        debug!(url = %candidate, "manifest miss; constructed candidate accepted");
                        return Ok(candidate);
                    }
                }
                Err(err)
            }
        }
    }

    /// HEAD probe accepting 200/301/302.
    async fn head_ok(&self, url: &str) -> bool {
        match self.http.head(url).send().await {
            Ok(resp) => {
                let code = resp.status().as_u16();
                code == 200 || code == 301 || code == 302
            }
            Err(err) => {
                debug!(url, %err, "HEAD probe failed");
                false
            }
        }
    }

    async fn fetch(&self) -> Result<VersionCatalog, CatalogError> {
        let resp = self
            .http
            .get(&self.manifest_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| CatalogError::ManifestFetch {
                url: self.manifest_url.clone(),
                source,
            })?;
        let body = resp
            .bytes()
            .await
            .map_err(|source| CatalogError::ManifestFetch {
                url: self.manifest_url.clone(),
                source,
            })?;
        let raw: RawManifest =
            serde_json::from_slice(&body).map_err(CatalogError::ManifestParse)?;
        Ok(flatten_manifest(raw, Utc::now()))
    }

    /// A cached file that fails to parse falls through to a fresh fetch.
    fn read_cache(&self) -> Option<VersionCatalog> {
        let content = std::fs::read_to_string(&self.cache_file).ok()?;
        match serde_json::from_str(&content) {
            Ok(catalog) => Some(catalog),
            Err(err) => {
                warn!(path = %self.cache_file.display(), %err, "discarding unreadable manifest cache");
                None
            }
        }
    }

    fn write_cache(&self, catalog: &VersionCatalog) {
        if let Some(parent) = self.cache_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string(catalog) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.cache_file, json) {
                    warn!(path = %self.cache_file.display(), %err, "failed to write manifest cache");
                }
            }
            Err(err) => warn!(%err, "failed to serialize manifest cache"),
        }
    }
}

/// Constructed download candidates used when the manifest has no entry.
pub fn candidate_urls(version: &str, platform: Platform) -> Vec<String> {
    match platform.os {
        Os::Linux => {
            let arch = platform.arch.manifest_token();
            let arch_alt = match platform.arch {
                Arch::Amd64 => "x86_64",
                Arch::Arm64 => "aarch64",
            };
            vec![
                format!("https://fastdl.mongodb.org/linux/mongodb-linux-{arch}-{version}.tgz"),
                format!(
                    "https://fastdl.mongodb.org/linux/mongodb-linux-{arch_alt}-ubuntu2204-{version}.tgz"
                ),
                format!(
                    "https://fastdl.mongodb.org/linux/mongodb-linux-{arch_alt}-ubuntu2004-{version}.tgz"
                ),
            ]
        }
        Os::Darwin => {
            let arch = platform.arch.manifest_token();
            vec![
                format!("https://fastdl.mongodb.org/osx/mongodb-macos-{arch}-{version}.tgz"),
                format!("https://fastdl.mongodb.org/osx/mongodb-osx-ssl-{arch}-{version}.tgz"),
            ]
        }
        Os::Windows => vec![format!(
            "https://fastdl.mongodb.org/windows/mongodb-windows-x86_64-{version}.zip"
        )],
    }
}

/// Native darwin/arm64 server builds start at 6.0; point the user at the
/// Rosetta fallback for anything older.
fn emit_apple_silicon_hint(version: &str, platform: Platform) {
    if platform.os == Os::Darwin && platform.arch == Arch::Arm64 {
        if let Some(v) = Version::parse(version) {
            if v.major < 6 {
                println!(
                    "Warning: MongoDB {version} has no native Apple Silicon build; \
                     request the darwin-amd64 binary to run under Rosetta"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(entries: Vec<VersionEntry>) -> VersionCatalog {
        VersionCatalog {
            fetched_at: Utc::now(),
            entries,
        }
    }

    fn entry(version: &str) -> VersionEntry {
        VersionEntry {
            version: version.to_string(),
            downloads: vec![],
        }
    }

    fn download(arch: &str, target: &str, edition: &str, url: &str) -> Download {
        Download {
            arch: arch.into(),
            target: target.into(),
            edition: edition.into(),
            url: url.into(),
        }
    }

    #[test]
    fn minor_spec_selects_highest_patch() {
        let c = catalog(vec![entry("7.0.2"), entry("7.0.14"), entry("7.0.9")]);
        assert_eq!(c.resolve_official("7.0").unwrap(), "7.0.14");
    }

    #[test]
    fn minor_spec_skips_prereleases() {
        let c = catalog(vec![
            entry("7.0.14"),
            entry("7.0.15-rc1"),
            entry("7.0.15-alpha"),
        ]);
        assert_eq!(c.resolve_official("7.0").unwrap(), "7.0.14");
    }

    #[test]
    fn exact_spec_must_be_listed() {
        let c = catalog(vec![entry("7.0.14")]);
        assert_eq!(c.resolve_official("7.0.14").unwrap(), "7.0.14");
        assert!(matches!(
            c.resolve_official("7.0.99"),
            Err(CatalogError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn unknown_minor_is_version_not_found() {
        let c = catalog(vec![entry("7.0.14")]);
        assert!(matches!(
            c.resolve_official("9.9"),
            Err(CatalogError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn community_edition_preferred_over_enterprise() {
        let mut e = entry("7.0.14");
        e.downloads = vec![
            download("x86_64", "ubuntu2204", "enterprise", "https://x/ent.tgz"),
            download("x86_64", "ubuntu2204", "targeted", "https://x/community.tgz"),
        ];
        let c = catalog(vec![e]);
        let url = c
            .download_for("7.0.14", Platform::new(Os::Linux, Arch::Amd64))
            .unwrap();
        assert_eq!(url, "https://x/community.tgz");
    }

    #[test]
    fn darwin_matches_both_osx_and_macos_targets() {
        for target in ["osx", "osx-ssl", "macos", "macos-arm64"] {
            let mut e = entry("7.0.14");
            e.downloads = vec![download("arm64", target, "base", "https://x/mac.tgz")];
            let c = catalog(vec![e]);
            assert!(
                c.download_for("7.0.14", Platform::new(Os::Darwin, Arch::Arm64))
                    .is_ok(),
                "target {target} should match darwin"
            );
        }
    }

    #[test]
    fn linux_matches_by_url_when_target_is_odd() {
        let mut e = entry("7.0.14");
        e.downloads = vec![download(
            "x86_64",
            "generic",
            "base",
            "https://fastdl.mongodb.org/linux/mongodb-linux-x86_64-7.0.14.tgz",
        )];
        let c = catalog(vec![e]);
        assert!(
            c.download_for("7.0.14", Platform::new(Os::Linux, Arch::Amd64))
                .is_ok()
        );
    }

    #[test]
    fn arch_mismatch_is_no_download() {
        let mut e = entry("7.0.14");
        e.downloads = vec![download("aarch64", "ubuntu2204", "base", "https://x/a.tgz")];
        let c = catalog(vec![e]);
        assert!(matches!(
            c.download_for("7.0.14", Platform::new(Os::Linux, Arch::Amd64)),
            Err(CatalogError::NoDownloadForPlatform { .. })
        ));
    }

    #[test]
    fn aarch64_download_matches_arm64_request() {
        let mut e = entry("7.0.14");
        e.downloads = vec![download("aarch64", "ubuntu2204", "base", "https://x/a.tgz")];
        let c = catalog(vec![e]);
        assert!(
            c.download_for("7.0.14", Platform::new(Os::Linux, Arch::Arm64))
                .is_ok()
        );
    }

    #[test]
    fn freshness_window_is_24_hours() {
        let mut c = catalog(vec![]);
        assert!(c.is_fresh(Utc::now()));
        c.fetched_at = Utc::now() - ChronoDuration::hours(25);
        assert!(!c.is_fresh(Utc::now()));
    }

    #[test]
    fn candidate_urls_cover_linux_and_darwin() {
        let linux = candidate_urls("7.0.14", Platform::new(Os::Linux, Arch::Amd64));
        assert!(linux.iter().any(|u| u.contains("mongodb-linux-x86_64-7.0.14.tgz")));

        let mac = candidate_urls("7.0.14", Platform::new(Os::Darwin, Arch::Arm64));
        assert!(mac.iter().any(|u| u.contains("mongodb-macos-arm64")));
        assert!(mac.iter().any(|u| u.contains("osx-ssl")));
    }

    #[test]
    fn raw_manifest_flattens_archive_urls() {
        let raw = r#"{
            "versions": [
                {
                    "version": "7.0.14",
                    "downloads": [
                        {
                            "arch": "x86_64",
                            "target": "ubuntu2204",
                            "edition": "targeted",
                            "archive": {"url": "https://x/y.tgz"}
                        },
                        {"arch": "x86_64", "target": "ubuntu2204", "edition": "targeted"}
                    ]
                }
            ]
        }"#;
        let parsed: RawManifest = serde_json::from_str(raw).unwrap();
        let c = flatten_manifest(parsed, Utc::now());
        assert_eq!(c.entries.len(), 1);
        assert_eq!(c.entries[0].downloads.len(), 1);
        assert_eq!(c.entries[0].downloads[0].url, "https://x/y.tgz");
    }
}
