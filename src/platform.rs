//! Operating system and architecture normalization.
//!
//! A `Platform` is the `(os, arch)` pair that keys the binary cache.
//! Architecture tokens are normalized to `amd64` / `arm64` on input and
//! mapped back to upstream spellings (`x86_64`, `aarch64`) where a download
//! host requires them.

use serde::{Deserialize, Serialize};

use crate::errors::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    /// Parse an OS token as reported by a host executor or `std::env::consts::OS`.
    pub fn parse(token: &str) -> Result<Self, CatalogError> {
        match token.to_ascii_lowercase().as_str() {
            "linux" => Ok(Os::Linux),
            "darwin" | "macos" | "osx" => Ok(Os::Darwin),
            "windows" => Ok(Os::Windows),
            other => Err(CatalogError::UnsupportedOs(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
        }
    }

    /// Platform-appropriate executable extension.
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Os::Windows => ".exe",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Parse an architecture token, accepting both normalized and upstream
    /// spellings.
    pub fn parse(token: &str) -> Result<Self, CatalogError> {
        match token.to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x64" => Ok(Arch::Amd64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => Err(CatalogError::UnsupportedOs(format!(
                "unsupported architecture: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }

    /// The spelling used by the official download manifest.
    pub fn manifest_token(&self) -> &'static str {
        match self {
            Arch::Amd64 => "x86_64",
            Arch::Arm64 => "arm64",
        }
    }

    /// Alternate upstream spellings that should also match this arch.
    pub fn matches_token(&self, token: &str) -> bool {
        match self {
            Arch::Amd64 => matches!(token, "x86_64" | "amd64"),
            Arch::Arm64 => matches!(token, "arm64" | "aarch64"),
        }
    }
}

/// The `(os, arch)` pair identifying a binary cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// The platform of the current process.
    pub fn current() -> Result<Self, CatalogError> {
        Ok(Self {
            os: Os::parse(std::env::consts::OS)?,
            arch: Arch::parse(std::env::consts::ARCH)?,
        })
    }

    /// The darwin/amd64 platform, used as a caller-driven Rosetta fallback
    /// when a variant lacks native arm64 binaries.
    pub fn rosetta_fallback(&self) -> Option<Platform> {
        match (self.os, self.arch) {
            (Os::Darwin, Arch::Arm64) => Some(Platform::new(Os::Darwin, Arch::Amd64)),
            _ => None,
        }
    }

    pub fn is_linux_amd64(&self) -> bool {
        self.os == Os::Linux && self.arch == Arch::Amd64
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os.as_str(), self.arch.as_str())
    }
}
