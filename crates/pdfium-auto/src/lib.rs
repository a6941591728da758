//! # pdfium-auto
//!
//! Locate the [PDFium](https://pdfium.googlesource.com/pdfium/) shared library
//! inside an artifact directory, downloading it on first use, and bind
//! `pdfium-render` to it.
//!
//! ## How it works
//!
//! [`PdfiumLocator::ensure_library`] resolves the library in this order:
//!
//! 1. An explicit library path ([`PdfiumLocator::with_library_path`]). It must
//!    exist; a missing explicit path is an error, never a silent download.
//! 2. `{artifact_root}/pdfium-{VERSION}/{libname}` if already cached.
//! 3. Download of the platform `.tgz` from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries),
//!    extracting only the shared library into the cache directory.
//!
//! The artifact root is chosen by the caller (a service reads it from its
//! configuration) so container images can pre-populate it at build time and
//! start without network access.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pdfium_auto::{bind_pdfium_from_path, PdfiumLocator};
//!
//! let locator = PdfiumLocator::new("/opt/artifacts");
//! let path = locator.ensure_library(None).expect("pdfium unavailable");
//! let pdfium = bind_pdfium_from_path(&path).expect("bind failed");
//! ```
//!
//! ## Platform support
//!
//! | OS      | Arch    | Library               |
//! |---------|---------|-----------------------|
//! | macOS   | arm64   | `libpdfium.dylib`     |
//! | macOS   | x86_64  | `libpdfium.dylib`     |
//! | Linux   | x86_64  | `libpdfium.so`        |
//! | Linux   | aarch64 | `libpdfium.so`        |
//! | Windows | x86_64  | `pdfium.dll`          |
//! | Windows | aarch64 | `pdfium.dll`          |

use std::io::Read;
use std::path::{Path, PathBuf};

use pdfium_render::prelude::Pdfium;
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// The pdfium-binaries release tag used for downloads.
pub const PDFIUM_VERSION: &str = "7690";

/// GitHub release base URL.
const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

/// Sub-directory of the platform cache dir used when no artifact root is configured.
const DEFAULT_CACHE_NAMESPACE: &str = "docconvert";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by pdfium-auto operations.
#[derive(Error, Debug)]
pub enum PdfiumAutoError {
    /// The current OS/architecture combination is not supported.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// An explicitly configured library path does not exist.
    #[error("PDFium library not found at '{path}'")]
    LibraryNotFound { path: PathBuf },

    /// Could not create or write the artifact cache directory.
    #[error("Artifact directory error at '{path}': {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),

    /// gzip/tar extraction failed.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// `pdfium-render` could not load the library.
    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

// ── Internal: platform metadata ──────────────────────────────────────────────

struct PlatformInfo {
    /// Asset filename in the GitHub release, e.g. `pdfium-linux-x64.tgz`.
    archive_name: &'static str,
    /// Relative path inside the archive, e.g. `lib/libpdfium.so`.
    lib_path_in_archive: &'static str,
    /// Filename written to the cache directory.
    lib_name: &'static str,
}

fn detect_platform() -> Result<PlatformInfo, PdfiumAutoError> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

fn platform_for(os: &str, arch: &str) -> Result<PlatformInfo, PdfiumAutoError> {
    let (archive_name, lib_path_in_archive, lib_name) = match (os, arch) {
        ("macos", "aarch64") => ("pdfium-mac-arm64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib"),
        ("macos", "x86_64") => ("pdfium-mac-x64.tgz", "lib/libpdfium.dylib", "libpdfium.dylib"),
        ("linux", "x86_64") => ("pdfium-linux-x64.tgz", "lib/libpdfium.so", "libpdfium.so"),
        ("linux", "aarch64") => ("pdfium-linux-arm64.tgz", "lib/libpdfium.so", "libpdfium.so"),
        ("windows", "x86_64") => ("pdfium-win-x64.tgz", "bin/pdfium.dll", "pdfium.dll"),
        ("windows", "aarch64") => ("pdfium-win-arm64.tgz", "bin/pdfium.dll", "pdfium.dll"),
        (os, arch) => {
            return Err(PdfiumAutoError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
        }
    };
    Ok(PlatformInfo {
        archive_name,
        lib_path_in_archive,
        lib_name,
    })
}

/// Platform cache root used when the caller has no artifact directory configured.
///
/// - **Linux**: `~/.cache/docconvert/`
/// - **macOS**: `~/Library/Caches/docconvert/`
/// - **Windows**: `%LOCALAPPDATA%\docconvert\`
pub fn default_artifact_root() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join(DEFAULT_CACHE_NAMESPACE)
}

// ── Locator ──────────────────────────────────────────────────────────────────

/// Resolves the PDFium library inside an artifact root.
#[derive(Debug, Clone)]
pub struct PdfiumLocator {
    artifact_root: PathBuf,
    library_path: Option<PathBuf>,
}

impl Default for PdfiumLocator {
    fn default() -> Self {
        Self::new(default_artifact_root())
    }
}

impl PdfiumLocator {
    /// Locator caching the library under `artifact_root/pdfium-{VERSION}/`.
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            library_path: None,
        }
    }

    /// Use an existing library instead of the cache (no download).
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// The per-version cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.artifact_root.join(format!("pdfium-{PDFIUM_VERSION}"))
    }

    /// Returns the on-disk library path without touching the network,
    /// or `None` when nothing usable is present.
    pub fn cached_path(&self) -> Option<PathBuf> {
        if let Some(ref p) = self.library_path {
            return p.exists().then(|| p.clone());
        }
        let info = detect_platform().ok()?;
        let p = self.cache_dir().join(info.lib_name);
        p.exists().then_some(p)
    }

    /// Ensures the PDFium library is present, downloading it if required.
    ///
    /// `on_progress` receives `(bytes_downloaded, total_size_option)` during
    /// the download.
    pub fn ensure_library(
        &self,
        on_progress: Option<&dyn Fn(u64, Option<u64>)>,
    ) -> Result<PathBuf, PdfiumAutoError> {
        if let Some(ref p) = self.library_path {
            if p.exists() {
                return Ok(p.clone());
            }
            return Err(PdfiumAutoError::LibraryNotFound { path: p.clone() });
        }

        let info = detect_platform()?;
        let cache_dir = self.cache_dir();
        let lib_path = cache_dir.join(info.lib_name);

        if lib_path.exists() {
            return Ok(lib_path);
        }

        let url = format!(
            "{}/chromium%2F{}/{}",
            BASE_URL, PDFIUM_VERSION, info.archive_name
        );

        std::fs::create_dir_all(&cache_dir).map_err(|source| PdfiumAutoError::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;

        let archive_bytes = download_bytes(&url, on_progress)?;

        // Extract beside the target and rename so a crash never leaves a
        // truncated library that later looks cached.
        let partial = lib_path.with_extension("partial");
        extract_library(&archive_bytes, info.lib_path_in_archive, &partial)?;
        std::fs::rename(&partial, &lib_path).map_err(|source| PdfiumAutoError::CacheDir {
            path: lib_path.clone(),
            source,
        })?;

        Ok(lib_path)
    }

    /// Resolve the library and bind to it.
    pub fn bind(
        &self,
        on_progress: Option<&dyn Fn(u64, Option<u64>)>,
    ) -> Result<Pdfium, PdfiumAutoError> {
        let path = self.ensure_library(on_progress)?;
        bind_pdfium_from_path(&path)
    }
}

/// Binds to a PDFium library at an explicit `path`.
pub fn bind_pdfium_from_path(path: &Path) -> Result<Pdfium, PdfiumAutoError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| PdfiumAutoError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
fn download_bytes(
    url: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, PdfiumAutoError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| PdfiumAutoError::Download(e.to_string()))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| PdfiumAutoError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(PdfiumAutoError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(total.unwrap_or(35 * 1024 * 1024) as usize);
    let mut chunk = vec![0u8; 64 * 1024];
    let mut downloaded: u64 = 0;

    loop {
        match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PdfiumAutoError::Download(format!("Read error: {e}"))),
        }
    }

    Ok(buf)
}

/// Extracts a single file from a gzipped tar archive into `dest_path`.
fn extract_library(
    archive_bytes: &[u8],
    lib_path_in_archive: &str,
    dest_path: &Path,
) -> Result<(), PdfiumAutoError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(archive_bytes));

    for entry in archive
        .entries()
        .map_err(|e| PdfiumAutoError::Extract(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| PdfiumAutoError::Extract(e.to_string()))?;
        let matches = entry
            .path()
            .map_err(|e| PdfiumAutoError::Extract(e.to_string()))?
            .to_string_lossy()
            == lib_path_in_archive;

        if matches {
            entry
                .unpack(dest_path)
                .map_err(|e| PdfiumAutoError::Extract(format!("Unpack failed: {e}")))?;
            return Ok(());
        }
    }

    Err(PdfiumAutoError::Extract(format!(
        "Library '{lib_path_in_archive}' not found in archive"
    )))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_platform_is_rejected() {
        let err = platform_for("plan9", "mips").err().expect("should fail");
        assert!(err.to_string().contains("plan9/mips"));
    }

    #[test]
    fn linux_platform_uses_shared_object() {
        let info = platform_for("linux", "x86_64").unwrap();
        assert_eq!(info.lib_name, "libpdfium.so");
        assert!(info.archive_name.ends_with(".tgz"));
    }

    #[test]
    fn cache_dir_is_versioned_under_root() {
        let locator = PdfiumLocator::new("/opt/artifacts");
        let dir = locator.cache_dir();
        assert!(dir.starts_with("/opt/artifacts"));
        assert!(dir.to_str().unwrap().contains(PDFIUM_VERSION));
    }

    #[test]
    fn missing_explicit_library_is_an_error() {
        let locator = PdfiumLocator::new("/tmp").with_library_path("/definitely/not/libpdfium.so");
        assert!(locator.cached_path().is_none());
        assert!(matches!(
            locator.ensure_library(None),
            Err(PdfiumAutoError::LibraryNotFound { .. })
        ));
    }

    #[test]
    fn existing_explicit_library_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libpdfium.so");
        std::fs::write(&lib, b"stub").unwrap();

        let locator = PdfiumLocator::new(dir.path()).with_library_path(&lib);
        assert_eq!(locator.ensure_library(None).unwrap(), lib);
        assert_eq!(locator.cached_path(), Some(lib));
    }

    #[test]
    fn empty_artifact_root_has_no_cached_library() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PdfiumLocator::new(dir.path()).cached_path().is_none());
    }

    #[test]
    fn extract_rejects_garbage_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_library(b"not a tarball", "lib/libpdfium.so", &dir.path().join("x"))
            .err()
            .expect("garbage should not extract");
        assert!(matches!(err, PdfiumAutoError::Extract(_)));
    }
}
