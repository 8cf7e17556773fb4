//! Wire contract shared by the transfer server and client.

use std::path::{Path, PathBuf};

/// Port the transfer server listens on.
pub const DEFAULT_PORT: u16 = 8089;

pub const ROUTE_UPLOAD: &str = "/upload";
/// Download by absolute path, `?p=<path>`
pub const ROUTE_DOWNLOAD: &str = "/dl/";
/// Download the first entry of the output directory
pub const ROUTE_DOWNLOAD_OUTPUT: &str = "/dlv/";
/// Persist the quality flag, `?q=<low|high>`
pub const ROUTE_SET_QUALITY: &str = "/set_quality/";
pub const ROUTE_READY: &str = "/ready";
/// Last render outcome as JSON
pub const ROUTE_STATUS: &str = "/status";

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

pub const REPLY_OK: &str = "ok";
pub const REPLY_NOT_OK: &str = "not_ok";
pub const REPLY_READY: &str = "yeah";

/// File name of the completion sentinel inside the inbox.
pub const SENTINEL_NAME: &str = "done.txt";

/// File name of the persisted render outcome inside the output state dir.
pub const STATUS_NAME: &str = "render_status.json";

/// Worker-local locations every component agrees on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPaths {
    /// Uploaded scenes land here; the sentinel lives here too
    pub inbox_dir: PathBuf,
    /// The render binary writes its output here
    pub output_dir: PathBuf,
    /// Persisted quality flag, outside temp storage
    pub quality_file: PathBuf,
    /// Persisted render outcome
    pub status_file: PathBuf,
}

impl Default for WorkerPaths {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from("/tmp/offrender_in"),
            output_dir: PathBuf::from("/tmp/offrender_out"),
            quality_file: PathBuf::from("/var/lib/offrender/render_quality.txt"),
            status_file: PathBuf::from("/var/lib/offrender").join(STATUS_NAME),
        }
    }
}

impl WorkerPaths {
    /// Defaults overridden by `OFFRENDER_INBOX_DIR`, `OFFRENDER_OUTPUT_DIR`,
    /// `OFFRENDER_QUALITY_FILE` and `OFFRENDER_STATUS_FILE`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        };

        Self {
            inbox_dir: var("OFFRENDER_INBOX_DIR").unwrap_or(defaults.inbox_dir),
            output_dir: var("OFFRENDER_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            quality_file: var("OFFRENDER_QUALITY_FILE").unwrap_or(defaults.quality_file),
            status_file: var("OFFRENDER_STATUS_FILE").unwrap_or(defaults.status_file),
        }
    }

    /// All paths rooted under `root`, for tests and local runs.
    pub fn under(root: &Path) -> Self {
        Self {
            inbox_dir: root.join("in"),
            output_dir: root.join("out"),
            quality_file: root.join("state").join("render_quality.txt"),
            status_file: root.join("state").join(STATUS_NAME),
        }
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.inbox_dir.join(SENTINEL_NAME)
    }
}

/// Base URL of the transfer server on a worker.
pub fn worker_base_url(address: &str, port: u16) -> String {
    format!("http://{}:{}", address, port)
}

/// Reduce a client-supplied file name to its final path component.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
