//! Raw byte sources for audio assets.

use std::{fs, io::Read, path::Path};

use tracing::debug;

use crate::error::FetchError;

/// Something that can turn an asset URL into bytes. Called off the host thread.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// HTTP(S) via ureq, everything else from the local filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceFetcher;

impl SourceFetcher {
    fn fetch_http(url: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = ureq::get(url)
            .header("Cache-Control", "no-store")
            .call()?;
        let mut bytes = Vec::new();
        response.body_mut().as_reader().read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn fetch_file(path: &Path) -> Result<Vec<u8>, FetchError> {
        Ok(fs::read(path)?)
    }
}

impl AssetFetcher for SourceFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!(url, "fetching asset");
        if url.starts_with("http://") || url.starts_with("https://") {
            Self::fetch_http(url)
        } else {
            let path = url.strip_prefix("file://").unwrap_or(url);
            Self::fetch_file(Path::new(path))
        }
    }
}
