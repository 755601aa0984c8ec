use super::AssetError;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolves asset URLs to bytes. Remote downloads are cached on disk keyed by
/// the SHA-256 of the URL; local paths and `file://` URLs are read directly.
pub struct AssetCache {
    dir: PathBuf,
    agent: ureq::Agent,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(60))
                .build(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let key: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
        self.dir.join(format!("{}.glb", key))
    }

    pub fn fetch(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        if is_remote(url) {
            return self.fetch_remote(url);
        }
        let path = local_path(url);
        std::fs::read(&path).map_err(|source| AssetError::Read {
            path: path.display().to_string(),
            source,
        })
    }

    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, AssetError> {
        let cached = self.cache_path(url);
        if cached.is_file() {
            match std::fs::read(&cached) {
                Ok(bytes) => {
                    log::debug!("Asset cache hit for {} ({})", url, cached.display());
                    return Ok(bytes);
                }
                Err(err) => {
                    log::warn!("Unreadable cache entry {}: {}", cached.display(), err);
                }
            }
        }

        log::info!("Downloading {}", url);
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| AssetError::Download {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| AssetError::Download {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        if let Err(err) = self.store(&cached, &bytes) {
            log::warn!("Failed to cache {} at {}: {}", url, cached.display(), err);
        }
        Ok(bytes)
    }

    fn store(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(path, bytes)
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

/// Last path segment of a URL or path, used to name the loaded model.
pub fn asset_name(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    trimmed
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("model")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_is_stable_and_url_specific() {
        let cache = AssetCache::new("/tmp/glbview-test");
        let a = cache.cache_path("https://example.com/a.glb");
        assert_eq!(a, cache.cache_path("https://example.com/a.glb"));
        assert_ne!(a, cache.cache_path("https://example.com/b.glb"));
        let file_name = a.file_name().unwrap().to_str().unwrap();
        assert_eq!(file_name.len(), 64 + ".glb".len());
    }

    #[test]
    fn cached_remote_asset_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path());
        // .invalid never resolves, so success proves the cache answered.
        let url = "https://assets.example.invalid/models/robot.glb";
        std::fs::write(cache.cache_path(url), b"cached bytes").unwrap();
        assert_eq!(cache.fetch(url).unwrap(), b"cached bytes");
    }

    #[test]
    fn local_and_file_urls_are_read_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.glb");
        std::fs::write(&path, b"local").unwrap();
        let cache = AssetCache::new(dir.path().join("cache"));
        assert_eq!(cache.fetch(path.to_str().unwrap()).unwrap(), b"local");
        let url = format!("file://{}", path.display());
        assert_eq!(cache.fetch(&url).unwrap(), b"local");
    }

    #[test]
    fn missing_local_file_is_read_error() {
        let cache = AssetCache::new("/nonexistent-cache");
        let err = cache.fetch("/definitely/not/here.glb").err().unwrap();
        assert!(matches!(err, AssetError::Read { .. }));
    }

    #[test]
    fn asset_name_takes_last_segment() {
        assert_eq!(asset_name("https://cdn.example.com/m/robot.glb?v=2"), "robot.glb");
        assert_eq!(asset_name("models/duck.glb"), "duck.glb");
        assert_eq!(asset_name(""), "model");
    }
}
