use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::KansasError;
use crate::store::Namespace;

/// Local caching of remote card images, grounded on the original
/// `server/imagecache.py`: a url -> local file mapping, keyed by a stable
/// hash of the url, with an inverse `CacheMap` namespace recording which
/// hashed filename a url resolved to.
#[derive(Clone)]
pub struct ImageCache {
    cache_dir: PathBuf,
    local_serving_address: String,
    cache_map: Namespace,
    http: reqwest::Client,
}

impl ImageCache {
    pub fn new(cache_dir: PathBuf, local_serving_address: String, cache_map: Namespace) -> Self {
        Self {
            cache_dir,
            local_serving_address,
            cache_map,
            http: reqwest::Client::new(),
        }
    }

    fn is_local(&self, url: &str) -> bool {
        let cache_dir_str = self.cache_dir.to_string_lossy();
        url.starts_with(cache_dir_str.as_ref())
            || url.starts_with(&self.local_serving_address)
            || url.starts_with('/')
            || url.starts_with("..")
    }

    fn hash_name(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"$");
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        format!("{:x}.jpg", digest)
    }

    fn local_path(&self, hashed_name: &str) -> PathBuf {
        self.cache_dir.join(hashed_name)
    }

    /// Returns the local cache path for `url`, fetching and caching the
    /// body first if it is not already cached. Urls that already look
    /// local are returned unchanged.
    pub async fn cached(&self, url: &str) -> Result<String, KansasError> {
        if self.is_local(url) {
            tracing::info!(target: "cache::image", %url, "skip local url");
            return Ok(url.to_string());
        }

        let hashed_name = Self::hash_name(url);
        let path = self.local_path(&hashed_name);

        if !path.exists() {
            tracing::info!(target: "cache::image", %url, "GET");
            let bytes = self
                .http
                .get(url)
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(|err| KansasError::upstream(err.to_string()))?
                .bytes()
                .await
                .map_err(|err| KansasError::upstream(err.to_string()))?;

            write_atomically(&path, &bytes)
                .map_err(|err| KansasError::Fatal(err.to_string()))?;

            self.cache_map
                .put(url, &hashed_name)
                .map_err(|err| KansasError::Fatal(err.to_string()))?;
        }

        Ok(path.to_string_lossy().into_owned())
    }

    /// Same as `cached`, but never performs a fetch: returns the original
    /// url unchanged on a cache miss.
    pub fn cached_if_present(&self, url: &str) -> String {
        if self.is_local(url) {
            return url.to_string();
        }
        let hashed_name = Self::hash_name(url);
        let path = self.local_path(&hashed_name);
        if path.exists() {
            path.to_string_lossy().into_owned()
        } else {
            url.to_string()
        }
    }

    /// Returns the hashed filename recorded for `url` in the `CacheMap`
    /// namespace, if one has ever been recorded, without touching the
    /// filesystem.
    pub fn cache_peek(&self, url: &str) -> anyhow::Result<Option<String>> {
        self.cache_map.get(url)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn cache(dir: &Path) -> ImageCache {
        let store = Store::open_temporary().unwrap();
        let cache_map = store.namespace("CacheMap", 0).unwrap();
        ImageCache::new(
            dir.to_path_buf(),
            "http://localhost:8000/".to_string(),
            cache_map,
        )
    }

    #[test]
    fn local_urls_pass_through_unchanged() {
        let dir = tempdir();
        let cache = cache(dir.path());
        assert_eq!(cache.cached_if_present("/third_party/foo.jpg"), "/third_party/foo.jpg");
        assert_eq!(cache.cached_if_present("../piece/foo.jpg"), "../piece/foo.jpg");
        assert_eq!(
            cache.cached_if_present("http://localhost:8000/x.jpg"),
            "http://localhost:8000/x.jpg"
        );
    }

    #[test]
    fn miss_returns_original_url_without_fetching() {
        let dir = tempdir();
        let cache = cache(dir.path());
        let miss = cache.cached_if_present("http://example.com/card.jpg");
        assert_eq!(miss, "http://example.com/card.jpg");
    }

    #[test]
    fn hash_name_is_stable() {
        assert_eq!(
            ImageCache::hash_name("http://example.com/a.jpg"),
            ImageCache::hash_name("http://example.com/a.jpg")
        );
        assert_ne!(
            ImageCache::hash_name("http://example.com/a.jpg"),
            ImageCache::hash_name("http://example.com/b.jpg")
        );
    }

    // Minimal self-contained tempdir helper so this module's tests do not
    // need an extra dev-dependency just to exercise filesystem paths.
    fn tempdir() -> TempPath {
        let mut path = std::env::temp_dir();
        path.push(format!("kansas-image-cache-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        TempPath(path)
    }

    struct TempPath(PathBuf);

    impl TempPath {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
