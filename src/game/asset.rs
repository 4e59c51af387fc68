//! `AssetCache`: the per-game asset resolver. Split out from `GameState`
//! per the REDESIGN FLAGS in §9 of the specification — the original
//! coupled a game's data dictionary with the logic that downloads and
//! resizes card art; here the state is a plain record and this is the
//! service that knows how to mint a new card's image pair for it.

use std::path::Path;

use crate::cache::ImageCache;
use crate::error::KansasError;

const LOG_TARGET: &str = "game::asset";

/// Resolves card-art urls against a game's resource prefix, ensures the
/// large image is cached locally, and derives/resizes a small thumbnail.
pub struct AssetCache {
    resource_prefix: String,
    local_prefixes: Vec<String>,
    image_cache: ImageCache,
    small_size: (u32, u32),
}

impl AssetCache {
    pub fn new(
        resource_prefix: String,
        local_prefixes: Vec<String>,
        image_cache: ImageCache,
        small_size: (u32, u32),
    ) -> Self {
        Self {
            resource_prefix,
            local_prefixes,
            image_cache,
            small_size,
        }
    }

    /// If `url` already starts with `/`, a known local prefix, or
    /// `http:`/`https:`, returns it unchanged; otherwise prepends the
    /// game's resource prefix.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with('/')
            || url.starts_with("http:")
            || url.starts_with("https:")
            || self.local_prefixes.iter().any(|p| url.starts_with(p.as_str()))
        {
            url.to_string()
        } else {
            format!("{}{}", self.resource_prefix, url)
        }
    }

    /// Resolves `front_url`, caches the large image locally, derives a
    /// `@WxH` small-image variant (resizing if absent; falling back to
    /// the large path if resizing fails), and returns `(large, small)`.
    pub async fn prepare_card_images(&self, front_url: &str) -> Result<(String, String), KansasError> {
        let resolved = self.resolve(front_url);
        let large_path = self.image_cache.cached(&resolved).await?;
        let small_path = self.derive_small_path(&large_path);

        if !Path::new(&small_path).exists() {
            if let Err(err) = resize_to(&large_path, &small_path, self.small_size) {
                tracing::warn!(target: LOG_TARGET, %err, large_path, "falling back to large image for small variant");
                return Ok((large_path.clone(), large_path));
            }
        }

        Ok((large_path, small_path))
    }

    fn derive_small_path(&self, large_path: &str) -> String {
        let (w, h) = self.small_size;
        match large_path.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}@{w}x{h}.{ext}"),
            None => format!("{large_path}@{w}x{h}"),
        }
    }
}

fn resize_to(large_path: &str, small_path: &str, (w, h): (u32, u32)) -> anyhow::Result<()> {
    let img = image::open(large_path)?;
    let resized = img.resize(w, h, image::imageops::FilterType::Triangle);
    resized.save(small_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn cache() -> ImageCache {
        let store = Store::open_temporary().unwrap();
        let ns = store.namespace("CacheMap", 0).unwrap();
        ImageCache::new(std::env::temp_dir(), "http://localhost:8000/".into(), ns)
    }

    #[test]
    fn resolve_leaves_absolute_urls_untouched() {
        let loader = AssetCache::new(
            "http://prefix/".into(),
            vec!["http://localhost:8000/".into()],
            cache(),
            (92, 131),
        );
        assert_eq!(loader.resolve("/local/x.jpg"), "/local/x.jpg");
        assert_eq!(loader.resolve("http://elsewhere/x.jpg"), "http://elsewhere/x.jpg");
        assert_eq!(
            loader.resolve("http://localhost:8000/x.jpg"),
            "http://localhost:8000/x.jpg"
        );
    }

    #[test]
    fn resolve_prepends_prefix_for_relative_urls() {
        let loader = AssetCache::new("http://prefix/".into(), vec![], cache(), (92, 131));
        assert_eq!(loader.resolve("card.jpg"), "http://prefix/card.jpg");
    }

    #[test]
    fn derive_small_path_inserts_dimension_suffix() {
        let loader = AssetCache::new("http://prefix/".into(), vec![], cache(), (92, 131));
        assert_eq!(
            loader.derive_small_path("/cache/abcd.jpg"),
            "/cache/abcd@92x131.jpg"
        );
    }
}
