use std::net::SocketAddr;
use std::path::PathBuf;

/// Runtime configuration for the table server, assembled once from the
/// environment at startup. Mirrors the constants the original Kansas
/// server kept in `server/config.py`, generalized into overridable knobs.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub cache_path: PathBuf,
    pub max_games_per_scope: usize,
    pub keepalive_timeout_secs: u64,
    pub default_source: String,
    pub small_image_size: (u32, u32),
    pub serving_prefix: String,
    pub local_serving_address: String,
    pub local_cards_dir: PathBuf,
    pub poker_cards_dir: PathBuf,
    pub catalog_csv: Option<PathBuf>,
    pub keepalive_sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".parse().expect("valid default bind addr"),
            db_path: PathBuf::from("./db"),
            cache_path: PathBuf::from("./cache"),
            max_games_per_scope: 5,
            keepalive_timeout_secs: 60,
            default_source: "magiccards.info".to_string(),
            small_image_size: (92, 131),
            serving_prefix: String::new(),
            local_serving_address: "http://localhost:8000/".to_string(),
            local_cards_dir: PathBuf::from("./assets/local_cards"),
            poker_cards_dir: PathBuf::from("./third_party/cards52"),
            catalog_csv: None,
            keepalive_sweep_interval_secs: 15,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the environment, falling back to the
    /// documented defaults for anything unset. A `.env` file in the
    /// working directory is sourced first if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let bind = std::env::var("KANSAS_BIND_ADDR")
            .ok()
            .map(|s| s.parse())
            .transpose()
            .map_err(|err| anyhow::anyhow!("invalid KANSAS_BIND_ADDR: {err}"))?
            .unwrap_or(defaults.bind);

        let db_path = std::env::var("KANSAS_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let cache_path = std::env::var("KANSAS_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_path);

        let max_games_per_scope = std::env::var("KANSAS_MAX_GAMES")
            .ok()
            .map(|s| s.parse())
            .transpose()
            .map_err(|err| anyhow::anyhow!("invalid KANSAS_MAX_GAMES: {err}"))?
            .unwrap_or(defaults.max_games_per_scope);

        let keepalive_timeout_secs = std::env::var("KANSAS_KEEPALIVE_SECS")
            .ok()
            .map(|s| s.parse())
            .transpose()
            .map_err(|err| anyhow::anyhow!("invalid KANSAS_KEEPALIVE_SECS: {err}"))?
            .unwrap_or(defaults.keepalive_timeout_secs);

        let default_source =
            std::env::var("KANSAS_DEFAULT_SOURCE").unwrap_or(defaults.default_source);

        let small_image_size = match std::env::var("KANSAS_SMALL_IMAGE_SIZE") {
            Ok(raw) => parse_image_size(&raw)?,
            Err(_) => defaults.small_image_size,
        };

        let serving_prefix =
            std::env::var("KANSAS_SERVING_PREFIX").unwrap_or(defaults.serving_prefix);

        let local_serving_address = std::env::var("KANSAS_LOCAL_SERVING_ADDRESS")
            .unwrap_or(defaults.local_serving_address);

        let local_cards_dir = std::env::var("KANSAS_LOCAL_CARDS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.local_cards_dir);

        let poker_cards_dir = std::env::var("KANSAS_POKER_CARDS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.poker_cards_dir);

        let catalog_csv = std::env::var("KANSAS_CATALOG_CSV").ok().map(PathBuf::from);

        let keepalive_sweep_interval_secs = std::env::var("KANSAS_KEEPALIVE_SWEEP_SECS")
            .ok()
            .map(|s| s.parse())
            .transpose()
            .map_err(|err| anyhow::anyhow!("invalid KANSAS_KEEPALIVE_SWEEP_SECS: {err}"))?
            .unwrap_or(defaults.keepalive_sweep_interval_secs);

        if !cache_path.exists() {
            std::fs::create_dir_all(&cache_path)?;
        }

        Ok(Self {
            bind,
            db_path,
            cache_path,
            max_games_per_scope,
            keepalive_timeout_secs,
            default_source,
            small_image_size,
            serving_prefix,
            local_serving_address,
            local_cards_dir,
            poker_cards_dir,
            catalog_csv,
            keepalive_sweep_interval_secs,
        })
    }
}

fn parse_image_size(raw: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = raw
        .split_once('x')
        .ok_or_else(|| anyhow::anyhow!("invalid KANSAS_SMALL_IMAGE_SIZE, expected WxH"))?;
    Ok((w.parse()?, h.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_games_per_scope, 5);
        assert_eq!(cfg.keepalive_timeout_secs, 60);
        assert_eq!(cfg.small_image_size, (92, 131));
    }

    #[test]
    fn parses_image_size() {
        assert_eq!(parse_image_size("92x131").unwrap(), (92, 131));
        assert!(parse_image_size("bogus").is_err());
    }
}
