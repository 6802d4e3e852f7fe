use anyhow::{Context, bail};
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a typed config from a single file (format picked by extension).
pub fn load_cfg<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        bail!("config file {} does not exist", path.display());
    }

    Config::builder()
        .add_source(File::from(path))
        .build()
        .with_context(|| format!("failed to read config from {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))
}

/// Merge several files (missing ones are skipped) and then environment
/// variables, `__` separating nested keys: `DUPLEX_RUNTIME__IO_THREADS=4`.
pub fn load_cfg_merge<T, P>(
    paths: impl IntoIterator<Item = P>,
    env_prefix: Option<&str>,
) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let mut builder = Config::builder();

    for p in paths {
        let p = p.as_ref();
        if p.exists() {
            builder = builder.add_source(File::from(p));
        } else {
            tracing::warn!("[Config] file {} does not exist, skipped", p.display());
        }
    }

    builder = match env_prefix {
        Some(prefix) => builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__"),
        ),
        None => builder.add_source(Environment::default().separator("__")),
    };

    builder
        .build()
        .context("failed to build configuration from provided sources")?
        .try_deserialize()
        .context("failed to deserialize merged configuration")
}
