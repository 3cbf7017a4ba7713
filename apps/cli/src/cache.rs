use std::{
    hash::{DefaultHasher, Hash, Hasher},
    path::{Path, PathBuf},
};

/// Cache path for a remote audio reference, keyed by a hash of its URL.
pub fn audio_cache_path(cache_dir: &Path, url: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    cache_dir.join("audio").join(format!("{}.wav", hasher.finish()))
}

pub fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Local path of a non-remote reference; `file://` prefixes are stripped.
pub fn local_path(reference: &str) -> PathBuf {
    PathBuf::from(reference.strip_prefix("file://").unwrap_or(reference))
}
