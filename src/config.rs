use std::path::PathBuf;

/// External configuration surface (SPEC_FULL.md §6). `num_warps` is the only
/// compile-time parameter the core reads directly; `cache_path` is plumbed
/// through for the (out-of-scope) driver layer to consume.
#[derive(Clone, Debug)]
pub struct Config {
    pub num_warps: u32,
    pub cache_path: Option<PathBuf>,
}

impl Config {
    pub fn new(num_warps: u32) -> Self {
        Config { num_warps, cache_path: Self::default_cache_path() }
    }

    /// `TRITON_CACHE_PATH`, falling back to `$HOME/.triton/cache/`, then
    /// disabled (`None`).
    fn default_cache_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TRITON_CACHE_PATH") {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        std::env::var("HOME").ok().map(|home| PathBuf::from(home).join(".triton").join("cache"))
    }

    pub fn from_env(num_warps: u32) -> Self {
        Self::new(num_warps)
    }
}
