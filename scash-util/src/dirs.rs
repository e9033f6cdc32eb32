use super::constants::{SCASH_ROOT_DIR, SCASH_ROOT_ENV};
use std::path::PathBuf;

/// Root of all service directories: `$SCASH_ROOT` when set, else `~/.scash`,
/// else `./.scash` when there is no home directory.
pub fn get_scash_root_dir() -> PathBuf {
    resolve_root_dir(std::env::var_os(SCASH_ROOT_ENV).map(PathBuf::from), dirs::home_dir())
}

fn resolve_root_dir(root_override: Option<PathBuf>, home_dir: Option<PathBuf>) -> PathBuf {
    match (root_override, home_dir) {
        (Some(root), _) if !root.as_os_str().is_empty() => root,
        (_, Some(home)) => home.join(SCASH_ROOT_DIR),
        _ => PathBuf::from(".").join(SCASH_ROOT_DIR),
    }
}

pub fn get_service_dir(service_name: &str) -> PathBuf {
    get_scash_root_dir().join(service_name)
}
