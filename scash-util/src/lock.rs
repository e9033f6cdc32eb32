use super::dirs::get_service_dir;
use named_lock::{NamedLock, NamedLockGuard};

/// Try to take the per-service named lock, so only one indexer process
/// writes to a ledger at any time.
pub fn try_process_lock(service_name: &str) -> Result<(NamedLock, NamedLockGuard), String> {
    let dir = get_service_dir(service_name);
    std::fs::create_dir_all(&dir).map_err(|e| {
        format!("Failed to create service directory {}: {}", dir.display(), e)
    })?;

    let lock_name = format!("{}_lock", service_name);
    let lock = NamedLock::create(&lock_name)
        .map_err(|e| format!("Failed to create process lock {}: {}", lock_name, e))?;

    let guard = lock
        .try_lock()
        .map_err(|e| format!("Another instance of {} is already running: {}", service_name, e))?;

    Ok((lock, guard))
}

pub fn init_process_lock(service_name: &str) -> (NamedLock, NamedLockGuard) {
    match try_process_lock(service_name) {
        Ok(ret) => ret,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
