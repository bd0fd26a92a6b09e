use crate::error::{Error, Result};
use log::{debug, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Exclusive lock over the managed state, held as a pid file.
/// Released when dropped.
#[derive(Debug)]
pub struct ConfigLock {
    path: PathBuf,
}

impl ConfigLock {
    /**
     * @brief Take the lock in `state_dir`, reclaiming it if the holder is gone.
     * @return Locked when another live process holds it.
     */
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).map_err(|e| Error::io(state_dir, e))?;
        let path = state_dir.join("lock");
        for _ in 0..3 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{}", std::process::id()).map_err(|e| Error::io(&path, e))?;
                    debug!("acquired {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path);
                    match holder {
                        Some(pid) if process_alive(pid) => {
                            return Err(Error::Locked { path, pid });
                        }
                        _ => {
                            // another process may have reclaimed it meanwhile
                            if read_holder(&path) != holder {
                                continue;
                            }
                            warn!("reclaiming stale lock {}", path.display());
                            let _ = fs::remove_file(&path);
                        }
                    }
                }
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
        Err(Error::PreconditionFailed(format!(
            "could not acquire {}",
            path.display()
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        if read_holder(&self.path) == Some(std::process::id()) {
            let _ = fs::remove_file(&self.path);
        } else {
            warn!("{} no longer holds our pid, left in place", self.path.display());
        }
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ConfigLock::acquire(dir.path()).unwrap();
        assert!(matches!(ConfigLock::acquire(dir.path()), Err(Error::Locked { .. })));
        drop(lock);
        assert!(!dir.path().join("lock").exists());
        assert!(ConfigLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lock"), "garbage").unwrap();
        let lock = ConfigLock::acquire(dir.path()).unwrap();
        let pid = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid, std::process::id().to_string());
    }

    #[test]
    fn drop_leaves_a_lock_taken_over_by_another_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ConfigLock::acquire(dir.path()).unwrap();
        let path = lock.path().to_path_buf();
        // pid 1 is never us
        fs::write(&path, "1").unwrap();
        drop(lock);
        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }
}
