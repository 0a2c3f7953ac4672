//! Helpers for resolving the daemon home directory and its artifacts.
use std::{env, fs, io, path::PathBuf};

/// Environment variable that overrides the default home directory.
pub const HOME_ENV: &str = "NOVA_HOME";

/// Directory name used under `$HOME` when `NOVA_HOME` is not set.
const DEFAULT_DIR: &str = ".novapm";

/// Returns the daemon home directory, honouring `NOVA_HOME`.
pub fn home_dir() -> PathBuf {
    if let Some(dir) = env::var_os(HOME_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }

    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"));
    home.join(DEFAULT_DIR)
}

/// Returns the directory where per-process log files reside.
pub fn log_dir() -> PathBuf {
    home_dir().join("logs")
}

/// Path of the daemon PID file.
pub fn pid_path() -> PathBuf {
    home_dir().join("nova.pid")
}

/// Path of the local control socket.
pub fn socket_path() -> PathBuf {
    home_dir().join("nova.sock")
}

/// Path of the persistence database.
pub fn db_path() -> PathBuf {
    home_dir().join("nova.db")
}

/// Path of the resurrection snapshot.
pub fn dump_path() -> PathBuf {
    home_dir().join("dump.json")
}

/// Creates the home directory tree if it does not exist yet.
pub fn ensure_dirs() -> io::Result<()> {
    fs::create_dir_all(home_dir())?;
    fs::create_dir_all(log_dir())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::EnvGuard;
    use tempfile::tempdir;

    #[test]
    fn nova_home_overrides_default() {
        let mut env = EnvGuard::acquire();
        let temp = tempdir().unwrap();
        env.set(HOME_ENV, temp.path());

        assert_eq!(home_dir(), temp.path());
        assert_eq!(socket_path(), temp.path().join("nova.sock"));
        assert_eq!(db_path(), temp.path().join("nova.db"));
        assert_eq!(log_dir(), temp.path().join("logs"));
    }

    #[test]
    fn default_home_lives_under_user_home() {
        let mut env = EnvGuard::acquire();
        let temp = tempdir().unwrap();
        env.unset(HOME_ENV);
        env.set("HOME", temp.path());

        assert_eq!(home_dir(), temp.path().join(".novapm"));
        assert_eq!(pid_path(), temp.path().join(".novapm/nova.pid"));
    }

    #[test]
    fn ensure_dirs_creates_tree() {
        let mut env = EnvGuard::acquire();
        let temp = tempdir().unwrap();
        env.set(HOME_ENV, temp.path().join("state"));

        ensure_dirs().unwrap();
        assert!(home_dir().exists());
        assert!(log_dir().exists());
    }
}
