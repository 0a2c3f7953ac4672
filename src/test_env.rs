//! Scoped environment overrides for tests that touch `NOVA_HOME` or `HOME`.
//!
//! The test harness runs tests on parallel threads while the environment is
//! process-global, so every override goes through one guard: it holds a
//! process-wide lock for its lifetime and puts every variable back (or
//! removes it) on drop.
use std::{
    env,
    ffi::{OsStr, OsString},
    sync::{Mutex, MutexGuard, OnceLock, PoisonError},
};

fn mutation_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Holds the environment still for one test and undoes its overrides.
pub struct EnvGuard {
    saved: Vec<(&'static str, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Takes the environment lock without changing anything yet.
    pub fn acquire() -> Self {
        Self {
            saved: Vec::new(),
            _lock: mutation_lock(),
        }
    }

    /// Overrides one variable until the guard drops.
    pub fn set(&mut self, key: &'static str, value: impl AsRef<OsStr>) {
        self.saved.push((key, env::var_os(key)));
        unsafe {
            env::set_var(key, value);
        }
    }

    /// Removes one variable until the guard drops.
    pub fn unset(&mut self, key: &'static str) {
        self.saved.push((key, env::var_os(key)));
        unsafe {
            env::remove_var(key);
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // Undo in reverse so repeated overrides of one key unwind correctly.
        while let Some((key, previous)) = self.saved.pop() {
            match previous {
                Some(value) => unsafe { env::set_var(key, value) },
                None => unsafe { env::remove_var(key) },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_are_undone_on_drop() {
        const KEY: &str = "NOVAPM_ENV_GUARD_PROBE";
        {
            let mut guard = EnvGuard::acquire();
            guard.set(KEY, "inner");
            assert_eq!(env::var(KEY).as_deref(), Ok("inner"));
            guard.set(KEY, "overwritten");
            assert_eq!(env::var(KEY).as_deref(), Ok("overwritten"));
        }
        assert!(env::var_os(KEY).is_none());
    }

    #[test]
    fn set_then_unset_unwinds_cleanly() {
        const KEY: &str = "NOVAPM_ENV_GUARD_UNSET_PROBE";
        let mut guard = EnvGuard::acquire();
        guard.set(KEY, "transient");
        guard.unset(KEY);
        assert!(env::var_os(KEY).is_none());
        drop(guard);
        assert!(env::var_os(KEY).is_none());
    }
}
