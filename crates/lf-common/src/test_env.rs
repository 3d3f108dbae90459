use std::{env, sync::Mutex};

static ENV_GUARD: Mutex<()> = Mutex::new(());

/// Runs `f` with the given variables set (`Some`) or removed (`None`), then
/// restores the previous values. Serialised across the crate's tests.
pub(crate) fn with_envs(vars: &[(&str, Option<&str>)], f: impl FnOnce()) {
    let _guard = ENV_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let previous: Vec<(&str, Option<String>)> = vars
        .iter()
        .map(|(var, value)| {
            let old = env::var(var).ok();
            match value {
                Some(v) => unsafe { env::set_var(var, v) },
                None => unsafe { env::remove_var(var) },
            }
            (*var, old)
        })
        .collect();

    f();

    for (var, previous_value) in previous {
        match previous_value {
            Some(v) => unsafe { env::set_var(var, v) },
            None => unsafe { env::remove_var(var) },
        }
    }
}
