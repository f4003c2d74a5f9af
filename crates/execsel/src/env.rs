use std::env;
use std::sync::OnceLock;

pub(crate) const NUM_THREADS_VAR: &str = "EXECSEL_NUM_THREADS";
pub(crate) const OVERRIDES_VAR: &str = "EXECSEL_OVERRIDES";

static EXECSEL_NUM_THREADS: OnceLock<Option<String>> = OnceLock::new();
static EXECSEL_OVERRIDES: OnceLock<Option<String>> = OnceLock::new();

fn read_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

pub(crate) fn num_threads() -> Option<&'static str> {
    EXECSEL_NUM_THREADS
        .get_or_init(|| read_var(NUM_THREADS_VAR))
        .as_deref()
}

pub(crate) fn overrides() -> Option<&'static str> {
    EXECSEL_OVERRIDES
        .get_or_init(|| read_var(OVERRIDES_VAR))
        .as_deref()
}
