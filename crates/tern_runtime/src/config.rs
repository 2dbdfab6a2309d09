//! Runtime configuration.

/// Diagnostics switches. Never consulted for control flow.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeConfig {
    /// Print actor lifecycle events to stderr.
    pub trace_actors: bool,
    /// Print a leak report once every actor has been joined.
    pub report_leaks: bool,
}

impl RuntimeConfig {
    /// Read `TERN_TRACE_ACTORS` and `TERN_LEAK_CHECK`.
    pub fn from_env() -> Self {
        Self {
            trace_actors: env_flag("TERN_TRACE_ACTORS"),
            report_leaks: env_flag("TERN_LEAK_CHECK"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
