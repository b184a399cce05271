//! Tracing setup with runtime-adjustable verbosity.
//!
//! `init` installs a global subscriber whose filter can be swapped at
//! runtime through a reload handle, so embedders can bump verbosity
//! without restarting active tunnels.

use std::sync::atomic::{AtomicI32, Ordering};

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

static FILTER_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();
static VERBOSITY_IDX: AtomicI32 = AtomicI32::new(2); // 0=error,1=warn,2=info,3=debug,4=trace

const FILTER_LEVELS: [LevelFilter; 5] = [
    LevelFilter::ERROR,
    LevelFilter::WARN,
    LevelFilter::INFO,
    LevelFilter::DEBUG,
    LevelFilter::TRACE,
];

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let (filter_layer, handle) = reload::Layer::new(filter);
    if tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
    {
        set_reload_handle(handle, LevelFilter::INFO);
    }
}

/// Register an externally built reload handle.
pub fn set_reload_handle(handle: reload::Handle<EnvFilter, Registry>, initial: LevelFilter) {
    let _ = FILTER_HANDLE.set(handle);
    VERBOSITY_IDX.store(level_to_idx(initial), Ordering::Relaxed);
}

/// Step the global filter one level noisier. Returns the new level, or
/// `None` when no reload handle is registered.
pub fn increase_verbosity() -> Option<LevelFilter> {
    shift_verbosity(1)
}

/// Step the global filter one level quieter.
pub fn decrease_verbosity() -> Option<LevelFilter> {
    shift_verbosity(-1)
}

fn shift_verbosity(delta: i32) -> Option<LevelFilter> {
    let handle = FILTER_HANDLE.get()?;
    let idx = (VERBOSITY_IDX.load(Ordering::Relaxed) + delta).clamp(0, 4);
    VERBOSITY_IDX.store(idx, Ordering::Relaxed);
    let level = FILTER_LEVELS[idx as usize];
    let _ = handle.reload(EnvFilter::new(level_to_str(level)));
    Some(level)
}

fn level_to_idx(level: LevelFilter) -> i32 {
    match level {
        LevelFilter::ERROR => 0,
        LevelFilter::WARN => 1,
        LevelFilter::INFO => 2,
        LevelFilter::DEBUG => 3,
        LevelFilter::TRACE => 4,
        _ => 2,
    }
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::INFO => "info",
        LevelFilter::DEBUG => "debug",
        LevelFilter::TRACE => "trace",
        _ => "info",
    }
}
