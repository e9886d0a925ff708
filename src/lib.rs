//! snapbox-preload: transparent sandbox redirection for unmodified binaries
//!
//! Loaded through `LD_PRELOAD`, this library wraps the libc entry points a
//! dynamically linked application uses to name filesystem objects, IPC
//! objects and unix sockets, and rewrites those names so writes land in a
//! private per-application tree while pre-existing system state stays
//! readable in place. The application is never recompiled or relinked and
//! observes no interface difference.
//!
//! # Architecture
//!
//! The crate is organized by responsibility, leaves first:
//!
//! - [`config`]: immutable process-wide configuration, captured once from
//!   the environment before the application runs.
//! - [`redirect`]: the pure path-redirection decision engine. No linkage
//!   mechanics, no ambient state; the one side effect (an existence probe)
//!   is injected by the caller, which keeps the engine unit testable.
//! - [`registry`]: lazy `dlsym(RTLD_NEXT)` resolution of the pre-existing
//!   implementations. All interposition mechanics live behind this seam.
//! - [`hooks`]: the exported `extern "C"` wrappers, split by family
//!   (plain path calls, the variadic create family, process replacement,
//!   named semaphores, unix sockets).
//!
//! # Design principles
//!
//! 1. **Decide, then delegate** - every wrapper computes a replacement
//!    argument and hands off to the real implementation; results and errno
//!    propagate verbatim.
//! 2. **No threads, no locks** - the only shared state is written once
//!    (config, resolved symbols) behind write-once cells.
//! 3. **Not a security boundary** - a caller invoking the kernel directly
//!    bypasses this layer entirely; confinement is someone else's job.

pub mod config;
pub mod hooks;
pub mod redirect;
pub mod registry;

/// Runs from the loader's init array, before the application's first
/// instruction. Captures the environment while it is still pristine and
/// wires the logger so the truncation diagnostic is visible by default.
extern "C" fn preload_init() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn"),
    )
    .format_timestamp(None)
    .try_init();

    config::force_init();
}

#[used]
#[link_section = ".init_array"]
static PRELOAD_INIT: extern "C" fn() = preload_init;
