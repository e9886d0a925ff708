//! Lazy resolution of the pre-existing entry-point implementations.
//!
//! Every wrapper delegates through a [`RealFn`], a named handle to the next
//! definition of the symbol behind this library (`dlsym(RTLD_NEXT)`). The
//! handle is resolved on first use and cached; concurrent first use is
//! harmless because the cell is write-once and both racers would store the
//! same address. All linkage mechanics live here so the decision engine
//! stays linkage-agnostic.

use std::ffi::CString;
use std::mem;
use std::sync::OnceLock;

use crate::redirect::Probe;

/// A lazily resolved pointer to the real implementation of one entry point.
///
/// `F` is the exact `unsafe extern "C" fn` type of the wrapped symbol.
pub struct RealFn<F> {
    name: &'static str,
    cell: OnceLock<Option<F>>,
}

impl<F: Copy> RealFn<F> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceLock::new(),
        }
    }

    /// The resolved implementation.
    ///
    /// Failure to resolve is an unrecoverable configuration error of the
    /// hosting process: there is no implementation to synthesize and no
    /// sane way to report the condition through the wrapped ABI, so the
    /// process is aborted after one diagnostic.
    pub fn get(&self) -> F {
        let resolved = self.cell.get_or_init(|| unsafe { lookup_next(self.name) });
        match resolved {
            Some(f) => *f,
            None => {
                log::error!(
                    "snapbox-preload: cannot resolve '{}' behind the preload layer; aborting",
                    self.name
                );
                std::process::abort();
            }
        }
    }
}

/// SAFETY: the caller guarantees `F` is the fn-pointer type matching the
/// named symbol's actual signature.
unsafe fn lookup_next<F: Copy>(name: &str) -> Option<F> {
    debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut libc::c_void>());
    let symbol = CString::new(name).ok()?;
    let addr = libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr());
    if addr.is_null() {
        None
    } else {
        Some(mem::transmute_copy(&addr))
    }
}

type AccessFn = unsafe extern "C" fn(*const libc::c_char, libc::c_int) -> libc::c_int;

static REAL_ACCESS: RealFn<AccessFn> = RealFn::new("access");

/// Bare existence probe through the un-intercepted `access`.
///
/// Deliberately not permission-aware (`F_OK` only) and deliberately not the
/// exported wrapper, which would recurse back into redirection. Clobbers
/// errno; callers that must preserve a prior errno save it around this.
pub fn probe_real(path: &str) -> Probe {
    let Ok(cpath) = CString::new(path) else {
        return Probe::Missing;
    };
    let rc = unsafe { REAL_ACCESS.get()(cpath.as_ptr(), libc::F_OK) };
    if rc == 0 {
        Probe::Exists
    } else if nix::errno::Errno::last() == nix::errno::Errno::ENOTDIR {
        Probe::NotDir
    } else {
        Probe::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_a_real_symbol() {
        // `access` exists in every libc we can be loaded into; exercising
        // the probe proves resolution and classification both work.
        assert_eq!(probe_real("/"), Probe::Exists);
        assert_eq!(probe_real("/nonexistent-snapbox-test-path"), Probe::Missing);
    }

    #[test]
    fn test_notdir_classification() {
        // /proc/self/cmdline is a file; descending through it fails with
        // ENOTDIR, which still counts as "someone owns this name".
        assert_eq!(probe_real("/proc/self/cmdline/x"), Probe::NotDir);
    }

    #[test]
    fn test_interior_nul_never_reaches_the_probe() {
        assert_eq!(probe_real("/tmp/\0bad"), Probe::Missing);
    }
}
