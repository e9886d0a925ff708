//! The variadic create family: `open`, `open64`, `openat`, `openat64`.
//!
//! glibc declares these `(path, flags, ...)` with a `mode_t` that is real
//! only when the flags carry a create bit. Declaring the wrappers with a
//! fixed trailing `mode_t` preserves the calling convention on every
//! supported ABI (the slot is a register either way), and the flag argument
//! decides whether the slot is read - the trailing list is never walked
//! blindly.

use libc::{c_char, c_int, mode_t};

use crate::hooks::rewrite;
use crate::redirect::RedirectMode;
use crate::registry::RealFn;

/// Trailing-argument shape for a create-family call, decoded once from the
/// flag argument before the fixed-arity core runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CreateArgs {
    /// No create bit: the mode slot holds garbage and must not be used.
    Plain,
    /// `O_CREAT`/`O_TMPFILE`: the caller really passed a mode.
    Mode(mode_t),
}

impl CreateArgs {
    pub(crate) fn decode(flags: c_int, mode: mode_t) -> Self {
        if flags & (libc::O_CREAT | libc::O_TMPFILE) != 0 {
            CreateArgs::Mode(mode)
        } else {
            CreateArgs::Plain
        }
    }

    fn forwarded(self) -> mode_t {
        match self {
            CreateArgs::Plain => 0,
            CreateArgs::Mode(mode) => mode,
        }
    }
}

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int;
type OpenatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, mode_t) -> c_int;

unsafe fn open_core(real: OpenFn, path: *const c_char, flags: c_int, args: CreateArgs) -> c_int {
    match rewrite(path, RedirectMode::Normal) {
        Some(new_path) => real(new_path.as_ptr(), flags, args.forwarded()),
        None => real(path, flags, args.forwarded()),
    }
}

unsafe fn openat_core(
    real: OpenatFn,
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    args: CreateArgs,
) -> c_int {
    match rewrite(path, RedirectMode::AbsoluteOnly) {
        Some(new_path) => real(dirfd, new_path.as_ptr(), flags, args.forwarded()),
        None => real(dirfd, path, flags, args.forwarded()),
    }
}

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    static REAL: RealFn<OpenFn> = RealFn::new("open");
    open_core(REAL.get(), path, flags, CreateArgs::decode(flags, mode))
}

#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    static REAL: RealFn<OpenFn> = RealFn::new("open64");
    open_core(REAL.get(), path, flags, CreateArgs::decode(flags, mode))
}

#[no_mangle]
pub unsafe extern "C" fn openat(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    static REAL: RealFn<OpenatFn> = RealFn::new("openat");
    openat_core(REAL.get(), dirfd, path, flags, CreateArgs::decode(flags, mode))
}

#[no_mangle]
pub unsafe extern "C" fn openat64(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    static REAL: RealFn<OpenatFn> = RealFn::new("openat64");
    openat_core(REAL.get(), dirfd, path, flags, CreateArgs::decode(flags, mode))
}
