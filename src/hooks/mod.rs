//! Exported libc wrappers.
//!
//! Each wrapper keeps the glibc signature (including the variadic create
//! family, see [`open`]), computes a replacement for its path argument and
//! delegates to the implementation resolved through [`crate::registry`].
//! Results and errno from the delegated call propagate verbatim; the only
//! argument ever changed is the redirected one, and the caller's own buffer
//! is never written to.
//!
//! Dependency direction: fs/open/socket use only the engine; exec and sem
//! add their own protocols on top of it.

pub mod exec;
pub mod fs;
pub mod open;
pub mod sem;
pub mod socket;

use std::ffi::{CStr, CString};

use libc::c_char;

use crate::config;
use crate::redirect::{self, RedirectMode};
use crate::registry;

/// Compute the replacement for a wrapper's path argument.
///
/// `None` means "delegate with the caller's pointer untouched": null
/// pointers, inert configuration, non-UTF-8 paths and engine pass-through
/// all land here so the wrapped call behaves exactly as unredirected.
pub(crate) fn rewrite(path: *const c_char, mode: RedirectMode) -> Option<CString> {
    if path.is_null() {
        return None;
    }
    let cfg = config::config();
    if !cfg.is_active() {
        return None;
    }
    let path = unsafe { CStr::from_ptr(path) }.to_str().ok()?;
    let rewritten = redirect::redirect_path(cfg, path, mode, registry::probe_real)?;
    CString::new(rewritten).ok()
}

/// Wrapper for an entry point whose first argument is the path.
macro_rules! path_hook_1 {
    ($mode:ident fn $name:ident(path $(, $arg:ident: $ty:ty)*) -> $ret:ty) => {
        #[no_mangle]
        pub unsafe extern "C" fn $name(path: *const ::libc::c_char $(, $arg: $ty)*) -> $ret {
            static REAL: $crate::registry::RealFn<
                unsafe extern "C" fn(*const ::libc::c_char $(, $ty)*) -> $ret,
            > = $crate::registry::RealFn::new(stringify!($name));
            let real = REAL.get();
            match $crate::hooks::rewrite(path, $crate::redirect::RedirectMode::$mode) {
                Some(new_path) => real(new_path.as_ptr() $(, $arg)*),
                None => real(path $(, $arg)*),
            }
        }
    };
}

/// Wrapper for an entry point whose second argument is the path.
macro_rules! path_hook_2 {
    ($mode:ident fn $name:ident($a1:ident: $t1:ty, path $(, $arg:ident: $ty:ty)*) -> $ret:ty) => {
        #[no_mangle]
        pub unsafe extern "C" fn $name($a1: $t1, path: *const ::libc::c_char $(, $arg: $ty)*) -> $ret {
            static REAL: $crate::registry::RealFn<
                unsafe extern "C" fn($t1, *const ::libc::c_char $(, $ty)*) -> $ret,
            > = $crate::registry::RealFn::new(stringify!($name));
            let real = REAL.get();
            match $crate::hooks::rewrite(path, $crate::redirect::RedirectMode::$mode) {
                Some(new_path) => real($a1, new_path.as_ptr() $(, $arg)*),
                None => real($a1, path $(, $arg)*),
            }
        }
    };
}

/// Wrapper for an entry point whose third argument is the path.
macro_rules! path_hook_3 {
    ($mode:ident fn $name:ident($a1:ident: $t1:ty, $a2:ident: $t2:ty, path $(, $arg:ident: $ty:ty)*) -> $ret:ty) => {
        #[no_mangle]
        pub unsafe extern "C" fn $name(
            $a1: $t1,
            $a2: $t2,
            path: *const ::libc::c_char
            $(, $arg: $ty)*
        ) -> $ret {
            static REAL: $crate::registry::RealFn<
                unsafe extern "C" fn($t1, $t2, *const ::libc::c_char $(, $ty)*) -> $ret,
            > = $crate::registry::RealFn::new(stringify!($name));
            let real = REAL.get();
            match $crate::hooks::rewrite(path, $crate::redirect::RedirectMode::$mode) {
                Some(new_path) => real($a1, $a2, new_path.as_ptr() $(, $arg)*),
                None => real($a1, $a2, path $(, $arg)*),
            }
        }
    };
}

pub(crate) use {path_hook_1, path_hook_2, path_hook_3};
