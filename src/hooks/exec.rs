//! Process replacement: target redirection, preload propagation and the
//! alternate-loader retry for foreign-architecture binaries.
//!
//! A child program cannot be trusted to forward our configuration, so every
//! exec rebuilds the environment: the caller's entries are copied, each
//! captured preload entry is merged back into `LD_PRELOAD`, and the sandbox
//! root variable is re-injected. Entries are carried as raw bytes and only
//! the preload merge is textual, so a caller's non-UTF-8 entries reach the
//! child byte for byte. argv is never modified on the primary attempt.

use std::ffi::{CStr, CString};
use std::ptr;

use libc::{c_char, c_int};
use nix::errno::Errno;

use crate::config::{self, SandboxConfig, LD_LINUX, LD_PRELOAD_VAR, SANDBOX_ROOT_VAR};
use crate::hooks::rewrite;
use crate::redirect::{self, Probe, RedirectMode};
use crate::registry::{self, RealFn};

extern "C" {
    static environ: *const *const c_char;
}

type ExecveFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;

/// Owned strings plus the null-terminated pointer array the exec ABI wants.
/// The pointers stay valid for as long as the holder lives, which covers
/// the delegated call (exec only returns on failure).
struct CStringArray {
    _strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl CStringArray {
    fn from_cstrings(strings: Vec<CString>) -> Self {
        let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(ptr::null());
        Self {
            _strings: strings,
            ptrs,
        }
    }

    fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

/// Append `entry` to the (last) `LD_PRELOAD` definition unless it is
/// already listed; create the definition if there is none.
fn ensure_in_ld_preload(ld_preload: &mut Vec<u8>, entry: &[u8]) {
    if ld_preload.is_empty() {
        ld_preload.extend_from_slice(LD_PRELOAD_VAR.as_bytes());
        ld_preload.push(b'=');
        ld_preload.extend_from_slice(entry);
        return;
    }
    let value_start = ld_preload
        .iter()
        .position(|&b| b == b'=')
        .map_or(0, |i| i + 1);
    if !ld_preload[value_start..]
        .split(|&b| b == b':')
        .any(|p| p == entry)
    {
        ld_preload.push(b':');
        ld_preload.extend_from_slice(entry);
    }
}

/// Build the child's environment from the caller's entries.
///
/// Caller entries pass through untouched; the merged `LD_PRELOAD` and the
/// configuration variable are appended as additional definitions, and like
/// the loader itself, anything reading the environment takes the last one.
pub(crate) fn build_child_env(cfg: &SandboxConfig, caller_env: Vec<CString>) -> Vec<CString> {
    let mut out = Vec::with_capacity(caller_env.len() + 2);
    let prefix = format!("{}=", LD_PRELOAD_VAR).into_bytes();
    let mut ld_preload: Vec<u8> = Vec::new();

    for entry in caller_env {
        if entry.as_bytes().starts_with(&prefix) {
            ld_preload = entry.as_bytes().to_vec();
        }
        out.push(entry);
    }

    for saved in &cfg.preload_entries {
        ensure_in_ld_preload(&mut ld_preload, saved.as_bytes());
    }
    if !cfg.preload_entries.is_empty() {
        // The bytes came from NUL-terminated entries plus our own paths,
        // so the conversion cannot fail.
        if let Ok(merged) = CString::new(ld_preload) {
            out.push(merged);
        }
    }
    if cfg.is_active() {
        if let Ok(injected) = CString::new(format!("{}={}", SANDBOX_ROOT_VAR, cfg.sandbox_root)) {
            out.push(injected);
        }
    }

    out
}

/// argv for the alternate-loader retry: the loader becomes the program and
/// the rewritten target becomes its first argument.
pub(crate) fn loader_argv(target: &CStr, original: Vec<CString>) -> Vec<CString> {
    let mut argv = Vec::with_capacity(original.len() + 1);
    argv.push(target.to_owned());
    argv.extend(original);
    argv
}

unsafe fn collect_ptr_array(list: *const *const c_char) -> Vec<CString> {
    let mut out = Vec::new();
    if list.is_null() {
        return out;
    }
    let mut i = 0;
    loop {
        let item = *list.add(i);
        if item.is_null() {
            break;
        }
        out.push(CStr::from_ptr(item).to_owned());
        i += 1;
    }
    out
}

/// One retry, no loop: a binary whose hardcoded loader is missing from the
/// real root but present in the sandbox is re-run through that loader.
/// Returns `None` when no sandboxed alternate exists, in which case the
/// primary failure stands.
unsafe fn retry_with_alternate_loader(
    cfg: &SandboxConfig,
    real: ExecveFn,
    target: *const c_char,
    argv: *const *const c_char,
    env: &CStringArray,
) -> Option<c_int> {
    let loader =
        redirect::redirect_path(cfg, LD_LINUX, RedirectMode::Normal, registry::probe_real)?;
    let loader = CString::new(loader).ok()?;

    let argv_owned = loader_argv(CStr::from_ptr(target), collect_ptr_array(argv));
    let argv_holder = CStringArray::from_cstrings(argv_owned);

    Some(real(loader.as_ptr(), argv_holder.as_ptr(), env.as_ptr()))
}

unsafe fn exec_with_propagation(
    real: ExecveFn,
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let cfg = config::config();
    if path.is_null() || !cfg.is_active() {
        return real(path, argv, envp);
    }

    let rewritten = rewrite(path, RedirectMode::Normal);
    let actual = rewritten.as_ref().map_or(path, |p| p.as_ptr());

    let env = CStringArray::from_cstrings(build_child_env(cfg, collect_ptr_array(envp)));
    let result = real(actual, argv, env.as_ptr());

    if result == -1 && Errno::last() == Errno::ENOENT {
        // ENOENT with the target itself present means something in the
        // loading chain is missing - most likely the wrong ld.so for the
        // binary's architecture. The probe clobbers errno, so the original
        // failure is restored if the retry is declined.
        let saved = Errno::last();
        let target_present = CStr::from_ptr(actual)
            .to_str()
            .map(|p| registry::probe_real(p) == Probe::Exists)
            .unwrap_or(false);
        if target_present {
            if let Some(retried) = retry_with_alternate_loader(cfg, real, actual, argv, &env) {
                return retried;
            }
        }
        saved.set();
    }

    result
}

#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    static REAL: RealFn<ExecveFn> = RealFn::new("execve");
    exec_with_propagation(REAL.get(), path, argv, envp)
}

#[no_mangle]
pub unsafe extern "C" fn __execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    static REAL: RealFn<ExecveFn> = RealFn::new("__execve");
    exec_with_propagation(REAL.get(), path, argv, envp)
}

#[no_mangle]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    execve(path, argv, environ)
}
