//! Plain path-argument wrappers: open/stat/access families, directory
//! operations and enumeration, links, renames, working-directory changes
//! and dynamic-library loading.
//!
//! Everything here is "decide a new argument, then delegate". The `*at`
//! forms and `dlopen` run in `AbsoluteOnly` mode: a relative argument is
//! interpreted against a directory fd or the loader's search path, and
//! prefixing it would change meaning rather than location.

use libc::{c_char, c_int, c_long, c_void};

use crate::hooks::{path_hook_1, path_hook_2, path_hook_3, rewrite};
use crate::redirect::RedirectMode;
use crate::registry::RealFn;

/// Application-supplied scandir callbacks pass through opaque and unchanged.
pub type DirentFilter = Option<unsafe extern "C" fn(*const libc::dirent) -> c_int>;
pub type DirentCompar =
    Option<unsafe extern "C" fn(*const *const libc::dirent, *const *const libc::dirent) -> c_int>;
pub type Dirent64Filter = Option<unsafe extern "C" fn(*const libc::dirent64) -> c_int>;
pub type Dirent64Compar =
    Option<unsafe extern "C" fn(*const *const libc::dirent64, *const *const libc::dirent64) -> c_int>;

path_hook_1!(Normal fn fopen(path, mode: *const c_char) -> *mut libc::FILE);
path_hook_1!(Normal fn unlink(path) -> c_int);
path_hook_1!(Normal fn sem_unlink(path) -> c_int);
path_hook_1!(Normal fn shm_unlink(path) -> c_int);
path_hook_2!(AbsoluteOnly fn unlinkat(dirfd: c_int, path, flags: c_int) -> c_int);

path_hook_1!(Normal fn access(path, mode: c_int) -> c_int);
path_hook_1!(Normal fn eaccess(path, mode: c_int) -> c_int);
path_hook_1!(Normal fn euidaccess(path, mode: c_int) -> c_int);
path_hook_2!(AbsoluteOnly fn faccessat(dirfd: c_int, path, mode: c_int, flags: c_int) -> c_int);

path_hook_1!(Normal fn stat(path, buf: *mut libc::stat) -> c_int);
path_hook_1!(Normal fn stat64(path, buf: *mut libc::stat64) -> c_int);
path_hook_1!(Normal fn lstat(path, buf: *mut libc::stat) -> c_int);
path_hook_1!(Normal fn lstat64(path, buf: *mut libc::stat64) -> c_int);
path_hook_2!(Normal fn __xstat(ver: c_int, path, buf: *mut libc::stat) -> c_int);
path_hook_2!(Normal fn __xstat64(ver: c_int, path, buf: *mut libc::stat64) -> c_int);
path_hook_2!(Normal fn __lxstat(ver: c_int, path, buf: *mut libc::stat) -> c_int);
path_hook_2!(Normal fn __lxstat64(ver: c_int, path, buf: *mut libc::stat64) -> c_int);
path_hook_3!(Normal fn __fxstatat(ver: c_int, dirfd: c_int, path, buf: *mut libc::stat, flags: c_int) -> c_int);
path_hook_3!(Normal fn __fxstatat64(ver: c_int, dirfd: c_int, path, buf: *mut libc::stat64, flags: c_int) -> c_int);

path_hook_1!(Normal fn statfs(path, buf: *mut libc::statfs) -> c_int);
path_hook_1!(Normal fn statfs64(path, buf: *mut libc::statfs64) -> c_int);
path_hook_1!(Normal fn statvfs(path, buf: *mut libc::statvfs) -> c_int);
path_hook_1!(Normal fn statvfs64(path, buf: *mut libc::statvfs64) -> c_int);
path_hook_1!(Normal fn pathconf(path, name: c_int) -> c_long);

path_hook_1!(Normal fn creat(path, mode: libc::mode_t) -> c_int);
path_hook_1!(Normal fn creat64(path, mode: libc::mode_t) -> c_int);
path_hook_1!(Normal fn truncate(path, length: libc::off_t) -> c_int);
path_hook_1!(Normal fn mkdir(path, mode: libc::mode_t) -> c_int);
path_hook_1!(Normal fn rmdir(path) -> c_int);
path_hook_1!(Normal fn chmod(path, mode: libc::mode_t) -> c_int);
path_hook_1!(Normal fn lchmod(path, mode: libc::mode_t) -> c_int);
path_hook_1!(Normal fn chown(path, owner: libc::uid_t, group: libc::gid_t) -> c_int);
path_hook_1!(Normal fn lchown(path, owner: libc::uid_t, group: libc::gid_t) -> c_int);

path_hook_1!(Normal fn chdir(path) -> c_int);
path_hook_1!(Normal fn readlink(path, buf: *mut c_char, bufsiz: libc::size_t) -> libc::ssize_t);
path_hook_1!(Normal fn realpath(path, resolved: *mut c_char) -> *mut c_char);
path_hook_2!(Normal fn bindtextdomain(domain: *const c_char, path) -> *mut c_char);
path_hook_2!(Normal fn inotify_add_watch(fd: c_int, path, mask: u32) -> c_int);

path_hook_1!(Normal fn opendir(path) -> *mut libc::DIR);
path_hook_1!(Normal fn scandir(path, namelist: *mut *mut *mut libc::dirent, filter: DirentFilter, compar: DirentCompar) -> c_int);
path_hook_1!(Normal fn scandir64(path, namelist: *mut *mut *mut libc::dirent64, filter: Dirent64Filter, compar: Dirent64Compar) -> c_int);
path_hook_2!(AbsoluteOnly fn scandirat(dirfd: c_int, path, namelist: *mut *mut *mut libc::dirent, filter: DirentFilter, compar: DirentCompar) -> c_int);
path_hook_2!(AbsoluteOnly fn scandirat64(dirfd: c_int, path, namelist: *mut *mut *mut libc::dirent64, filter: Dirent64Filter, compar: Dirent64Compar) -> c_int);

// Non-absolute library names are not plain relative paths; they feed the
// loader's whole lookup algorithm, so only absolute loads are rewritten.
path_hook_1!(AbsoluteOnly fn dlopen(path, flags: c_int) -> *mut c_void);

type TwoPathFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;

/// Two-path operations: the source runs the full algorithm, the target only
/// needs its parent to exist yet.
unsafe fn two_path_action(real: TwoPathFn, old: *const c_char, new: *const c_char) -> c_int {
    let old_rw = rewrite(old, RedirectMode::Normal);
    let new_rw = rewrite(new, RedirectMode::Target);
    real(
        old_rw.as_ref().map_or(old, |p| p.as_ptr()),
        new_rw.as_ref().map_or(new, |p| p.as_ptr()),
    )
}

#[no_mangle]
pub unsafe extern "C" fn rename(old: *const c_char, new: *const c_char) -> c_int {
    static REAL: RealFn<TwoPathFn> = RealFn::new("rename");
    two_path_action(REAL.get(), old, new)
}

#[no_mangle]
pub unsafe extern "C" fn link(old: *const c_char, new: *const c_char) -> c_int {
    static REAL: RealFn<TwoPathFn> = RealFn::new("link");
    two_path_action(REAL.get(), old, new)
}
