//! Named-semaphore interception.
//!
//! Semaphore names are flattened into the per-application shm namespace,
//! the same way plain shm objects are. Creation cannot simply delegate:
//! glibc's `sem_open` stages a temp file and hard-links it into place, and
//! the staged name must live in our namespace too or the create is not
//! atomic with respect to other confined processes. So the staging dance
//! is reimplemented here and the final open delegates with create flags
//! stripped.

use std::ffi::{CStr, CString};
use std::mem::{self, MaybeUninit};

use libc::{c_char, c_int, c_uint, mode_t};
use nix::errno::Errno;
use thiserror::Error;

use crate::config::{self, SandboxConfig, SHM_DIR};
use crate::registry::RealFn;

/// Filename length cap for this platform. Not exported by the libc crate.
const NAME_MAX: usize = 255;

/// Room reserved out of `NAME_MAX` for the `sem.` file prefix and the
/// namespace separators around the application name.
pub const MAX_SEM_NAME: usize = NAME_MAX - 10;

/// Highest representable semaphore count on Linux.
pub const SEM_VALUE_MAX: c_uint = c_int::MAX as c_uint;

type SemOpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t, c_uint) -> *mut libc::sem_t;
type PathFn = unsafe extern "C" fn(*const c_char) -> c_int;
type PathPairFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;

// The staging protocol manipulates names that are not yet namespaced, so
// it must reach the real filesystem calls, not the exported wrappers.
static REAL_LINK: RealFn<PathPairFn> = RealFn::new("link");
static REAL_RENAME: RealFn<PathPairFn> = RealFn::new("rename");
static REAL_UNLINK: RealFn<PathFn> = RealFn::new("unlink");

/// Failure of the create protocol, carrying the errno the caller's ABI
/// reports.
#[derive(Debug, Error)]
pub enum SemError {
    #[error("initial value {0} exceeds SEM_VALUE_MAX")]
    ValueTooLarge(c_uint),
    #[error("namespaced semaphore name would exceed {MAX_SEM_NAME} bytes")]
    NameTooLong,
    #[error("staging file creation failed: {0}")]
    Staging(Errno),
    #[error("semaphore initialization failed: {0}")]
    Init(Errno),
    #[error("semaphore already exists")]
    Exists,
    #[error("linking semaphore into place failed: {0}")]
    Publish(Errno),
}

impl SemError {
    pub fn errno(&self) -> Errno {
        match self {
            SemError::ValueTooLarge(_) => Errno::EINVAL,
            SemError::NameTooLong => Errno::ENAMETOOLONG,
            SemError::Staging(e) | SemError::Init(e) | SemError::Publish(e) => *e,
            SemError::Exists => Errno::EEXIST,
        }
    }
}

/// How the create protocol ended when it did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Our staged object became the named semaphore.
    Created,
    /// Someone else's object was already there and `O_EXCL` was not asked.
    Existing,
}

/// Splice the application namespace into a semaphore name.
///
/// A leading `/` is stripped rather than preserved; keeping it would turn
/// the flat name into a path component. Length is validated against the
/// final on-disk filename.
pub fn map_sem_name(cfg: &SandboxConfig, name: &str) -> Result<String, SemError> {
    if cfg.app_name.len() + name.len() > MAX_SEM_NAME {
        return Err(SemError::NameTooLong);
    }
    let bare = name.strip_prefix('/').unwrap_or(name);
    Ok(format!("snap.{}.{}", cfg.app_name, bare))
}

/// On-disk location glibc gives a named semaphore under `dir`.
pub fn sem_final_path(dir: &str, name: &str) -> String {
    format!("{}/sem.{}", dir.trim_end_matches('/'), name)
}

/// Create and publish an initialized semaphore object under `dir`.
///
/// Stages an exclusive temp file, initializes a process-shared `sem_t`
/// into it and hard-links it to the final name, so concurrent creators
/// race on the link and exactly one wins. Filesystems that refuse hard
/// links get a `rename` fallback, which gives up the collision check but
/// keeps the object usable. The staging name never survives.
pub fn create_sem_object_in(
    dir: &str,
    name: &str,
    mode: mode_t,
    value: c_uint,
    exclusive: bool,
) -> Result<CreateOutcome, SemError> {
    if value > SEM_VALUE_MAX {
        return Err(SemError::ValueTooLarge(value));
    }

    let dir = dir.trim_end_matches('/');
    let template = format!("{}/{}.XXXXXX", dir, name);
    let mut template = CString::new(template)
        .map_err(|_| SemError::Staging(Errno::EINVAL))?
        .into_bytes_with_nul();
    let fd = unsafe { libc::mkstemp(template.as_mut_ptr() as *mut c_char) };
    if fd < 0 {
        return Err(SemError::Staging(Errno::last()));
    }
    template.pop();
    let temp_path = String::from_utf8_lossy(&template).into_owned();

    let staged = stage_semaphore(fd, mode, value);
    unsafe { libc::close(fd) };

    let outcome = staged.and_then(|()| publish(&temp_path, &sem_final_path(dir, name), exclusive));

    if let Ok(temp_c) = CString::new(temp_path) {
        // Harmless after a rename fallback, where the name is already gone.
        unsafe { REAL_UNLINK.get()(temp_c.as_ptr()) };
    }
    outcome
}

fn stage_semaphore(fd: c_int, mode: mode_t, value: c_uint) -> Result<(), SemError> {
    unsafe {
        if libc::fchmod(fd, mode) < 0 {
            return Err(SemError::Staging(Errno::last()));
        }
        // pshared=1 matches how glibc lays out a named semaphore.
        let mut sem = MaybeUninit::<libc::sem_t>::zeroed();
        if libc::sem_init(sem.as_mut_ptr(), 1, value) < 0 {
            return Err(SemError::Init(Errno::last()));
        }
        let size = mem::size_of::<libc::sem_t>();
        let written = libc::write(fd, sem.as_ptr() as *const libc::c_void, size);
        write_outcome(written, size)?;
    }
    Ok(())
}

/// A partial `sem_t` must never be published; a short write has no errno of
/// its own, so it is reported as `EIO` rather than whatever is stale.
fn write_outcome(written: libc::ssize_t, expected: usize) -> Result<(), SemError> {
    if written < 0 {
        Err(SemError::Init(Errno::last()))
    } else if written != expected as libc::ssize_t {
        Err(SemError::Init(Errno::EIO))
    } else {
        Ok(())
    }
}

fn publish(temp: &str, final_path: &str, exclusive: bool) -> Result<CreateOutcome, SemError> {
    let temp_c = CString::new(temp).map_err(|_| SemError::Publish(Errno::EINVAL))?;
    let final_c = CString::new(final_path).map_err(|_| SemError::Publish(Errno::EINVAL))?;

    if unsafe { REAL_LINK.get()(temp_c.as_ptr(), final_c.as_ptr()) } == 0 {
        return Ok(CreateOutcome::Created);
    }
    match Errno::last() {
        Errno::EEXIST if !exclusive => Ok(CreateOutcome::Existing),
        Errno::EEXIST => Err(SemError::Exists),
        Errno::EACCES | Errno::EPERM => {
            log::warn!(
                "hard linking semaphore into place denied, falling back to rename for '{}'",
                final_path
            );
            if unsafe { REAL_RENAME.get()(temp_c.as_ptr(), final_c.as_ptr()) } == 0 {
                Ok(CreateOutcome::Created)
            } else {
                Err(SemError::Publish(Errno::last()))
            }
        }
        e => Err(SemError::Publish(e)),
    }
}

/// Variadic in glibc; the trailing `mode` and `value` are real only under
/// `O_CREAT`, and both travel in registers, so a fixed four-argument
/// declaration preserves the calling convention. The flag decides whether
/// the slots are read.
#[no_mangle]
pub unsafe extern "C" fn sem_open(
    name: *const c_char,
    oflag: c_int,
    mode: mode_t,
    value: c_uint,
) -> *mut libc::sem_t {
    static REAL: RealFn<SemOpenFn> = RealFn::new("sem_open");
    let real = REAL.get();
    let creating = oflag & libc::O_CREAT != 0;

    if name.is_null() {
        return real(name, oflag, mode, value);
    }
    let cfg = config::config();
    if !cfg.is_active() {
        return real(name, oflag, mode, value);
    }
    let Ok(name_str) = CStr::from_ptr(name).to_str() else {
        return real(name, oflag, mode, value);
    };

    if creating && value > SEM_VALUE_MAX {
        Errno::EINVAL.set();
        return libc::SEM_FAILED;
    }

    let mapped = match map_sem_name(cfg, name_str) {
        Ok(m) => m,
        Err(e) => {
            e.errno().set();
            return libc::SEM_FAILED;
        }
    };
    let Ok(mapped_c) = CString::new(mapped.as_str()) else {
        Errno::EINVAL.set();
        return libc::SEM_FAILED;
    };

    if !creating {
        return real(mapped_c.as_ptr(), oflag, mode, value);
    }

    if let Err(e) = create_sem_object_in(SHM_DIR, &mapped, mode, value, oflag & libc::O_EXCL != 0)
    {
        log::debug!("semaphore create for '{}' failed: {}", name_str, e);
        e.errno().set();
        return libc::SEM_FAILED;
    }

    // The object exists now; reopen it without the create flags.
    let sem = real(
        mapped_c.as_ptr(),
        oflag & !(libc::O_CREAT | libc::O_EXCL),
        mode,
        value,
    );
    if sem == libc::SEM_FAILED {
        let saved = Errno::last();
        if let Ok(final_c) = CString::new(sem_final_path(SHM_DIR, &mapped)) {
            REAL_UNLINK.get()(final_c.as_ptr());
        }
        saved.set();
    }
    sem
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SandboxConfig {
        SandboxConfig::with_values("/snap/x1/current", "/snap/data/x1", "myapp")
    }

    #[test]
    fn test_name_is_namespaced_and_slash_stripped() {
        assert_eq!(map_sem_name(&cfg(), "/mysem").unwrap(), "snap.myapp.mysem");
        assert_eq!(map_sem_name(&cfg(), "mysem").unwrap(), "snap.myapp.mysem");
    }

    #[test]
    fn test_overlong_name_rejected_with_enametoolong() {
        let long = format!("/{}", "x".repeat(MAX_SEM_NAME));
        let err = map_sem_name(&cfg(), &long).unwrap_err();
        assert_eq!(err.errno(), Errno::ENAMETOOLONG);
    }

    #[test]
    fn test_value_validated_before_any_filesystem_work() {
        // The directory does not exist; an EINVAL (not ENOENT) proves the
        // value check runs first.
        let err = create_sem_object_in(
            "/nonexistent-snapbox-dir",
            "snap.myapp.s",
            0o600,
            SEM_VALUE_MAX + 1,
            false,
        )
        .unwrap_err();
        assert_eq!(err.errno(), Errno::EINVAL);
    }

    #[test]
    fn test_short_write_reports_eio_not_stale_errno() {
        Errno::ENOENT.set();
        let size = std::mem::size_of::<libc::sem_t>();
        let err = write_outcome(size as libc::ssize_t - 1, size).unwrap_err();
        assert_eq!(err.errno(), Errno::EIO);
        assert!(write_outcome(size as libc::ssize_t, size).is_ok());
    }

    #[test]
    fn test_failed_write_surfaces_its_errno() {
        Errno::ENOSPC.set();
        let err = write_outcome(-1, mem::size_of::<libc::sem_t>()).unwrap_err();
        assert_eq!(err.errno(), Errno::ENOSPC);
    }

    #[test]
    fn test_final_path_shape() {
        assert_eq!(
            sem_final_path("/dev/shm/", "snap.myapp.s"),
            "/dev/shm/sem.snap.myapp.s"
        );
    }
}
