//! Filesystem-backed socket addresses (`bind`, `connect`).
//!
//! Only pathname `AF_UNIX` addresses participate: other families carry no
//! path, and abstract-namespace names (leading NUL) are kernel identifiers,
//! not filesystem objects. A redirected address is rebuilt from scratch
//! rather than patched, with the family set and the path bounded to the
//! structure's capacity.

use std::mem;

use libc::{c_char, c_int, sa_family_t, sockaddr, sockaddr_un, socklen_t};

use crate::config;
use crate::redirect::{self, RedirectMode};
use crate::registry::{self, RealFn};

type SocketActionFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;

/// Build a pathname `AF_UNIX` address for `path`, cut to the structure's
/// capacity if it does not fit.
pub(crate) fn unix_addr_from_path(path: &str) -> (sockaddr_un, socklen_t) {
    let mut addr: sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as sa_family_t;

    // One byte stays zero so the path is always terminated.
    let capacity = addr.sun_path.len() - 1;
    let bytes = path.as_bytes();
    if bytes.len() > capacity {
        log::warn!(
            "socket path '{}' exceeds the address capacity ({}) and will be cut",
            path,
            capacity
        );
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter().take(capacity)) {
        *dst = *src as c_char;
    }

    (addr, mem::size_of::<sockaddr_un>() as socklen_t)
}

/// Extract the pathname from an address, or `None` when the address does
/// not name a filesystem object.
unsafe fn unix_path_of(addr: *const sockaddr, addrlen: socklen_t) -> Option<String> {
    if addr.is_null() {
        return None;
    }
    if (*addr).sa_family != libc::AF_UNIX as sa_family_t {
        return None;
    }
    let path_offset = mem::offset_of!(sockaddr_un, sun_path);
    if (addrlen as usize) <= path_offset {
        // Unnamed socket, nothing to redirect.
        return None;
    }
    let un = &*(addr as *const sockaddr_un);
    if un.sun_path[0] == 0 {
        // Abstract namespace.
        return None;
    }
    let avail = (addrlen as usize - path_offset).min(un.sun_path.len());
    let bytes: Vec<u8> = un.sun_path[..avail]
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8(bytes).ok()
}

unsafe fn socket_action(
    real: SocketActionFn,
    sockfd: c_int,
    addr: *const sockaddr,
    addrlen: socklen_t,
) -> c_int {
    let cfg = config::config();
    let rewritten = if cfg.is_active() {
        unix_path_of(addr, addrlen).and_then(|path| {
            redirect::redirect_path(cfg, &path, RedirectMode::Normal, registry::probe_real)
        })
    } else {
        None
    };

    match rewritten {
        Some(new_path) => {
            let (new_addr, new_len) = unix_addr_from_path(&new_path);
            real(sockfd, &new_addr as *const sockaddr_un as *const sockaddr, new_len)
        }
        None => real(sockfd, addr, addrlen),
    }
}

#[no_mangle]
pub unsafe extern "C" fn bind(sockfd: c_int, addr: *const sockaddr, addrlen: socklen_t) -> c_int {
    static REAL: RealFn<SocketActionFn> = RealFn::new("bind");
    socket_action(REAL.get(), sockfd, addr, addrlen)
}

#[no_mangle]
pub unsafe extern "C" fn connect(
    sockfd: c_int,
    addr: *const sockaddr,
    addrlen: socklen_t,
) -> c_int {
    static REAL: RealFn<SocketActionFn> = RealFn::new("connect");
    socket_action(REAL.get(), sockfd, addr, addrlen)
}
