//! Thin libc wrappers for non-blocking sockets and the OS event multiplexer
//! (§4.9 "Accept"). Trimmed from the teacher's `syscalls.rs`: this engine
//! runs one WebSocket driver on a single listener, so the SO_REUSEPORT
//! per-worker variant and the accept-distribute pipe helpers are dropped.
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::ptr;

use crate::error::WickResult;

pub fn create_listen_socket(host: &str, port: u16) -> WickResult<c_int> {
    let addr_str = format!("{}:{}", host, port);
    let addr: std::net::SocketAddr = addr_str
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let is_ipv6 = matches!(addr, std::net::SocketAddr::V6(_));
    let domain = if is_ipv6 { libc::AF_INET6 } else { libc::AF_INET };

    unsafe {
        #[cfg(target_os = "linux")]
        let fd = libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        #[cfg(not(target_os = "linux"))]
        let fd = libc::socket(domain, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        #[cfg(not(target_os = "linux"))]
        {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }
        }

        let one: c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );

        bind_addr(fd, &addr)?;

        if libc::listen(fd, libc::SOMAXCONN) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

fn bind_addr(fd: c_int, addr: &std::net::SocketAddr) -> WickResult<()> {
    unsafe {
        match addr {
            std::net::SocketAddr::V4(a) => {
                let sin = libc::sockaddr_in {
                    #[cfg(target_os = "macos")]
                    sin_len: mem::size_of::<libc::sockaddr_in>() as u8,
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: a.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(a.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                if libc::bind(
                    fd,
                    &sin as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin) as socklen_t,
                ) < 0
                {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
            }
            std::net::SocketAddr::V6(a) => {
                let sin6 = libc::sockaddr_in6 {
                    #[cfg(target_os = "macos")]
                    sin6_len: mem::size_of::<libc::sockaddr_in6>() as u8,
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: a.port().to_be(),
                    sin6_flowinfo: a.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: a.ip().octets(),
                    },
                    sin6_scope_id: a.scope_id(),
                };
                if libc::bind(
                    fd,
                    &sin6 as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin6) as socklen_t,
                ) < 0
                {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}

/// Accepts a non-blocking connection, returning `Ok(None)` on `EWOULDBLOCK`.
pub fn accept_connection(listen_fd: c_int) -> WickResult<Option<(c_int, std::net::SocketAddr)>> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;

    unsafe {
        #[cfg(target_os = "linux")]
        let fd = libc::accept4(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK,
        );
        #[cfg(not(target_os = "linux"))]
        let fd = libc::accept(listen_fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len);

        if fd < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            };
        }

        #[cfg(not(target_os = "linux"))]
        {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }
        }

        let addr = sockaddr_to_std(&storage).unwrap_or_else(|| {
            std::net::SocketAddr::from(([0, 0, 0, 0], 0))
        });
        Ok(Some((fd, addr)))
    }
}

unsafe fn sockaddr_to_std(storage: &libc::sockaddr_storage) -> Option<std::net::SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = &*(storage as *const _ as *const libc::sockaddr_in);
            let ip = std::net::Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(std::net::SocketAddr::new(ip.into(), u16::from_be(sin.sin_port)))
        }
        libc::AF_INET6 => {
            let sin6 = &*(storage as *const _ as *const libc::sockaddr_in6);
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(std::net::SocketAddr::new(ip.into(), u16::from_be(sin6.sin6_port)))
        }
        _ => None,
    }
}

pub fn read_nonblocking(fd: c_int, buf: &mut [u8]) -> WickResult<usize> {
    unsafe {
        let res = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(0)
            } else {
                Err(err.into())
            }
        } else {
            Ok(res as usize)
        }
    }
}

pub fn write_nonblocking(fd: c_int, buf: &[u8]) -> WickResult<usize> {
    unsafe {
        let res = libc::write(fd, buf.as_ptr() as *const c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(0)
            } else {
                Err(err.into())
            }
        } else {
            Ok(res as usize)
        }
    }
}

pub fn close_fd(fd: c_int) {
    unsafe {
        libc::close(fd);
    }
}

#[cfg(target_os = "linux")]
pub use linux_epoll::*;

#[cfg(target_os = "linux")]
mod linux_epoll {
    use super::*;
    use libc::{EPOLLET, EPOLLIN, EPOLLOUT};

    pub use libc::epoll_event;

    pub const READABLE: i32 = EPOLLIN;
    pub const WRITABLE: i32 = EPOLLOUT;

    pub fn new_event() -> epoll_event {
        epoll_event { events: 0, u64: 0 }
    }

    pub struct Selector {
        fd: c_int,
    }

    impl Selector {
        pub fn new() -> WickResult<Self> {
            unsafe {
                let fd = libc::epoll_create1(0);
                if fd < 0 {
                    return Err(io::Error::last_os_error().into());
                }
                Ok(Self { fd })
            }
        }

        pub fn add(&self, fd: c_int, token: u64, interests: i32) -> WickResult<()> {
            let mut event = epoll_event {
                events: (interests | EPOLLET) as u32,
                u64: token,
            };
            unsafe {
                if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_ADD, fd, &mut event) < 0 {
                    return Err(io::Error::last_os_error().into());
                }
            }
            Ok(())
        }

        pub fn modify(&self, fd: c_int, token: u64, interests: i32) -> WickResult<()> {
            let mut event = epoll_event {
                events: (interests | EPOLLET) as u32,
                u64: token,
            };
            unsafe {
                if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_MOD, fd, &mut event) < 0 {
                    return Err(io::Error::last_os_error().into());
                }
            }
            Ok(())
        }

        pub fn delete(&self, fd: c_int) -> WickResult<()> {
            unsafe {
                if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::ENOENT) {
                        return Err(err.into());
                    }
                }
            }
            Ok(())
        }

        pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> WickResult<usize> {
            unsafe {
                let res = libc::epoll_wait(self.fd, events.as_mut_ptr(), events.len() as c_int, timeout_ms);
                if res < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        return Ok(0);
                    }
                    return Err(err.into());
                }
                Ok(res as usize)
            }
        }
    }

    impl Drop for Selector {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use kqueue_fallback::*;

#[cfg(not(target_os = "linux"))]
mod kqueue_fallback {
    use super::*;
    use libc::{kevent, kqueue, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE};

    pub const READABLE: i32 = 1;
    pub const WRITABLE: i32 = 2;

    #[allow(non_camel_case_types)]
    #[derive(Clone, Copy)]
    pub struct epoll_event {
        pub events: u32,
        pub u64: u64,
    }

    pub fn new_event() -> epoll_event {
        epoll_event { events: 0, u64: 0 }
    }

    pub struct Selector {
        fd: c_int,
    }

    impl Selector {
        pub fn new() -> WickResult<Self> {
            unsafe {
                let fd = kqueue();
                if fd < 0 {
                    return Err(io::Error::last_os_error().into());
                }
                Ok(Self { fd })
            }
        }

        pub fn add(&self, fd: c_int, token: u64, interests: i32) -> WickResult<()> {
            self.change(fd, token, interests, EV_ADD | EV_ENABLE | EV_CLEAR)
        }

        pub fn modify(&self, fd: c_int, token: u64, interests: i32) -> WickResult<()> {
            self.change(fd, token, interests, EV_ADD | EV_ENABLE | EV_CLEAR)
        }

        pub fn delete(&self, fd: c_int) -> WickResult<()> {
            self.change(fd, 0, READABLE | WRITABLE, EV_DELETE)
        }

        fn change(&self, fd: c_int, token: u64, interests: i32, action: u16) -> WickResult<()> {
            let mut changes = [unsafe { mem::zeroed::<kevent>() }; 2];
            let mut n = 0;
            if interests & READABLE != 0 || action == EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: EVFILT_READ,
                    flags: action,
                    fflags: 0,
                    data: 0,
                    udata: token as *mut c_void,
                };
                n += 1;
            }
            if interests & WRITABLE != 0 || action == EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: EVFILT_WRITE,
                    flags: action,
                    fflags: 0,
                    data: 0,
                    udata: token as *mut c_void,
                };
                n += 1;
            }
            unsafe {
                let res = libc::kevent(self.fd, changes.as_ptr(), n as c_int, ptr::null_mut(), 0, ptr::null());
                if res < 0 && action != EV_DELETE {
                    return Err(io::Error::last_os_error().into());
                }
            }
            Ok(())
        }

        pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> WickResult<usize> {
            const MAX_BATCH: usize = 128;
            let mut kevents = [unsafe { mem::zeroed::<kevent>() }; MAX_BATCH];
            let batch_size = events.len().min(MAX_BATCH);
            let ts = timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
            };
            unsafe {
                let res = libc::kevent(self.fd, ptr::null(), 0, kevents.as_mut_ptr(), batch_size as c_int, &ts);
                if res < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        return Ok(0);
                    }
                    return Err(err.into());
                }
                let n = res as usize;
                for i in 0..n {
                    let mut ev = 0;
                    if kevents[i].filter == EVFILT_READ {
                        ev |= READABLE;
                    }
                    if kevents[i].filter == EVFILT_WRITE {
                        ev |= WRITABLE;
                    }
                    events[i] = epoll_event {
                        events: ev as u32,
                        u64: kevents[i].udata as u64,
                    };
                }
                Ok(n)
            }
        }
    }

    impl Drop for Selector {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}
