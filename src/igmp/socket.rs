
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

use std::ffi::c_int;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use crate::interface::InterfaceId;
use crate::ip::ROUTER_ALERT_OPTION;

/// Raw `IPPROTO_IGMP` socket. Received datagrams include the IPv4 header;
/// sent payloads get a header from the kernel.
#[derive(Debug)]
pub struct RawIgmpSocket {
    socket: c_int,
}

impl RawIgmpSocket {
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_IGMP) };
        if socket < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self { socket })
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<(), std::io::Error> {
        let flags = unsafe { libc::fcntl(self.socket, libc::F_GETFL, 0) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let new_flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };

        if new_flags == flags {
            return Ok(());
        }

        let code = unsafe { libc::fcntl(self.socket, libc::F_SETFL, new_flags) };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    unsafe fn setsockopt_raw<O: SocketOpt>(&self, opt: O, optval: *const libc::c_void, optlen: usize) -> Result<(), std::io::Error> {
        let code = unsafe {
            libc::setsockopt(self.socket, opt.level(), opt.optname(), optval, optlen as libc::socklen_t)
        };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn setsockopt<T: Sized, O: SocketOpt>(&self, opt: O, optval: &T) -> Result<(), std::io::Error> {
        unsafe { self.setsockopt_raw(opt, optval as *const _ as *const libc::c_void, std::mem::size_of::<T>()) }
    }

    fn ip_mreqn(&self, group: Ipv4Addr, if_id: InterfaceId) -> libc::ip_mreqn {
        libc::ip_mreqn {
            imr_multiaddr: libc::in_addr { s_addr: u32::from_ne_bytes(group.octets()) },
            imr_address: libc::in_addr { s_addr: libc::INADDR_ANY },
            imr_ifindex: if_id.index() as c_int,
        }
    }

    /// Enables kernel-level reception of `group` so its traffic reaches this socket.
    pub fn join_multicast(&self, group: Ipv4Addr, if_id: InterfaceId) -> Result<(), std::io::Error> {
        let mreq = self.ip_mreqn(group, if_id);
        unsafe { self.setsockopt(IpOpt::IP_ADD_MEMBERSHIP, &mreq) }
    }

    pub fn leave_multicast(&self, group: Ipv4Addr, if_id: InterfaceId) -> Result<(), std::io::Error> {
        let mreq = self.ip_mreqn(group, if_id);
        unsafe { self.setsockopt(IpOpt::IP_DROP_MEMBERSHIP, &mreq) }
    }

    pub fn set_multicast_if(&self, if_id: InterfaceId) -> Result<(), std::io::Error> {
        let mreq = self.ip_mreqn(Ipv4Addr::UNSPECIFIED, if_id);
        unsafe { self.setsockopt(IpOpt::IP_MULTICAST_IF, &mreq) }
    }

    pub fn set_multicast_ttl(&self, ttl: u8) -> Result<(), std::io::Error> {
        let ttl = ttl as c_int;
        unsafe { self.setsockopt(IpOpt::IP_MULTICAST_TTL, &ttl) }
    }

    pub fn set_multicast_loop(&self, loopback: bool) -> Result<(), std::io::Error> {
        let loopback: c_int = if loopback { 1 } else { 0 };
        unsafe { self.setsockopt(IpOpt::IP_MULTICAST_LOOP, &loopback) }
    }

    /// With `all` set, multicast for groups this socket has not joined is
    /// delivered too; otherwise only joined groups are.
    pub fn set_multicast_all(&self, all: bool) -> Result<(), std::io::Error> {
        let all: c_int = if all { 1 } else { 0 };
        unsafe { self.setsockopt(IpOpt::IP_MULTICAST_ALL, &all) }
    }

    /// Adds the Router Alert option to every datagram sent, as IGMP requires.
    pub fn set_router_alert(&self) -> Result<(), std::io::Error> {
        let option: [u8; 4] = [ROUTER_ALERT_OPTION, 4, 0, 0];
        unsafe { self.setsockopt(IpOpt::IP_OPTIONS, &option) }
    }

    pub fn bind_device(&self, if_name: &str) -> Result<(), std::io::Error> {
        let name = if_name.as_bytes();
        unsafe { self.setsockopt_raw(SocketLevelOpt::SO_BINDTODEVICE, name.as_ptr() as *const libc::c_void, name.len()) }
    }

    /// Reads one datagram, IPv4 header included.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        let len = unsafe { libc::recv(self.socket, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
        if len < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(len as usize)
    }

    pub fn send(&self, dst: Ipv4Addr, data: &[u8]) -> Result<(), std::io::Error> {
        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(dst.octets()) },
            sin_zero: [0; 8],
        };

        let code = unsafe {
            libc::sendto(
                self.socket,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of_val(&addr) as libc::socklen_t,
            )
        };
        if code < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(())
    }

    pub fn into_async(self) -> Result<AsyncIgmpSocket, std::io::Error> {
        AsyncIgmpSocket::new(self)
    }
}

impl Drop for RawIgmpSocket {
    fn drop(&mut self) {
        if self.socket < 0 {
            return;
        }
        unsafe { libc::close(self.socket) };
    }
}

impl AsRawFd for RawIgmpSocket {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.socket
    }
}

#[derive(Debug, Clone)]
pub struct AsyncIgmpSocket {
    inner: Arc<AsyncFd<RawIgmpSocket>>,
}

impl AsyncIgmpSocket {
    pub fn new(socket: RawIgmpSocket) -> Result<Self, std::io::Error> {
        socket.set_nonblocking(true)?;
        let inner = Arc::new(AsyncFd::with_interest(socket, Interest::READABLE | Interest::WRITABLE)?);
        Ok(Self { inner })
    }

    pub fn get_ref(&self) -> &RawIgmpSocket {
        self.inner.get_ref()
    }

    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().recv(buf)) {
                Ok(res) => {
                    return res;
                }

                Err(_) => continue,
            }
        }
    }

    pub async fn send(&self, dst: Ipv4Addr, data: &[u8]) -> Result<(), std::io::Error> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send(dst, data)) {
                Ok(res) => {
                    return res;
                }

                Err(_) => continue,
            }
        }
    }
}

pub trait SocketOpt {
    fn level(&self) -> c_int;
    fn optname(&self) -> c_int;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpOpt(c_int);

impl SocketOpt for IpOpt {
    fn level(&self) -> c_int {
        libc::IPPROTO_IP
    }

    fn optname(&self) -> c_int {
        self.0
    }
}

impl IpOpt {
    pub const IP_ADD_MEMBERSHIP: Self = Self(libc::IP_ADD_MEMBERSHIP);
    pub const IP_DROP_MEMBERSHIP: Self = Self(libc::IP_DROP_MEMBERSHIP);
    pub const IP_MULTICAST_IF: Self = Self(libc::IP_MULTICAST_IF);
    pub const IP_MULTICAST_TTL: Self = Self(libc::IP_MULTICAST_TTL);
    pub const IP_MULTICAST_LOOP: Self = Self(libc::IP_MULTICAST_LOOP);
    pub const IP_MULTICAST_ALL: Self = Self(libc::IP_MULTICAST_ALL);
    pub const IP_OPTIONS: Self = Self(libc::IP_OPTIONS);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketLevelOpt(c_int);

impl SocketOpt for SocketLevelOpt {
    fn level(&self) -> c_int {
        libc::SOL_SOCKET
    }

    fn optname(&self) -> c_int {
        self.0
    }
}

impl SocketLevelOpt {
    pub const SO_BINDTODEVICE: Self = Self(libc::SO_BINDTODEVICE);
}
