
use std::ffi::{CStr, CString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(libc::c_uint);

impl InterfaceId {
    pub const UNSPECIFIED: Self = Self(0);

    pub const fn new(if_index: libc::c_uint) -> Self {
        Self(if_index)
    }

    pub const fn index(&self) -> libc::c_uint {
        self.0
    }
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn index_to_name(if_id: InterfaceId) -> Result<String, std::io::Error> {
    let mut ifname_buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    let ret = unsafe { libc::if_indextoname(if_id.index(), ifname_buf.as_mut_ptr()) };
    if ret.is_null() {
        return Err(std::io::Error::last_os_error());
    }

    let name = unsafe { CStr::from_ptr(ret) };
    Ok(name.to_string_lossy().into_owned())
}

pub fn name_to_index(name: &str) -> Result<InterfaceId, std::io::Error> {
    let c_name = CString::new(name).map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "interface name contains NUL"))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(InterfaceId::new(index))
}

/// `struct ifreq` as used by SIOCGIFFLAGS/SIOCSIFFLAGS.
#[repr(C)]
struct IfReqFlags {
    name: [libc::c_char; libc::IF_NAMESIZE],
    flags: libc::c_short,
    _pad: [u8; 22],
}

impl IfReqFlags {
    fn new(if_name: &str) -> Result<Self, std::io::Error> {
        let bytes = if_name.as_bytes();
        if bytes.is_empty() || bytes.len() >= libc::IF_NAMESIZE || bytes.contains(&0) {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid interface name"));
        }
        let mut name = [0 as libc::c_char; libc::IF_NAMESIZE];
        for (dst, src) in name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        Ok(Self { name, flags: 0, _pad: [0; 22] })
    }
}

/// Sets or clears IFF_ALLMULTI so that the link accepts every multicast
/// frame. Returns the previous setting.
pub fn set_allmulti(if_name: &str, allmulti: bool) -> Result<bool, std::io::Error> {
    let mut req = IfReqFlags::new(if_name)?;
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let result = (|| {
        if unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS as _, &mut req as *mut IfReqFlags) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let allmulti_flag = libc::IFF_ALLMULTI as libc::c_short;
        let previous = req.flags & allmulti_flag != 0;
        if previous == allmulti {
            return Ok(previous);
        }
        if allmulti {
            req.flags |= allmulti_flag;
        } else {
            req.flags &= !allmulti_flag;
        }
        if unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS as _, &req as *const IfReqFlags) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(previous)
    })();

    unsafe { libc::close(fd) };
    result
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub if_id: InterfaceId,
    pub if_name: String,
}

impl Interface {
    pub fn by_name(name: &str) -> Result<Self, std::io::Error> {
        Ok(Self {
            if_id: name_to_index(name)?,
            if_name: name.to_string(),
        })
    }
}
