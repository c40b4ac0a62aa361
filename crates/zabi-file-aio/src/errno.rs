//! Host-errno to runtime error-kind mapping, grounded on
//! `zi_file_aio25.c::map_errno_to_zi`.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Again,
    Invalid,
    Closed,
    Denied,
    Noent,
    Oom,
    Io,
}

impl RuntimeErrorKind {
    pub fn from_errno(e: i32) -> Self {
        match e {
            libc::EAGAIN => RuntimeErrorKind::Again,
            #[allow(unreachable_patterns)] // EWOULDBLOCK == EAGAIN on Linux
            libc::EWOULDBLOCK => RuntimeErrorKind::Again,
            libc::EEXIST | libc::ENOTEMPTY | libc::EINVAL => RuntimeErrorKind::Invalid,
            libc::EBADF => RuntimeErrorKind::Closed,
            libc::EACCES | libc::EPERM | libc::ELOOP => RuntimeErrorKind::Denied,
            libc::ENOENT | libc::ENOTDIR => RuntimeErrorKind::Noent,
            libc::EISDIR => RuntimeErrorKind::Invalid,
            libc::ENOMEM => RuntimeErrorKind::Oom,
            _ => RuntimeErrorKind::Io,
        }
    }

    pub fn last_os_error() -> Self {
        Self::from_errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeErrorKind::Again => "again",
            RuntimeErrorKind::Invalid => "invalid",
            RuntimeErrorKind::Closed => "closed",
            RuntimeErrorKind::Denied => "denied",
            RuntimeErrorKind::Noent => "noent",
            RuntimeErrorKind::Oom => "oom",
            RuntimeErrorKind::Io => "io",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_eacces_maps_to_denied() {
        assert_eq!(RuntimeErrorKind::from_errno(libc::EACCES), RuntimeErrorKind::Denied);
    }

    #[test]
    fn test_enoent_maps_to_noent() {
        assert_eq!(RuntimeErrorKind::from_errno(libc::ENOENT), RuntimeErrorKind::Noent);
    }

    #[test]
    fn test_unknown_errno_maps_to_io() {
        assert_eq!(RuntimeErrorKind::from_errno(999_999), RuntimeErrorKind::Io);
    }
}
