//! Error taxonomy shared by the next-hop subsystem and the control API.
//!
//! Datapath errors are never surfaced as values — they become per-edge drop
//! counters. Control-plane errors map onto errno-style status codes carried
//! in API replies.

use thiserror::Error;

/// Errno-style status codes carried on the wire.
pub mod codes {
    pub const OK: u32 = 0;
    pub const ENOENT: u32 = 2;
    pub const EAGAIN: u32 = 11;
    pub const ENOMEM: u32 = 12;
    pub const EBUSY: u32 = 16;
    pub const EEXIST: u32 = 17;
    pub const EINVAL: u32 = 22;
    pub const EOVERFLOW: u32 = 75;
    pub const EHOSTUNREACH: u32 = 113;
}

/// Control-plane error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed packet or API input.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),

    /// No such next-hop or route.
    #[error("not found")]
    NotFound,

    /// A record for the tuple already exists.
    #[error("already exists")]
    Exists,

    /// Referenced by other state; cannot be removed.
    #[error("busy")]
    Busy,

    /// A bound was exceeded.
    #[error("bounds exceeded")]
    Overflow,

    /// Allocation failed or a ring is full.
    #[error("out of resources")]
    Resource,

    /// Resolution failed; the destination cannot be reached.
    #[error("host unreachable")]
    Unreachable,

    /// Transient: the caller must back off (and, on the datapath, drop).
    #[error("try again")]
    Again,
}

impl Error {
    /// Numeric status code for API replies.
    pub fn code(&self) -> u32 {
        match self {
            Error::Invalid(_) => codes::EINVAL,
            Error::NotFound => codes::ENOENT,
            Error::Exists => codes::EEXIST,
            Error::Busy => codes::EBUSY,
            Error::Overflow => codes::EOVERFLOW,
            Error::Resource => codes::ENOMEM,
            Error::Unreachable => codes::EHOSTUNREACH,
            Error::Again => codes::EAGAIN,
        }
    }
}

/// Status code for an API outcome, `codes::OK` on success.
pub fn status_of(result: &Result<(), Error>) -> u32 {
    match result {
        Ok(()) => codes::OK,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_errno() {
        assert_eq!(Error::NotFound.code(), 2);
        assert_eq!(Error::Exists.code(), 17);
        assert_eq!(Error::Busy.code(), 16);
        assert_eq!(Error::Invalid("x").code(), 22);
        assert_eq!(status_of(&Ok(())), 0);
    }
}
