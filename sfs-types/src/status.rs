//! The single `u8` status alphabet shared by every job, read and trash
//! operation in the core. Numeric values are stable across releases since
//! they travel over the wire to clients that predate this crate.

use serde::{Deserialize, Serialize};

/// Status code returned by a completed job, read, or trash operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Ok = 0,
    EPerm = 1,
    ENotDir = 2,
    ENoEnt = 3,
    EAccess = 4,
    EExist = 5,
    EInval = 6,
    ENotEmpty = 7,
    ChunkLost = 8,
    OutOfMemory = 9,
    IndexTooBig = 10,
    Locked = 11,
    NoChunkServers = 12,
    NoChunk = 13,
    ChunkBusy = 14,
    Register = 15,
    NotDone = 16,
    NotStarted = 17,
    WrongVersion = 18,
    ChunkExist = 19,
    NoSpace = 20,
    Io = 21,
    BNumTooBig = 22,
    WrongSize = 23,
    WrongOffset = 24,
    CantConnect = 25,
    WrongChunkId = 26,
    Disconnected = 27,
    Crc = 28,
    Delayed = 29,
    CantCreatePath = 30,
    Mismatch = 31,
    ERoFs = 32,
    Quota = 33,
    BadSessionId = 34,
    ENoAttr = 35,
    ENotSup = 36,
    ERange = 37,
    Timeout = 38,
    NotPossible = 39,
    TempNotPossible = 40,
    Waiting = 41,
    Unknown = 42,
    ENameTooLong = 43,
    EFBig = 44,
    EBadF = 45,
    ENoData = 46,
    E2Big = 47,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }

    /// Deterministic conversion to an OS errno, matching the mapping clients
    /// rely on (e.g. `WrongSize` surfaces as `EINVAL`, `ENoAttr` as `ENoData`
    /// on platforms that don't distinguish the two).
    pub fn to_errno(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::EPerm => libc::EPERM,
            StatusCode::ENotDir => libc::ENOTDIR,
            StatusCode::ENoEnt => libc::ENOENT,
            StatusCode::EAccess => libc::EACCES,
            StatusCode::EExist => libc::EEXIST,
            StatusCode::ENotEmpty => libc::ENOTEMPTY,
            StatusCode::Io => libc::EIO,
            StatusCode::ERoFs => libc::EROFS,
            StatusCode::Quota => libc::EDQUOT,
            StatusCode::ENoAttr => libc::ENODATA,
            StatusCode::ENotSup => libc::ENOTSUP,
            StatusCode::ERange => libc::ERANGE,
            StatusCode::ENameTooLong => libc::ENAMETOOLONG,
            StatusCode::EFBig => libc::EFBIG,
            StatusCode::EBadF => libc::EBADF,
            StatusCode::ENoData => libc::ENODATA,
            StatusCode::OutOfMemory => libc::ENOMEM,
            StatusCode::E2Big => libc::E2BIG,
            StatusCode::Timeout => libc::ETIMEDOUT,
            StatusCode::CantConnect | StatusCode::Disconnected => libc::ECONNRESET,
            // Everything else (protocol-level statuses with no direct POSIX
            // counterpart) maps to EINVAL, matching the reference conversion.
            _ => libc::EINVAL,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for StatusCode {}
