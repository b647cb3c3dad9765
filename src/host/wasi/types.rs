//! WASI snapshot-preview1 ABI constants and structure layouts.
//!
//! The numeric values and byte layouts here are fixed by the preview1 ABI
//! used by existing toolchains and must be preserved bit-exact.

use crate::memory::LinearMemory;
use wasm5_core::TrapCode;

/// A guest-visible errno value.
pub type Errno = u16;

pub const ERRNO_SUCCESS: Errno = 0;
pub const ERRNO_2BIG: Errno = 1;
pub const ERRNO_ACCES: Errno = 2;
pub const ERRNO_AGAIN: Errno = 6;
pub const ERRNO_BADF: Errno = 8;
pub const ERRNO_BUSY: Errno = 10;
pub const ERRNO_DEADLK: Errno = 16;
pub const ERRNO_DQUOT: Errno = 19;
pub const ERRNO_EXIST: Errno = 20;
pub const ERRNO_FAULT: Errno = 21;
pub const ERRNO_FBIG: Errno = 22;
pub const ERRNO_INTR: Errno = 27;
pub const ERRNO_INVAL: Errno = 28;
pub const ERRNO_IO: Errno = 29;
pub const ERRNO_ISDIR: Errno = 31;
pub const ERRNO_LOOP: Errno = 32;
pub const ERRNO_MFILE: Errno = 33;
pub const ERRNO_MLINK: Errno = 34;
pub const ERRNO_NAMETOOLONG: Errno = 37;
pub const ERRNO_NFILE: Errno = 41;
pub const ERRNO_NOENT: Errno = 44;
pub const ERRNO_NOLCK: Errno = 46;
pub const ERRNO_NOMEM: Errno = 48;
pub const ERRNO_NOSPC: Errno = 51;
pub const ERRNO_NOSYS: Errno = 52;
pub const ERRNO_NOTDIR: Errno = 54;
pub const ERRNO_NOTEMPTY: Errno = 55;
pub const ERRNO_NOTSUP: Errno = 58;
pub const ERRNO_NOTTY: Errno = 59;
pub const ERRNO_NXIO: Errno = 60;
pub const ERRNO_OVERFLOW: Errno = 61;
pub const ERRNO_PERM: Errno = 63;
pub const ERRNO_PIPE: Errno = 64;
pub const ERRNO_RANGE: Errno = 68;
pub const ERRNO_ROFS: Errno = 69;
pub const ERRNO_SPIPE: Errno = 70;
pub const ERRNO_SRCH: Errno = 71;
pub const ERRNO_TXTBSY: Errno = 74;
pub const ERRNO_XDEV: Errno = 75;
pub const ERRNO_NOTCAPABLE: Errno = 76;

/// A guest-visible file type tag.
pub type Filetype = u8;

pub const FILETYPE_UNKNOWN: Filetype = 0;
pub const FILETYPE_BLOCK_DEVICE: Filetype = 1;
pub const FILETYPE_CHARACTER_DEVICE: Filetype = 2;
pub const FILETYPE_DIRECTORY: Filetype = 3;
pub const FILETYPE_REGULAR_FILE: Filetype = 4;
pub const FILETYPE_SOCKET_DGRAM: Filetype = 5;
pub const FILETYPE_SOCKET_STREAM: Filetype = 6;
pub const FILETYPE_SYMBOLIC_LINK: Filetype = 7;

// Rights bits (only the ones this subset distinguishes are named).
pub const RIGHTS_FD_READ: u64 = 1 << 1;
pub const RIGHTS_FD_WRITE: u64 = 1 << 6;
pub const RIGHTS_ALL: u64 = u64::MAX;

// `path_open` oflags.
pub const OFLAGS_CREAT: u16 = 1 << 0;
pub const OFLAGS_DIRECTORY: u16 = 1 << 1;
pub const OFLAGS_EXCL: u16 = 1 << 2;
pub const OFLAGS_TRUNC: u16 = 1 << 3;

// fdflags.
pub const FDFLAGS_APPEND: u16 = 1 << 0;

// `path_filestat_*` lookup flags.
pub const LOOKUPFLAGS_SYMLINK_FOLLOW: u32 = 1;

// Clock identifiers.
pub const CLOCKID_REALTIME: u32 = 0;
pub const CLOCKID_MONOTONIC: u32 = 1;
pub const CLOCKID_PROCESS_CPUTIME: u32 = 2;
pub const CLOCKID_THREAD_CPUTIME: u32 = 3;

// `fd_seek` whence values.
pub const WHENCE_SET: u8 = 0;
pub const WHENCE_CUR: u8 = 1;
pub const WHENCE_END: u8 = 2;

// `fd_filestat_set_times` / `path_filestat_set_times` flags.
pub const FSTFLAGS_ATIM: u16 = 1 << 0;
pub const FSTFLAGS_ATIM_NOW: u16 = 1 << 1;
pub const FSTFLAGS_MTIM: u16 = 1 << 2;
pub const FSTFLAGS_MTIM_NOW: u16 = 1 << 3;

/// Size of one packed dirent header; the entry name follows it.
pub const DIRENT_SIZE: u32 = 24;

/// Maps a host errno value onto the guest errno space.
///
/// Unknown host values collapse to [`ERRNO_IO`], matching the fixed table
/// approach of the C runtime.
pub fn errno_from_host(host: i32) -> Errno {
    match host {
        libc::E2BIG => ERRNO_2BIG,
        libc::EACCES => ERRNO_ACCES,
        libc::EAGAIN => ERRNO_AGAIN,
        libc::EBADF => ERRNO_BADF,
        libc::EBUSY => ERRNO_BUSY,
        libc::EDEADLK => ERRNO_DEADLK,
        libc::EDQUOT => ERRNO_DQUOT,
        libc::EEXIST => ERRNO_EXIST,
        libc::EFAULT => ERRNO_FAULT,
        libc::EFBIG => ERRNO_FBIG,
        libc::EINTR => ERRNO_INTR,
        libc::EINVAL => ERRNO_INVAL,
        libc::EIO => ERRNO_IO,
        libc::EISDIR => ERRNO_ISDIR,
        libc::ELOOP => ERRNO_LOOP,
        libc::EMFILE => ERRNO_MFILE,
        libc::EMLINK => ERRNO_MLINK,
        libc::ENAMETOOLONG => ERRNO_NAMETOOLONG,
        libc::ENFILE => ERRNO_NFILE,
        libc::ENOENT => ERRNO_NOENT,
        libc::ENOLCK => ERRNO_NOLCK,
        libc::ENOMEM => ERRNO_NOMEM,
        libc::ENOSPC => ERRNO_NOSPC,
        libc::ENOSYS => ERRNO_NOSYS,
        libc::ENOTDIR => ERRNO_NOTDIR,
        libc::ENOTEMPTY => ERRNO_NOTEMPTY,
        libc::ENOTSUP => ERRNO_NOTSUP,
        libc::ENOTTY => ERRNO_NOTTY,
        libc::ENXIO => ERRNO_NXIO,
        libc::EOVERFLOW => ERRNO_OVERFLOW,
        libc::EPERM => ERRNO_PERM,
        libc::EPIPE => ERRNO_PIPE,
        libc::ERANGE => ERRNO_RANGE,
        libc::EROFS => ERRNO_ROFS,
        libc::ESPIPE => ERRNO_SPIPE,
        libc::ESRCH => ERRNO_SRCH,
        libc::ETXTBSY => ERRNO_TXTBSY,
        libc::EXDEV => ERRNO_XDEV,
        _ => ERRNO_IO,
    }
}

/// Maps an [`std::io::Error`] onto the guest errno space.
pub fn errno_from_io(error: &std::io::Error) -> Errno {
    error.raw_os_error().map(errno_from_host).unwrap_or(ERRNO_IO)
}

/// Maps a guest memory fault onto [`ERRNO_FAULT`].
///
/// WASI pointer arguments that miss the linear memory are syscall errors,
/// never traps.
pub fn fault(_trap: TrapCode) -> Errno {
    ERRNO_FAULT
}

/// Maps a host file type (from `st_mode`) to the guest tag.
pub fn filetype_from_mode(mode: u32) -> Filetype {
    match mode & libc::S_IFMT {
        libc::S_IFREG => FILETYPE_REGULAR_FILE,
        libc::S_IFDIR => FILETYPE_DIRECTORY,
        libc::S_IFCHR => FILETYPE_CHARACTER_DEVICE,
        libc::S_IFBLK => FILETYPE_BLOCK_DEVICE,
        libc::S_IFLNK => FILETYPE_SYMBOLIC_LINK,
        libc::S_IFSOCK => FILETYPE_SOCKET_STREAM,
        _ => FILETYPE_UNKNOWN,
    }
}

/// Writes a 24-byte `fdstat` record at `addr`.
///
/// Layout: filetype at 0, flags at 2, rights_base at 8,
/// rights_inheriting at 16.
pub fn write_fdstat(
    memory: &mut LinearMemory,
    addr: u32,
    filetype: Filetype,
    flags: u16,
    rights_base: u64,
    rights_inheriting: u64,
) -> Result<(), TrapCode> {
    let bytes = memory.bytes_mut(addr, 24)?;
    bytes.fill(0);
    bytes[0] = filetype;
    bytes[2..4].copy_from_slice(&flags.to_le_bytes());
    bytes[8..16].copy_from_slice(&rights_base.to_le_bytes());
    bytes[16..24].copy_from_slice(&rights_inheriting.to_le_bytes());
    Ok(())
}

/// The fields of a 64-byte `filestat` record.
#[derive(Debug, Default, Copy, Clone)]
pub struct Filestat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: Filetype,
    pub nlink: u64,
    pub size: u64,
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

impl Filestat {
    /// Builds a record from host stat metadata.
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            filetype: filetype_from_mode(meta.mode()),
            nlink: meta.nlink(),
            size: meta.size(),
            atim: meta.atime() as u64 * 1_000_000_000 + meta.atime_nsec() as u64,
            mtim: meta.mtime() as u64 * 1_000_000_000 + meta.mtime_nsec() as u64,
            ctim: meta.ctime() as u64 * 1_000_000_000 + meta.ctime_nsec() as u64,
        }
    }

    /// Writes the record at `addr`.
    ///
    /// Layout: dev at 0, ino at 8, filetype at 16, nlink at 24, size at
    /// 32, atim at 40, mtim at 48, ctim at 56.
    pub fn write(&self, memory: &mut LinearMemory, addr: u32) -> Result<(), TrapCode> {
        let bytes = memory.bytes_mut(addr, 64)?;
        bytes.fill(0);
        bytes[0..8].copy_from_slice(&self.dev.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.ino.to_le_bytes());
        bytes[16] = self.filetype;
        bytes[24..32].copy_from_slice(&self.nlink.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.size.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.atim.to_le_bytes());
        bytes[48..56].copy_from_slice(&self.mtim.to_le_bytes());
        bytes[56..64].copy_from_slice(&self.ctim.to_le_bytes());
        Ok(())
    }
}
