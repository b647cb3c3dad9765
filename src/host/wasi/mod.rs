//! The WASI snapshot-preview1 subset.
//!
//! Handler ids 8..=48 implement a preopen-based POSIX-like surface over
//! `std::fs`/`std::io`, with `libc` filling the gaps std does not wrap
//! (clocks, randomness, timestamps, advisory allocation). Syscall
//! failures are mapped to guest errno values and returned in-band; they
//! are never traps, and a guest pointer that misses linear memory is
//! reported as `ERRNO_FAULT`.

mod ctx;
pub mod types;

pub use self::ctx::{WasiCtx, WasiCtxBuilder};

use self::ctx::{FdEntry, FdHandle};
use self::types::*;
use crate::memory::LinearMemory;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirEntryExt, FileExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use wasm5_core::UntypedValue;

pub const ARGS_GET: u32 = 8;
pub const ARGS_SIZES_GET: u32 = 9;
pub const ENVIRON_GET: u32 = 10;
pub const ENVIRON_SIZES_GET: u32 = 11;
pub const FD_READ: u32 = 12;
pub const FD_WRITE: u32 = 13;
pub const FD_CLOSE: u32 = 14;
pub const FD_SEEK: u32 = 15;
pub const FD_TELL: u32 = 16;
pub const FD_PREAD: u32 = 17;
pub const FD_PWRITE: u32 = 18;
pub const FD_PRESTAT_GET: u32 = 19;
pub const FD_PRESTAT_DIR_NAME: u32 = 20;
pub const FD_FDSTAT_GET: u32 = 21;
pub const FD_FDSTAT_SET_FLAGS: u32 = 22;
pub const FD_FDSTAT_SET_RIGHTS: u32 = 23;
pub const FD_FILESTAT_GET: u32 = 24;
pub const FD_FILESTAT_SET_SIZE: u32 = 25;
pub const FD_FILESTAT_SET_TIMES: u32 = 26;
pub const FD_SYNC: u32 = 27;
pub const FD_DATASYNC: u32 = 28;
pub const FD_READDIR: u32 = 29;
pub const FD_RENUMBER: u32 = 30;
pub const FD_ADVISE: u32 = 31;
pub const FD_ALLOCATE: u32 = 32;
pub const PATH_OPEN: u32 = 33;
pub const PATH_FILESTAT_GET: u32 = 34;
pub const PATH_FILESTAT_SET_TIMES: u32 = 35;
pub const PATH_CREATE_DIRECTORY: u32 = 36;
pub const PATH_REMOVE_DIRECTORY: u32 = 37;
pub const PATH_UNLINK_FILE: u32 = 38;
pub const PATH_RENAME: u32 = 39;
pub const PATH_LINK: u32 = 40;
pub const PATH_READLINK: u32 = 41;
pub const PATH_SYMLINK: u32 = 42;
pub const CLOCK_TIME_GET: u32 = 43;
pub const CLOCK_RES_GET: u32 = 44;
pub const RANDOM_GET: u32 = 45;
pub const SCHED_YIELD: u32 = 46;
pub const PROC_EXIT: u32 = 47;
pub const PROC_RAISE: u32 = 48;

pub(crate) const FIRST_HANDLER: u32 = ARGS_GET;
pub(crate) const LAST_HANDLER: u32 = PROC_RAISE;

/// Runs the WASI handler `handler` on the argument window and stores the
/// guest errno over the window's first slot.
pub(crate) fn invoke(
    handler: u32,
    window: &mut [UntypedValue],
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
) {
    let args: Vec<u64> = window.iter().map(|slot| slot.to_bits()).collect();
    let a32 = |i: usize| args.get(i).copied().unwrap_or(0) as u32;
    let a64 = |i: usize| args.get(i).copied().unwrap_or(0);

    let result = match handler {
        ARGS_GET => args_get(memory, &wasi.args, a32(0), a32(1)),
        ARGS_SIZES_GET => sizes_get(memory, &wasi.args, a32(0), a32(1)),
        ENVIRON_GET => args_get(memory, &wasi.env, a32(0), a32(1)),
        ENVIRON_SIZES_GET => sizes_get(memory, &wasi.env, a32(0), a32(1)),
        FD_READ => fd_read(memory, wasi, a32(0), a32(1), a32(2), a32(3)),
        FD_WRITE => fd_write(memory, wasi, a32(0), a32(1), a32(2), a32(3)),
        FD_CLOSE => fd_close(wasi, a32(0)),
        FD_SEEK => fd_seek(memory, wasi, a32(0), a64(1) as i64, a32(2) as u8, a32(3)),
        FD_TELL => fd_tell(memory, wasi, a32(0), a32(1)),
        FD_PREAD => fd_pread(memory, wasi, a32(0), a32(1), a32(2), a64(3), a32(4)),
        FD_PWRITE => fd_pwrite(memory, wasi, a32(0), a32(1), a32(2), a64(3), a32(4)),
        FD_PRESTAT_GET => fd_prestat_get(memory, wasi, a32(0), a32(1)),
        FD_PRESTAT_DIR_NAME => fd_prestat_dir_name(memory, wasi, a32(0), a32(1), a32(2)),
        FD_FDSTAT_GET => fd_fdstat_get(memory, wasi, a32(0), a32(1)),
        FD_FDSTAT_SET_FLAGS => fd_fdstat_set_flags(wasi, a32(0), a32(1) as u16),
        FD_FDSTAT_SET_RIGHTS => fd_fdstat_set_rights(wasi, a32(0), a64(1), a64(2)),
        FD_FILESTAT_GET => fd_filestat_get(memory, wasi, a32(0), a32(1)),
        FD_FILESTAT_SET_SIZE => fd_filestat_set_size(wasi, a32(0), a64(1)),
        FD_FILESTAT_SET_TIMES => {
            fd_filestat_set_times(wasi, a32(0), a64(1), a64(2), a32(3) as u16)
        }
        FD_SYNC => fd_sync(wasi, a32(0), false),
        FD_DATASYNC => fd_sync(wasi, a32(0), true),
        FD_READDIR => fd_readdir(memory, wasi, a32(0), a32(1), a32(2), a64(3), a32(4)),
        FD_RENUMBER => fd_renumber(wasi, a32(0), a32(1)),
        FD_ADVISE => fd_advise(wasi, a32(0), a64(1), a64(2), a32(3) as u8),
        FD_ALLOCATE => fd_allocate(wasi, a32(0), a64(1), a64(2)),
        PATH_OPEN => path_open(
            memory,
            wasi,
            a32(0),
            a32(1),
            a32(2),
            a32(3),
            a32(4) as u16,
            a64(5),
            a64(6),
            a32(7) as u16,
            a32(8),
        ),
        PATH_FILESTAT_GET => path_filestat_get(memory, wasi, a32(0), a32(1), a32(2), a32(3), a32(4)),
        PATH_FILESTAT_SET_TIMES => path_filestat_set_times(
            memory,
            wasi,
            a32(0),
            a32(1),
            a32(2),
            a32(3),
            a64(4),
            a64(5),
            a32(6) as u16,
        ),
        PATH_CREATE_DIRECTORY => {
            path_simple(memory, wasi, a32(0), a32(1), a32(2), |path| {
                std::fs::create_dir(path)
            })
        }
        PATH_REMOVE_DIRECTORY => {
            path_simple(memory, wasi, a32(0), a32(1), a32(2), |path| {
                std::fs::remove_dir(path)
            })
        }
        PATH_UNLINK_FILE => path_simple(memory, wasi, a32(0), a32(1), a32(2), |path| {
            std::fs::remove_file(path)
        }),
        PATH_RENAME => path_rename(memory, wasi, a32(0), a32(1), a32(2), a32(3), a32(4), a32(5)),
        PATH_LINK => path_link(
            memory,
            wasi,
            a32(0),
            a32(1),
            a32(2),
            a32(3),
            a32(4),
            a32(5),
            a32(6),
        ),
        PATH_READLINK => path_readlink(memory, wasi, a32(0), a32(1), a32(2), a32(3), a32(4), a32(5)),
        PATH_SYMLINK => path_symlink(memory, wasi, a32(0), a32(1), a32(2), a32(3), a32(4)),
        CLOCK_TIME_GET => clock_get(memory, a32(0), a32(2), false),
        CLOCK_RES_GET => clock_get(memory, a32(0), a32(1), true),
        RANDOM_GET => random_get(memory, a32(0), a32(1)),
        SCHED_YIELD => {
            std::thread::yield_now();
            Ok(())
        }
        PROC_EXIT => {
            wasi.set_exited(a32(0));
            Ok(())
        }
        PROC_RAISE => Err(ERRNO_NOTSUP),
        _ => Err(ERRNO_NOSYS),
    };
    let errno = match result {
        Ok(()) => ERRNO_SUCCESS,
        Err(errno) => errno,
    };
    if let Some(slot) = window.first_mut() {
        *slot = UntypedValue::from(u32::from(errno));
    }
}

fn write_u32(memory: &mut LinearMemory, addr: u32, value: u32) -> Result<(), Errno> {
    memory.store::<u32>(addr, 0, value).map_err(fault)
}

fn write_u64(memory: &mut LinearMemory, addr: u32, value: u64) -> Result<(), Errno> {
    memory.store::<u64>(addr, 0, value).map_err(fault)
}

fn read_u32(memory: &LinearMemory, addr: u32) -> Result<u32, Errno> {
    memory.load::<u32>(addr, 0).map_err(fault)
}

/// Reads a guest path string and resolves it against a directory fd.
fn resolve_path(
    memory: &LinearMemory,
    wasi: &WasiCtx,
    dirfd: u32,
    path_ptr: u32,
    path_len: u32,
) -> Result<PathBuf, Errno> {
    let bytes = memory.bytes(path_ptr, path_len).map_err(fault)?;
    let entry = wasi.entry(dirfd).ok_or(ERRNO_BADF)?;
    let base = match &entry.handle {
        FdHandle::Dir(path) => path,
        _ => return Err(ERRNO_NOTDIR),
    };
    let relative = std::ffi::OsStr::from_bytes(bytes.strip_prefix(b"/").unwrap_or(bytes));
    Ok(base.join(relative))
}

/// Shared implementation of `args_get` and `environ_get`.
fn args_get(
    memory: &mut LinearMemory,
    strings: &[Vec<u8>],
    list_ptr: u32,
    buf_ptr: u32,
) -> Result<(), Errno> {
    let mut list = list_ptr;
    let mut buf = buf_ptr;
    for string in strings {
        write_u32(memory, list, buf)?;
        list += 4;
        let len = string.len() as u32;
        memory
            .bytes_mut(buf, len + 1)
            .map_err(fault)?
            .split_at_mut(len as usize)
            .0
            .copy_from_slice(string);
        memory.store::<u8>(buf, u64::from(len), 0).map_err(fault)?;
        buf += len + 1;
    }
    Ok(())
}

/// Shared implementation of `args_sizes_get` and `environ_sizes_get`.
fn sizes_get(
    memory: &mut LinearMemory,
    strings: &[Vec<u8>],
    count_ptr: u32,
    size_ptr: u32,
) -> Result<(), Errno> {
    let total: usize = strings.iter().map(|s| s.len() + 1).sum();
    write_u32(memory, count_ptr, strings.len() as u32)?;
    write_u32(memory, size_ptr, total as u32)
}

/// One guest `iovec`: buffer pointer at offset 0, length at offset 4.
fn iovec(memory: &LinearMemory, iovs: u32, index: u32) -> Result<(u32, u32), Errno> {
    let base = iovs + index * 8;
    Ok((read_u32(memory, base)?, read_u32(memory, base + 4)?))
}

fn fd_read(
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
    fd: u32,
    iovs: u32,
    iovs_len: u32,
    nread_ptr: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry_mut(fd).ok_or(ERRNO_BADF)?;
    if entry.rights_base & RIGHTS_FD_READ == 0 {
        return Err(ERRNO_NOTCAPABLE);
    }
    let mut total = 0u32;
    for i in 0..iovs_len {
        let (buf, len) = iovec(memory, iovs, i)?;
        let target = memory.bytes_mut(buf, len).map_err(fault)?;
        let nread = match &mut entry.handle {
            FdHandle::Stdin => std::io::stdin().lock().read(target),
            FdHandle::File(file) => file.read(target),
            FdHandle::Dir(_) => return Err(ERRNO_ISDIR),
            _ => return Err(ERRNO_BADF),
        }
        .map_err(|e| errno_from_io(&e))?;
        total += nread as u32;
        if nread < len as usize {
            break;
        }
    }
    write_u32(memory, nread_ptr, total)
}

fn fd_write(
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
    fd: u32,
    iovs: u32,
    iovs_len: u32,
    nwritten_ptr: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry_mut(fd).ok_or(ERRNO_BADF)?;
    if entry.rights_base & RIGHTS_FD_WRITE == 0 {
        return Err(ERRNO_NOTCAPABLE);
    }
    let append = entry.flags & FDFLAGS_APPEND != 0;
    let mut total = 0u32;
    for i in 0..iovs_len {
        let (buf, len) = iovec(memory, iovs, i)?;
        let source = memory.bytes(buf, len).map_err(fault)?;
        let nwritten = match &mut entry.handle {
            FdHandle::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(source).map(|_| source.len())
            }
            FdHandle::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(source).map(|_| source.len())
            }
            FdHandle::File(file) => {
                if append {
                    file.seek(SeekFrom::End(0)).and_then(|_| file.write(source))
                } else {
                    file.write(source)
                }
            }
            FdHandle::Dir(_) => return Err(ERRNO_ISDIR),
            FdHandle::Stdin => return Err(ERRNO_BADF),
        }
        .map_err(|e| errno_from_io(&e))?;
        total += nwritten as u32;
        if nwritten < source.len() {
            break;
        }
    }
    write_u32(memory, nwritten_ptr, total)
}

fn fd_close(wasi: &mut WasiCtx, fd: u32) -> Result<(), Errno> {
    wasi.remove(fd).map(|_| ()).ok_or(ERRNO_BADF)
}

fn fd_seek(
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
    fd: u32,
    offset: i64,
    whence: u8,
    newoffset_ptr: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry_mut(fd).ok_or(ERRNO_BADF)?;
    let file = match &mut entry.handle {
        FdHandle::File(file) => file,
        FdHandle::Dir(_) => return Err(ERRNO_ISDIR),
        _ => return Err(ERRNO_SPIPE),
    };
    let pos = match whence {
        WHENCE_SET => SeekFrom::Start(offset as u64),
        WHENCE_CUR => SeekFrom::Current(offset),
        WHENCE_END => SeekFrom::End(offset),
        _ => return Err(ERRNO_INVAL),
    };
    let new_offset = file.seek(pos).map_err(|e| errno_from_io(&e))?;
    write_u64(memory, newoffset_ptr, new_offset)
}

fn fd_tell(
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
    fd: u32,
    offset_ptr: u32,
) -> Result<(), Errno> {
    fd_seek(memory, wasi, fd, 0, WHENCE_CUR, offset_ptr)
}

fn fd_pread(
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
    fd: u32,
    iovs: u32,
    iovs_len: u32,
    offset: u64,
    nread_ptr: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    if entry.rights_base & RIGHTS_FD_READ == 0 {
        return Err(ERRNO_NOTCAPABLE);
    }
    let file = match &entry.handle {
        FdHandle::File(file) => file,
        FdHandle::Dir(_) => return Err(ERRNO_ISDIR),
        _ => return Err(ERRNO_SPIPE),
    };
    let mut total = 0u32;
    let mut pos = offset;
    for i in 0..iovs_len {
        let (buf, len) = iovec(memory, iovs, i)?;
        let nread = {
            let target = memory.bytes_mut(buf, len).map_err(fault)?;
            file.read_at(target, pos).map_err(|e| errno_from_io(&e))?
        };
        total += nread as u32;
        pos += nread as u64;
        if nread < len as usize {
            break;
        }
    }
    write_u32(memory, nread_ptr, total)
}

fn fd_pwrite(
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
    fd: u32,
    iovs: u32,
    iovs_len: u32,
    offset: u64,
    nwritten_ptr: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    if entry.rights_base & RIGHTS_FD_WRITE == 0 {
        return Err(ERRNO_NOTCAPABLE);
    }
    let file = match &entry.handle {
        FdHandle::File(file) => file,
        FdHandle::Dir(_) => return Err(ERRNO_ISDIR),
        _ => return Err(ERRNO_SPIPE),
    };
    let mut total = 0u32;
    let mut pos = offset;
    for i in 0..iovs_len {
        let (buf, len) = iovec(memory, iovs, i)?;
        let source = memory.bytes(buf, len).map_err(fault)?;
        let nwritten = file.write_at(source, pos).map_err(|e| errno_from_io(&e))?;
        total += nwritten as u32;
        pos += nwritten as u64;
        if nwritten < source.len() {
            break;
        }
    }
    write_u32(memory, nwritten_ptr, total)
}

fn fd_prestat_get(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    fd: u32,
    buf: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    let name = entry.preopen_name.as_ref().ok_or(ERRNO_BADF)?;
    // prestat: tag 0 (dir) at offset 0, name length at offset 4.
    memory.store::<u8>(buf, 0, 0).map_err(fault)?;
    write_u32(memory, buf + 4, name.len() as u32)
}

fn fd_prestat_dir_name(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    fd: u32,
    path_ptr: u32,
    path_len: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    let name = entry.preopen_name.as_ref().ok_or(ERRNO_BADF)?;
    if name.len() > path_len as usize {
        return Err(ERRNO_NAMETOOLONG);
    }
    memory
        .bytes_mut(path_ptr, name.len() as u32)
        .map_err(fault)?
        .copy_from_slice(name);
    Ok(())
}

fn fd_fdstat_get(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    fd: u32,
    buf: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    write_fdstat(
        memory,
        buf,
        entry.filetype,
        entry.flags,
        entry.rights_base,
        entry.rights_inheriting,
    )
    .map_err(fault)
}

fn fd_fdstat_set_flags(wasi: &mut WasiCtx, fd: u32, flags: u16) -> Result<(), Errno> {
    let entry = wasi.entry_mut(fd).ok_or(ERRNO_BADF)?;
    entry.flags = flags;
    Ok(())
}

fn fd_fdstat_set_rights(
    wasi: &mut WasiCtx,
    fd: u32,
    rights_base: u64,
    rights_inheriting: u64,
) -> Result<(), Errno> {
    let entry = wasi.entry_mut(fd).ok_or(ERRNO_BADF)?;
    // Rights may only ever shrink.
    if rights_base & !entry.rights_base != 0 || rights_inheriting & !entry.rights_inheriting != 0 {
        return Err(ERRNO_NOTCAPABLE);
    }
    entry.rights_base = rights_base;
    entry.rights_inheriting = rights_inheriting;
    Ok(())
}

fn entry_metadata(entry: &FdEntry) -> Result<std::fs::Metadata, Errno> {
    match &entry.handle {
        FdHandle::File(file) => file.metadata().map_err(|e| errno_from_io(&e)),
        FdHandle::Dir(path) => std::fs::metadata(path).map_err(|e| errno_from_io(&e)),
        _ => Err(ERRNO_BADF),
    }
}

fn fd_filestat_get(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    fd: u32,
    buf: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    let stat = match &entry.handle {
        FdHandle::Stdin | FdHandle::Stdout | FdHandle::Stderr => Filestat {
            filetype: FILETYPE_CHARACTER_DEVICE,
            nlink: 1,
            ..Filestat::default()
        },
        _ => Filestat::from_metadata(&entry_metadata(entry)?),
    };
    stat.write(memory, buf).map_err(fault)
}

fn fd_filestat_set_size(wasi: &mut WasiCtx, fd: u32, size: u64) -> Result<(), Errno> {
    let entry = wasi.entry_mut(fd).ok_or(ERRNO_BADF)?;
    match &entry.handle {
        FdHandle::File(file) => file.set_len(size).map_err(|e| errno_from_io(&e)),
        FdHandle::Dir(_) => Err(ERRNO_ISDIR),
        _ => Err(ERRNO_INVAL),
    }
}

/// Builds the `timespec` pair for `futimens`/`utimensat`.
fn times_to_timespec(atim: u64, mtim: u64, fstflags: u16) -> Result<[libc::timespec; 2], Errno> {
    let spec = |time: u64, set: bool, now: bool| -> Result<libc::timespec, Errno> {
        if set && now {
            return Err(ERRNO_INVAL);
        }
        let (sec, nsec) = if now {
            (0, libc::UTIME_NOW)
        } else if set {
            ((time / 1_000_000_000) as i64, (time % 1_000_000_000) as i64)
        } else {
            (0, libc::UTIME_OMIT)
        };
        Ok(libc::timespec {
            tv_sec: sec,
            tv_nsec: nsec,
        })
    };
    Ok([
        spec(
            atim,
            fstflags & FSTFLAGS_ATIM != 0,
            fstflags & FSTFLAGS_ATIM_NOW != 0,
        )?,
        spec(
            mtim,
            fstflags & FSTFLAGS_MTIM != 0,
            fstflags & FSTFLAGS_MTIM_NOW != 0,
        )?,
    ])
}

fn fd_filestat_set_times(
    wasi: &mut WasiCtx,
    fd: u32,
    atim: u64,
    mtim: u64,
    fstflags: u16,
) -> Result<(), Errno> {
    let times = times_to_timespec(atim, mtim, fstflags)?;
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    let rc = match &entry.handle {
        FdHandle::File(file) => unsafe { libc::futimens(file.as_raw_fd(), times.as_ptr()) },
        FdHandle::Dir(path) => {
            let cpath = path_to_cstring(path)?;
            unsafe { libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0) }
        }
        _ => return Err(ERRNO_BADF),
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(errno_from_host(last_errno()))
    }
}

fn fd_sync(wasi: &WasiCtx, fd: u32, data_only: bool) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    match &entry.handle {
        FdHandle::File(file) => if data_only {
            file.sync_data()
        } else {
            file.sync_all()
        }
        .map_err(|e| errno_from_io(&e)),
        FdHandle::Dir(_) => Ok(()),
        _ => Err(ERRNO_INVAL),
    }
}

fn fd_readdir(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    fd: u32,
    buf: u32,
    buf_len: u32,
    cookie: u64,
    bufused_ptr: u32,
) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    let dir = match &entry.handle {
        FdHandle::Dir(path) => path,
        _ => Err(ERRNO_NOTDIR)?,
    };
    let mut packed = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| errno_from_io(&e))?;
    for (index, dirent) in entries.enumerate().skip(cookie as usize) {
        if packed.len() >= buf_len as usize {
            break;
        }
        let dirent = dirent.map_err(|e| errno_from_io(&e))?;
        let name = dirent.file_name();
        let name = name.as_bytes();
        let filetype = dirent
            .metadata()
            .map(|meta| filetype_from_mode(meta.mode()))
            .unwrap_or(FILETYPE_UNKNOWN);
        // dirent layout: d_next at 0, d_ino at 8, d_namlen at 16,
        // d_type at 20, then the name.
        packed.extend_from_slice(&(index as u64 + 1).to_le_bytes());
        packed.extend_from_slice(&dirent.ino().to_le_bytes());
        packed.extend_from_slice(&(name.len() as u32).to_le_bytes());
        packed.push(filetype);
        packed.extend_from_slice(&[0u8; 3]);
        packed.extend_from_slice(name);
    }
    let used = packed.len().min(buf_len as usize) as u32;
    memory
        .bytes_mut(buf, used)
        .map_err(fault)?
        .copy_from_slice(&packed[..used as usize]);
    write_u32(memory, bufused_ptr, used)
}

fn fd_renumber(wasi: &mut WasiCtx, from: u32, to: u32) -> Result<(), Errno> {
    if from == to {
        wasi.entry(from).map(|_| ()).ok_or(ERRNO_BADF)
    } else {
        let entry = wasi.remove(from).ok_or(ERRNO_BADF)?;
        wasi.remove(to);
        wasi.insert_at(to, entry);
        Ok(())
    }
}

fn fd_advise(wasi: &WasiCtx, fd: u32, offset: u64, len: u64, advice: u8) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    let file = match &entry.handle {
        FdHandle::File(file) => file,
        _ => return Err(ERRNO_BADF),
    };
    let advice = match advice {
        0 => libc::POSIX_FADV_NORMAL,
        1 => libc::POSIX_FADV_SEQUENTIAL,
        2 => libc::POSIX_FADV_RANDOM,
        3 => libc::POSIX_FADV_WILLNEED,
        4 => libc::POSIX_FADV_DONTNEED,
        5 => libc::POSIX_FADV_NOREUSE,
        _ => return Err(ERRNO_INVAL),
    };
    let rc = unsafe {
        libc::posix_fadvise(file.as_raw_fd(), offset as i64, len as i64, advice)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(errno_from_host(rc))
    }
}

fn fd_allocate(wasi: &WasiCtx, fd: u32, offset: u64, len: u64) -> Result<(), Errno> {
    let entry = wasi.entry(fd).ok_or(ERRNO_BADF)?;
    let file = match &entry.handle {
        FdHandle::File(file) => file,
        _ => return Err(ERRNO_BADF),
    };
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), offset as i64, len as i64) };
    if rc == 0 {
        Ok(())
    } else {
        Err(errno_from_host(rc))
    }
}

#[allow(clippy::too_many_arguments)]
fn path_open(
    memory: &mut LinearMemory,
    wasi: &mut WasiCtx,
    dirfd: u32,
    _dirflags: u32,
    path_ptr: u32,
    path_len: u32,
    oflags: u16,
    rights_base: u64,
    rights_inheriting: u64,
    fdflags: u16,
    opened_fd_ptr: u32,
) -> Result<(), Errno> {
    let path = resolve_path(memory, wasi, dirfd, path_ptr, path_len)?;
    let want_dir = oflags & OFLAGS_DIRECTORY != 0;
    let existing = std::fs::symlink_metadata(&path);

    if let Ok(meta) = &existing {
        if meta.is_dir() {
            if oflags & OFLAGS_CREAT != 0 && oflags & OFLAGS_EXCL != 0 {
                return Err(ERRNO_EXIST);
            }
            let fd = wasi.insert(FdEntry {
                handle: FdHandle::Dir(path),
                filetype: FILETYPE_DIRECTORY,
                flags: fdflags,
                rights_base,
                rights_inheriting,
                preopen_name: None,
            });
            return write_u32(memory, opened_fd_ptr, fd);
        }
    }
    if want_dir {
        return match existing {
            Ok(_) => Err(ERRNO_NOTDIR),
            Err(error) => Err(errno_from_io(&error)),
        };
    }

    let mut options = std::fs::OpenOptions::new();
    options
        .read(rights_base & RIGHTS_FD_READ != 0 || rights_base & RIGHTS_FD_WRITE == 0)
        .write(rights_base & RIGHTS_FD_WRITE != 0)
        .append(fdflags & FDFLAGS_APPEND != 0);
    if oflags & OFLAGS_CREAT != 0 {
        if rights_base & RIGHTS_FD_WRITE == 0 {
            return Err(ERRNO_NOTCAPABLE);
        }
        if oflags & OFLAGS_EXCL != 0 {
            options.create_new(true);
        } else {
            options.create(true);
        }
    }
    if oflags & OFLAGS_TRUNC != 0 {
        options.truncate(true);
    }
    let file = options.open(&path).map_err(|e| errno_from_io(&e))?;
    let filetype = file
        .metadata()
        .map(|meta| filetype_from_mode(meta.mode()))
        .unwrap_or(FILETYPE_REGULAR_FILE);
    let fd = wasi.insert(FdEntry {
        handle: FdHandle::File(file),
        filetype,
        flags: fdflags,
        rights_base,
        rights_inheriting,
        preopen_name: None,
    });
    write_u32(memory, opened_fd_ptr, fd)
}

fn path_filestat_get(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    dirfd: u32,
    flags: u32,
    path_ptr: u32,
    path_len: u32,
    buf: u32,
) -> Result<(), Errno> {
    let path = resolve_path(memory, wasi, dirfd, path_ptr, path_len)?;
    let meta = if flags & LOOKUPFLAGS_SYMLINK_FOLLOW != 0 {
        std::fs::metadata(&path)
    } else {
        std::fs::symlink_metadata(&path)
    }
    .map_err(|e| errno_from_io(&e))?;
    Filestat::from_metadata(&meta).write(memory, buf).map_err(fault)
}

#[allow(clippy::too_many_arguments)]
fn path_filestat_set_times(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    dirfd: u32,
    flags: u32,
    path_ptr: u32,
    path_len: u32,
    atim: u64,
    mtim: u64,
    fstflags: u16,
) -> Result<(), Errno> {
    let path = resolve_path(memory, wasi, dirfd, path_ptr, path_len)?;
    let times = times_to_timespec(atim, mtim, fstflags)?;
    let cpath = path_to_cstring(&path)?;
    let at_flags = if flags & LOOKUPFLAGS_SYMLINK_FOLLOW != 0 {
        0
    } else {
        libc::AT_SYMLINK_NOFOLLOW
    };
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), at_flags) };
    if rc == 0 {
        Ok(())
    } else {
        Err(errno_from_host(last_errno()))
    }
}

/// Shared shape of `path_create_directory`, `path_remove_directory` and
/// `path_unlink_file`.
fn path_simple(
    memory: &LinearMemory,
    wasi: &WasiCtx,
    dirfd: u32,
    path_ptr: u32,
    path_len: u32,
    op: impl FnOnce(&std::path::Path) -> std::io::Result<()>,
) -> Result<(), Errno> {
    let path = resolve_path(memory, wasi, dirfd, path_ptr, path_len)?;
    op(&path).map_err(|e| errno_from_io(&e))
}

fn path_rename(
    memory: &LinearMemory,
    wasi: &WasiCtx,
    old_dirfd: u32,
    old_path_ptr: u32,
    old_path_len: u32,
    new_dirfd: u32,
    new_path_ptr: u32,
    new_path_len: u32,
) -> Result<(), Errno> {
    let old_path = resolve_path(memory, wasi, old_dirfd, old_path_ptr, old_path_len)?;
    let new_path = resolve_path(memory, wasi, new_dirfd, new_path_ptr, new_path_len)?;
    std::fs::rename(old_path, new_path).map_err(|e| errno_from_io(&e))
}

#[allow(clippy::too_many_arguments)]
fn path_link(
    memory: &LinearMemory,
    wasi: &WasiCtx,
    old_dirfd: u32,
    _old_flags: u32,
    old_path_ptr: u32,
    old_path_len: u32,
    new_dirfd: u32,
    new_path_ptr: u32,
    new_path_len: u32,
) -> Result<(), Errno> {
    let old_path = resolve_path(memory, wasi, old_dirfd, old_path_ptr, old_path_len)?;
    let new_path = resolve_path(memory, wasi, new_dirfd, new_path_ptr, new_path_len)?;
    std::fs::hard_link(old_path, new_path).map_err(|e| errno_from_io(&e))
}

fn path_readlink(
    memory: &mut LinearMemory,
    wasi: &WasiCtx,
    dirfd: u32,
    path_ptr: u32,
    path_len: u32,
    buf: u32,
    buf_len: u32,
    bufused_ptr: u32,
) -> Result<(), Errno> {
    let path = resolve_path(memory, wasi, dirfd, path_ptr, path_len)?;
    let target = std::fs::read_link(&path).map_err(|e| errno_from_io(&e))?;
    let bytes = target.as_os_str().as_bytes();
    let used = bytes.len().min(buf_len as usize) as u32;
    memory
        .bytes_mut(buf, used)
        .map_err(fault)?
        .copy_from_slice(&bytes[..used as usize]);
    write_u32(memory, bufused_ptr, used)
}

fn path_symlink(
    memory: &LinearMemory,
    wasi: &WasiCtx,
    old_path_ptr: u32,
    old_path_len: u32,
    dirfd: u32,
    new_path_ptr: u32,
    new_path_len: u32,
) -> Result<(), Errno> {
    let target_bytes = memory.bytes(old_path_ptr, old_path_len).map_err(fault)?;
    let target = PathBuf::from(std::ffi::OsStr::from_bytes(target_bytes));
    let link = resolve_path(memory, wasi, dirfd, new_path_ptr, new_path_len)?;
    std::os::unix::fs::symlink(target, link).map_err(|e| errno_from_io(&e))
}

fn clock_get(memory: &mut LinearMemory, id: u32, out_ptr: u32, resolution: bool) -> Result<(), Errno> {
    let clock = match id {
        CLOCKID_REALTIME => libc::CLOCK_REALTIME,
        CLOCKID_MONOTONIC => libc::CLOCK_MONOTONIC,
        CLOCKID_PROCESS_CPUTIME => libc::CLOCK_PROCESS_CPUTIME_ID,
        CLOCKID_THREAD_CPUTIME => libc::CLOCK_THREAD_CPUTIME_ID,
        _ => return Err(ERRNO_INVAL),
    };
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe {
        if resolution {
            libc::clock_getres(clock, &mut ts)
        } else {
            libc::clock_gettime(clock, &mut ts)
        }
    };
    if rc != 0 {
        return Err(errno_from_host(last_errno()));
    }
    let nanos = ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64;
    write_u64(memory, out_ptr, nanos)
}

fn random_get(memory: &mut LinearMemory, buf: u32, buf_len: u32) -> Result<(), Errno> {
    let target = memory.bytes_mut(buf, buf_len).map_err(fault)?;
    let mut filled = 0usize;
    while filled < target.len() {
        let rc = unsafe {
            libc::getrandom(
                target[filled..].as_mut_ptr() as *mut libc::c_void,
                target.len() - filled,
                0,
            )
        };
        if rc < 0 {
            let err = last_errno();
            if err == libc::EINTR {
                continue;
            }
            return Err(errno_from_host(err));
        }
        filled += rc as usize;
    }
    Ok(())
}

fn path_to_cstring(path: &std::path::Path) -> Result<std::ffi::CString, Errno> {
    std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| ERRNO_INVAL)
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
