//! WASI per-store state: arguments, environment, preopens and the file
//! descriptor table.

use super::types::{self, Filetype};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// First file descriptor handed out for `path_open` results.
///
/// Descriptors 0..=2 are stdio and 3.. are preopens; dynamically opened
/// files start above both ranges.
pub(crate) const FIRST_DYNAMIC_FD: u32 = 8;

/// What a guest file descriptor refers to on the host.
#[derive(Debug)]
pub(crate) enum FdHandle {
    Stdin,
    Stdout,
    Stderr,
    File(fs::File),
    Dir(PathBuf),
}

/// One entry of the guest-visible file descriptor table.
#[derive(Debug)]
pub(crate) struct FdEntry {
    pub handle: FdHandle,
    pub filetype: Filetype,
    pub flags: u16,
    pub rights_base: u64,
    pub rights_inheriting: u64,
    /// The guest-visible name, set for preopened directories only.
    pub preopen_name: Option<Vec<u8>>,
}

/// The WASI state of a [`Store`](crate::Store).
///
/// Owns the argument and environment vectors exposed to the guest, the
/// preopened directories new paths are opened relative to, the file
/// descriptor table and the sticky exit flag set by `proc_exit`.
#[derive(Debug)]
pub struct WasiCtx {
    pub(crate) args: Vec<Vec<u8>>,
    pub(crate) env: Vec<Vec<u8>>,
    pub(crate) fds: BTreeMap<u32, FdEntry>,
    next_fd: u32,
    exited: bool,
    exit_code: u32,
}

impl Default for WasiCtx {
    fn default() -> Self {
        WasiCtxBuilder::new().build()
    }
}

impl WasiCtx {
    /// Starts building a WASI context.
    pub fn builder() -> WasiCtxBuilder {
        WasiCtxBuilder::new()
    }

    /// Returns `true` once the guest has called `proc_exit`.
    pub fn exited(&self) -> bool {
        self.exited
    }

    /// The exit code recorded by `proc_exit`, if any.
    pub fn exit_code(&self) -> Option<u32> {
        self.exited.then_some(self.exit_code)
    }

    pub(crate) fn set_exited(&mut self, code: u32) {
        if !self.exited {
            self.exited = true;
            self.exit_code = code;
        }
    }

    pub(crate) fn entry(&self, fd: u32) -> Option<&FdEntry> {
        self.fds.get(&fd)
    }

    pub(crate) fn entry_mut(&mut self, fd: u32) -> Option<&mut FdEntry> {
        self.fds.get_mut(&fd)
    }

    pub(crate) fn remove(&mut self, fd: u32) -> Option<FdEntry> {
        self.fds.remove(&fd)
    }

    pub(crate) fn insert_at(&mut self, fd: u32, entry: FdEntry) {
        self.fds.insert(fd, entry);
    }

    /// Installs `entry` at the next free dynamic descriptor.
    pub(crate) fn insert(&mut self, entry: FdEntry) -> u32 {
        while self.fds.contains_key(&self.next_fd) {
            self.next_fd = self.next_fd.wrapping_add(1).max(FIRST_DYNAMIC_FD);
        }
        let fd = self.next_fd;
        self.next_fd = self.next_fd.wrapping_add(1).max(FIRST_DYNAMIC_FD);
        self.fds.insert(fd, entry);
        fd
    }
}

/// Builder for [`WasiCtx`].
#[derive(Debug, Default)]
pub struct WasiCtxBuilder {
    args: Vec<Vec<u8>>,
    env: Vec<Vec<u8>>,
    preopens: Vec<(PathBuf, Vec<u8>)>,
}

impl WasiCtxBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command-line argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().as_bytes().to_vec());
        self
    }

    /// Appends an environment variable as `KEY=VALUE`.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push(format!("{}={}", key.as_ref(), value.as_ref()).into_bytes());
        self
    }

    /// Grants the guest access to `host_dir` under the guest path
    /// `guest_path`.
    pub fn preopen_dir(mut self, host_dir: impl AsRef<Path>, guest_path: impl AsRef<str>) -> Self {
        self.preopens.push((
            host_dir.as_ref().to_path_buf(),
            guest_path.as_ref().as_bytes().to_vec(),
        ));
        self
    }

    /// Finishes the context, wiring stdio and the preopen descriptors.
    pub fn build(self) -> WasiCtx {
        let mut fds = BTreeMap::new();
        fds.insert(
            0,
            FdEntry {
                handle: FdHandle::Stdin,
                filetype: types::FILETYPE_CHARACTER_DEVICE,
                flags: 0,
                rights_base: types::RIGHTS_ALL,
                rights_inheriting: 0,
                preopen_name: None,
            },
        );
        fds.insert(
            1,
            FdEntry {
                handle: FdHandle::Stdout,
                filetype: types::FILETYPE_CHARACTER_DEVICE,
                flags: 0,
                rights_base: types::RIGHTS_ALL,
                rights_inheriting: 0,
                preopen_name: None,
            },
        );
        fds.insert(
            2,
            FdEntry {
                handle: FdHandle::Stderr,
                filetype: types::FILETYPE_CHARACTER_DEVICE,
                flags: 0,
                rights_base: types::RIGHTS_ALL,
                rights_inheriting: 0,
                preopen_name: None,
            },
        );
        for (index, (host_dir, guest_path)) in self.preopens.into_iter().enumerate() {
            fds.insert(
                3 + index as u32,
                FdEntry {
                    handle: FdHandle::Dir(host_dir),
                    filetype: types::FILETYPE_DIRECTORY,
                    flags: 0,
                    rights_base: types::RIGHTS_ALL,
                    rights_inheriting: types::RIGHTS_ALL,
                    preopen_name: Some(guest_path),
                },
            );
        }
        WasiCtx {
            args: self.args,
            env: self.env,
            fds,
            next_fd: FIRST_DYNAMIC_FD,
            exited: false,
            exit_code: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_wires_stdio_and_preopens() {
        let ctx = WasiCtx::builder()
            .arg("prog")
            .env("HOME", "/home/me")
            .preopen_dir("/tmp", "/sandbox")
            .build();
        assert!(ctx.entry(0).is_some());
        assert!(ctx.entry(1).is_some());
        assert!(ctx.entry(2).is_some());
        let preopen = ctx.entry(3).expect("preopen fd");
        assert_eq!(preopen.preopen_name.as_deref(), Some(&b"/sandbox"[..]));
        assert_eq!(preopen.filetype, types::FILETYPE_DIRECTORY);
        assert!(ctx.entry(4).is_none());
        assert!(!ctx.exited());
    }

    #[test]
    fn dynamic_fds_start_above_the_fixed_ranges() {
        let mut ctx = WasiCtx::default();
        let fd = ctx.insert(FdEntry {
            handle: FdHandle::Dir(PathBuf::from("/")),
            filetype: types::FILETYPE_DIRECTORY,
            flags: 0,
            rights_base: types::RIGHTS_ALL,
            rights_inheriting: 0,
            preopen_name: None,
        });
        assert_eq!(fd, FIRST_DYNAMIC_FD);
        assert!(ctx.remove(fd).is_some());
    }

    #[test]
    fn proc_exit_flag_is_sticky() {
        let mut ctx = WasiCtx::default();
        ctx.set_exited(7);
        ctx.set_exited(9);
        assert!(ctx.exited());
        assert_eq!(ctx.exit_code(), Some(7));
    }
}
