//! The WASI syscall bank, driven through imported calls.

mod common;

use common::{import_forwarders, run, run1};
use wasm5::wasi::types::{
    ERRNO_BADF,
    ERRNO_NOENT,
    ERRNO_SUCCESS,
    FILETYPE_DIRECTORY,
    OFLAGS_CREAT,
    OFLAGS_TRUNC,
    RIGHTS_ALL,
};
use wasm5::{
    execute,
    wasi,
    CodeWriter,
    ContextId,
    ImportMeta,
    ImportTarget,
    Op,
    RuntimeContext,
    Store,
    UntypedValue,
    WasiCtx,
};

fn wasi_import(handler: u32, num_params: usize) -> ImportMeta {
    ImportMeta {
        num_params,
        num_results: 1,
        target: ImportTarget::Host(handler),
    }
}

/// Builds a store preopening `dir` as "/" plus a context forwarding to
/// the given WASI handlers.
fn wasi_setup(
    wasi_ctx: WasiCtx,
    imports: Vec<ImportMeta>,
) -> (Store, ContextId, Vec<usize>) {
    let (context, entries) = import_forwarders(imports, |builder| builder.memory(1, 1));
    let mut store = Store::with_wasi(wasi_ctx);
    let ctx = store.register(context);
    (store, ctx, entries)
}

fn u32_arg(value: u32) -> UntypedValue {
    UntypedValue::from(value)
}

fn u64_arg(value: u64) -> UntypedValue {
    UntypedValue::from(value)
}

fn load_u32(store: &Store, ctx: ContextId, addr: u32) -> u32 {
    store.context(ctx).memory().load::<u32>(addr, 0).unwrap()
}

fn stage_bytes(store: &mut Store, ctx: ContextId, addr: u32, bytes: &[u8]) {
    store
        .context_mut(ctx)
        .memory_mut()
        .bytes_mut(addr, bytes.len() as u32)
        .unwrap()
        .copy_from_slice(bytes);
}

#[test]
fn args_sizes_and_contents() {
    let wasi_ctx = WasiCtx::builder().arg("prog").arg("x1").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::ARGS_SIZES_GET, 2),
            wasi_import(wasi::ARGS_GET, 2),
        ],
    );
    let errno = run1(&mut store, ctx, entries[0], &[u32_arg(16), u32_arg(20)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(load_u32(&store, ctx, 16), 2);
    assert_eq!(load_u32(&store, ctx, 20), 8);

    let errno = run1(&mut store, ctx, entries[1], &[u32_arg(24), u32_arg(40)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(load_u32(&store, ctx, 24), 40);
    assert_eq!(load_u32(&store, ctx, 28), 45);
    assert_eq!(
        store.context(ctx).memory().bytes(40, 8).unwrap(),
        b"prog\0x1\0"
    );
}

#[test]
fn file_write_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_OPEN, 9),
            wasi_import(wasi::FD_WRITE, 4),
            wasi_import(wasi::FD_CLOSE, 1),
            wasi_import(wasi::FD_READ, 4),
        ],
    );
    let (open, write, close, read) = (entries[0], entries[1], entries[2], entries[3]);

    stage_bytes(&mut store, ctx, 0, b"out.txt");
    let errno = run1(
        &mut store,
        ctx,
        open,
        &[
            u32_arg(3),
            u32_arg(0),
            u32_arg(0),
            u32_arg(7),
            u32_arg(u32::from(OFLAGS_CREAT | OFLAGS_TRUNC)),
            u64_arg(RIGHTS_ALL),
            u64_arg(RIGHTS_ALL),
            u32_arg(0),
            u32_arg(64),
        ],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    let fd = load_u32(&store, ctx, 64);
    assert_eq!(fd, 8);

    // iovec { buf = 128, len = 10 } at 96; payload at 128.
    stage_bytes(&mut store, ctx, 128, b"hello wasi");
    store
        .context_mut(ctx)
        .memory_mut()
        .store::<u32>(96, 0, 128)
        .unwrap();
    store
        .context_mut(ctx)
        .memory_mut()
        .store::<u32>(100, 0, 10)
        .unwrap();
    let errno = run1(
        &mut store,
        ctx,
        write,
        &[u32_arg(fd), u32_arg(96), u32_arg(1), u32_arg(112)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(load_u32(&store, ctx, 112), 10);

    let errno = run1(&mut store, ctx, close, &[u32_arg(fd)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(
        std::fs::read(dir.path().join("out.txt")).unwrap(),
        b"hello wasi"
    );

    // Closing again reports EBADF.
    let errno = run1(&mut store, ctx, close, &[u32_arg(fd)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_BADF));

    // Reopen for reading and scatter into a fresh buffer.
    let errno = run1(
        &mut store,
        ctx,
        open,
        &[
            u32_arg(3),
            u32_arg(0),
            u32_arg(0),
            u32_arg(7),
            u32_arg(0),
            u64_arg(RIGHTS_ALL),
            u64_arg(RIGHTS_ALL),
            u32_arg(0),
            u32_arg(64),
        ],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    let fd = load_u32(&store, ctx, 64);
    store
        .context_mut(ctx)
        .memory_mut()
        .store::<u32>(96, 0, 160)
        .unwrap();
    store
        .context_mut(ctx)
        .memory_mut()
        .store::<u32>(100, 0, 16)
        .unwrap();
    let errno = run1(
        &mut store,
        ctx,
        read,
        &[u32_arg(fd), u32_arg(96), u32_arg(1), u32_arg(112)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(load_u32(&store, ctx, 112), 10);
    assert_eq!(
        store.context(ctx).memory().bytes(160, 10).unwrap(),
        b"hello wasi"
    );
}

#[test]
fn missing_file_reports_noent() {
    let dir = tempfile::tempdir().unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) =
        wasi_setup(wasi_ctx, vec![wasi_import(wasi::PATH_OPEN, 9)]);
    stage_bytes(&mut store, ctx, 0, b"missing");
    let errno = run1(
        &mut store,
        ctx,
        entries[0],
        &[
            u32_arg(3),
            u32_arg(0),
            u32_arg(0),
            u32_arg(7),
            u32_arg(0),
            u64_arg(RIGHTS_ALL),
            u64_arg(RIGHTS_ALL),
            u32_arg(0),
            u32_arg(64),
        ],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_NOENT));
}

#[test]
fn prestat_exposes_the_preopen() {
    let dir = tempfile::tempdir().unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::FD_PRESTAT_GET, 2),
            wasi_import(wasi::FD_PRESTAT_DIR_NAME, 3),
        ],
    );
    let errno = run1(&mut store, ctx, entries[0], &[u32_arg(3), u32_arg(32)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    // prestat: tag 0 (dir), then the name length.
    assert_eq!(
        store.context(ctx).memory().load::<u8>(32, 0).unwrap(),
        0
    );
    assert_eq!(load_u32(&store, ctx, 36), 1);

    let errno = run1(
        &mut store,
        ctx,
        entries[1],
        &[u32_arg(3), u32_arg(48), u32_arg(1)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(store.context(ctx).memory().bytes(48, 1).unwrap(), b"/");

    // Non-preopen fds have no prestat.
    let errno = run1(&mut store, ctx, entries[0], &[u32_arg(0), u32_arg(32)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_BADF));
}

#[test]
fn create_directory_and_stat_it() {
    let dir = tempfile::tempdir().unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_CREATE_DIRECTORY, 3),
            wasi_import(wasi::PATH_FILESTAT_GET, 5),
        ],
    );
    stage_bytes(&mut store, ctx, 0, b"subdir");
    let errno = run1(
        &mut store,
        ctx,
        entries[0],
        &[u32_arg(3), u32_arg(0), u32_arg(6)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert!(dir.path().join("subdir").is_dir());

    let errno = run1(
        &mut store,
        ctx,
        entries[1],
        &[u32_arg(3), u32_arg(1), u32_arg(0), u32_arg(6), u32_arg(64)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    // filestat.filetype lives at offset 16.
    assert_eq!(
        store.context(ctx).memory().load::<u8>(64 + 16, 0).unwrap(),
        FILETYPE_DIRECTORY
    );
}

#[test]
fn random_get_fills_the_buffer() {
    let (mut store, ctx, entries) = wasi_setup(
        WasiCtx::default(),
        vec![wasi_import(wasi::RANDOM_GET, 2)],
    );
    let errno = run1(&mut store, ctx, entries[0], &[u32_arg(200), u32_arg(16)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    let bytes = store.context(ctx).memory().bytes(200, 16).unwrap();
    assert!(bytes.iter().any(|&b| b != 0));
}

#[test]
fn clock_time_get_returns_nanoseconds() {
    let (mut store, ctx, entries) = wasi_setup(
        WasiCtx::default(),
        vec![wasi_import(wasi::CLOCK_TIME_GET, 3)],
    );
    let errno = run1(
        &mut store,
        ctx,
        entries[0],
        &[u32_arg(0), u64_arg(0), u32_arg(208)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    let nanos = store.context(ctx).memory().load::<u64>(208, 0).unwrap();
    assert!(nanos > 0);
}

#[test]
fn proc_exit_stops_dispatch() {
    let mut writer = CodeWriter::new();
    writer.entry(1, 1, 0);
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::CallImport).imm(0).imm(1);
    // Never reached: proc_exit unwinds the whole invocation.
    writer.op(Op::Unreachable);
    let context = RuntimeContext::builder()
        .code(writer.finish())
        .import(ImportMeta {
            num_params: 1,
            num_results: 0,
            target: ImportTarget::Host(wasi::PROC_EXIT),
        })
        .memory(1, 1)
        .build();
    let mut store = Store::new();
    let ctx = store.register(context);
    let mut results = [];
    execute(&mut store, ctx, 0, &[u32_arg(9)], &mut results).unwrap();
    assert!(store.wasi().exited());
    assert_eq!(store.wasi().exit_code(), Some(9));

    // The flag is sticky; a second invocation unwinds immediately after
    // its first host call and keeps the original code.
    run(&mut store, ctx, 0, &[u32_arg(3)], 0).unwrap();
    assert_eq!(store.wasi().exit_code(), Some(9));
}

#[test]
fn environ_lists_the_variables() {
    let wasi_ctx = WasiCtx::builder().env("HOME", "/home/me").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::ENVIRON_SIZES_GET, 2),
            wasi_import(wasi::ENVIRON_GET, 2),
        ],
    );
    let errno = run1(&mut store, ctx, entries[0], &[u32_arg(16), u32_arg(20)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(load_u32(&store, ctx, 16), 1);
    assert_eq!(load_u32(&store, ctx, 20), 14);

    let errno = run1(&mut store, ctx, entries[1], &[u32_arg(24), u32_arg(40)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(
        store.context(ctx).memory().bytes(40, 14).unwrap(),
        b"HOME=/home/me\0"
    );
}

/// Opens `name` inside the preopen for both reading and writing and
/// returns the guest fd.
fn open_file(
    store: &mut Store,
    ctx: ContextId,
    open_entry: usize,
    name: &[u8],
    oflags: u16,
) -> u32 {
    stage_bytes(store, ctx, 0, name);
    let errno = run1(
        store,
        ctx,
        open_entry,
        &[
            u32_arg(3),
            u32_arg(0),
            u32_arg(0),
            u32_arg(name.len() as u32),
            u32_arg(u32::from(oflags)),
            u64_arg(RIGHTS_ALL),
            u64_arg(RIGHTS_ALL),
            u32_arg(0),
            u32_arg(64),
        ],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    load_u32(store, ctx, 64)
}

/// Stages one iovec covering `buf..buf + len` at guest address 96.
fn stage_iovec(store: &mut Store, ctx: ContextId, buf: u32, len: u32) {
    store
        .context_mut(ctx)
        .memory_mut()
        .store::<u32>(96, 0, buf)
        .unwrap();
    store
        .context_mut(ctx)
        .memory_mut()
        .store::<u32>(100, 0, len)
        .unwrap();
}

#[test]
fn seek_tell_and_positional_io() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_OPEN, 9),
            wasi_import(wasi::FD_SEEK, 4),
            wasi_import(wasi::FD_TELL, 2),
            wasi_import(wasi::FD_READ, 4),
            wasi_import(wasi::FD_PREAD, 5),
            wasi_import(wasi::FD_PWRITE, 5),
        ],
    );
    let (open, seek, tell, read, pread, pwrite) = (
        entries[0], entries[1], entries[2], entries[3], entries[4], entries[5],
    );
    let fd = open_file(&mut store, ctx, open, b"data.bin", 0);

    // Seek to offset 4 from the start and read two bytes.
    let errno = run1(
        &mut store,
        ctx,
        seek,
        &[u32_arg(fd), u64_arg(4), u32_arg(0), u32_arg(72)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(
        store.context(ctx).memory().load::<u64>(72, 0).unwrap(),
        4
    );
    stage_iovec(&mut store, ctx, 160, 2);
    run1(
        &mut store,
        ctx,
        read,
        &[u32_arg(fd), u32_arg(96), u32_arg(1), u32_arg(112)],
    )
    .unwrap();
    assert_eq!(store.context(ctx).memory().bytes(160, 2).unwrap(), b"45");

    // The cursor moved; fd_tell observes it.
    let errno = run1(&mut store, ctx, tell, &[u32_arg(fd), u32_arg(72)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(
        store.context(ctx).memory().load::<u64>(72, 0).unwrap(),
        6
    );

    // Positional reads and writes leave the cursor alone.
    stage_iovec(&mut store, ctx, 160, 3);
    run1(
        &mut store,
        ctx,
        pread,
        &[u32_arg(fd), u32_arg(96), u32_arg(1), u64_arg(0), u32_arg(112)],
    )
    .unwrap();
    assert_eq!(store.context(ctx).memory().bytes(160, 3).unwrap(), b"012");

    stage_bytes(&mut store, ctx, 160, b"XY");
    stage_iovec(&mut store, ctx, 160, 2);
    run1(
        &mut store,
        ctx,
        pwrite,
        &[u32_arg(fd), u32_arg(96), u32_arg(1), u64_arg(8), u32_arg(112)],
    )
    .unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("data.bin")).unwrap(),
        b"01234567XY"
    );
    let errno = run1(&mut store, ctx, tell, &[u32_arg(fd), u32_arg(72)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(
        store.context(ctx).memory().load::<u64>(72, 0).unwrap(),
        6
    );
}

#[test]
fn fdstat_reports_and_narrows_rights() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"x").unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_OPEN, 9),
            wasi_import(wasi::FD_FDSTAT_GET, 2),
            wasi_import(wasi::FD_FDSTAT_SET_RIGHTS, 3),
            wasi_import(wasi::FD_READ, 4),
        ],
    );
    let (open, fdstat_get, set_rights, read) =
        (entries[0], entries[1], entries[2], entries[3]);
    let fd = open_file(&mut store, ctx, open, b"f", 0);

    let errno = run1(&mut store, ctx, fdstat_get, &[u32_arg(fd), u32_arg(128)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    // fdstat: filetype at 0, rights_base at 8.
    assert_eq!(
        store.context(ctx).memory().load::<u8>(128, 0).unwrap(),
        4 // regular file
    );
    assert_eq!(
        store.context(ctx).memory().load::<u64>(136, 0).unwrap(),
        RIGHTS_ALL
    );

    // Drop every right, then reads are refused and rights cannot grow
    // back.
    let errno = run1(
        &mut store,
        ctx,
        set_rights,
        &[u32_arg(fd), u64_arg(0), u64_arg(0)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    stage_iovec(&mut store, ctx, 160, 1);
    let errno = run1(
        &mut store,
        ctx,
        read,
        &[u32_arg(fd), u32_arg(96), u32_arg(1), u32_arg(112)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), 76); // NOTCAPABLE
    let errno = run1(
        &mut store,
        ctx,
        set_rights,
        &[u32_arg(fd), u64_arg(RIGHTS_ALL), u64_arg(0)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), 76);
}

#[test]
fn filestat_set_size_truncates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"0123456789").unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_OPEN, 9),
            wasi_import(wasi::FD_FILESTAT_GET, 2),
            wasi_import(wasi::FD_FILESTAT_SET_SIZE, 2),
        ],
    );
    let (open, stat, set_size) = (entries[0], entries[1], entries[2]);
    let fd = open_file(&mut store, ctx, open, b"f", 0);

    let errno = run1(&mut store, ctx, set_size, &[u32_arg(fd), u64_arg(4)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    let errno = run1(&mut store, ctx, stat, &[u32_arg(fd), u32_arg(128)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    // filestat.size lives at offset 32.
    assert_eq!(
        store.context(ctx).memory().load::<u64>(128 + 32, 0).unwrap(),
        4
    );
    assert_eq!(std::fs::read(dir.path().join("f")).unwrap(), b"0123");
}

#[test]
fn rename_unlink_and_remove_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("old.txt"), b"data").unwrap();
    std::fs::create_dir(dir.path().join("d")).unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_RENAME, 6),
            wasi_import(wasi::PATH_UNLINK_FILE, 3),
            wasi_import(wasi::PATH_REMOVE_DIRECTORY, 3),
        ],
    );
    let (rename, unlink, rmdir) = (entries[0], entries[1], entries[2]);

    stage_bytes(&mut store, ctx, 0, b"old.txt");
    stage_bytes(&mut store, ctx, 16, b"new.txt");
    let errno = run1(
        &mut store,
        ctx,
        rename,
        &[
            u32_arg(3),
            u32_arg(0),
            u32_arg(7),
            u32_arg(3),
            u32_arg(16),
            u32_arg(7),
        ],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert!(!dir.path().join("old.txt").exists());
    assert_eq!(std::fs::read(dir.path().join("new.txt")).unwrap(), b"data");

    stage_bytes(&mut store, ctx, 0, b"new.txt");
    let errno = run1(
        &mut store,
        ctx,
        unlink,
        &[u32_arg(3), u32_arg(0), u32_arg(7)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert!(!dir.path().join("new.txt").exists());

    stage_bytes(&mut store, ctx, 0, b"d");
    let errno = run1(&mut store, ctx, rmdir, &[u32_arg(3), u32_arg(0), u32_arg(1)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert!(!dir.path().join("d").exists());
}

#[test]
fn symlink_and_readlink_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_SYMLINK, 5),
            wasi_import(wasi::PATH_READLINK, 6),
        ],
    );
    let (symlink, readlink) = (entries[0], entries[1]);

    // symlink(target = "target.txt", link = "link")
    stage_bytes(&mut store, ctx, 0, b"target.txt");
    stage_bytes(&mut store, ctx, 16, b"link");
    let errno = run1(
        &mut store,
        ctx,
        symlink,
        &[u32_arg(0), u32_arg(10), u32_arg(3), u32_arg(16), u32_arg(4)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));

    let errno = run1(
        &mut store,
        ctx,
        readlink,
        &[
            u32_arg(3),
            u32_arg(16),
            u32_arg(4),
            u32_arg(200),
            u32_arg(32),
            u32_arg(240),
        ],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(load_u32(&store, ctx, 240), 10);
    assert_eq!(
        store.context(ctx).memory().bytes(200, 10).unwrap(),
        b"target.txt"
    );
}

#[test]
fn readdir_packs_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a"), b"").unwrap();
    std::fs::write(dir.path().join("b"), b"").unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) =
        wasi_setup(wasi_ctx, vec![wasi_import(wasi::FD_READDIR, 5)]);

    let errno = run1(
        &mut store,
        ctx,
        entries[0],
        &[
            u32_arg(3),
            u32_arg(512),
            u32_arg(256),
            u64_arg(0),
            u32_arg(128),
        ],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    let used = load_u32(&store, ctx, 128);
    // Two entries, each a 24-byte header plus a one-byte name.
    assert_eq!(used, 2 * 25);
    // First dirent: d_namlen at offset 16, d_type at 20, name at 24.
    assert_eq!(load_u32(&store, ctx, 512 + 16), 1);
    assert_eq!(
        store.context(ctx).memory().load::<u8>(512 + 20, 0).unwrap(),
        4 // regular file
    );
    let first_name = store.context(ctx).memory().load::<u8>(512 + 24, 0).unwrap();
    assert!(first_name == b'a' || first_name == b'b');
}

#[test]
fn fd_renumber_moves_the_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("f"), b"hi").unwrap();
    let wasi_ctx = WasiCtx::builder().preopen_dir(dir.path(), "/").build();
    let (mut store, ctx, entries) = wasi_setup(
        wasi_ctx,
        vec![
            wasi_import(wasi::PATH_OPEN, 9),
            wasi_import(wasi::FD_RENUMBER, 2),
            wasi_import(wasi::FD_READ, 4),
            wasi_import(wasi::FD_CLOSE, 1),
        ],
    );
    let (open, renumber, read, close) = (entries[0], entries[1], entries[2], entries[3]);
    let fd = open_file(&mut store, ctx, open, b"f", 0);

    let errno = run1(&mut store, ctx, renumber, &[u32_arg(fd), u32_arg(20)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    // The old number is gone, the new one reads.
    let errno = run1(&mut store, ctx, close, &[u32_arg(fd)]).unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_BADF));
    stage_iovec(&mut store, ctx, 160, 2);
    let errno = run1(
        &mut store,
        ctx,
        read,
        &[u32_arg(20), u32_arg(96), u32_arg(1), u32_arg(112)],
    )
    .unwrap();
    assert_eq!(u32::from(errno), u32::from(ERRNO_SUCCESS));
    assert_eq!(store.context(ctx).memory().bytes(160, 2).unwrap(), b"hi");
}
