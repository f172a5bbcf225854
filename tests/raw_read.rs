//! Raw-path end-to-end reads: store-mode members served byte-exact
//! from synthetic volume files through the full engine surface.

mod common;

use common::{MockDecoder, store_archive, store_multivolume, test_payload};
use rarfs::{Engine, Handle, Options, OverrideTable};

fn engine_over(decoder: std::sync::Arc<MockDecoder>, dir: &std::path::Path) -> Engine {
    Engine::new(decoder, dir, Options::default(), OverrideTable::new()).unwrap()
}

#[test]
fn hello_world_read() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    store_archive(
        &decoder,
        dir.path(),
        "arc.rar",
        &[("hello.txt", b"Hello, world!\n")],
    );

    let engine = engine_over(decoder, dir.path());
    let handle = engine.open("/hello.txt", false).unwrap();
    let mut buf = vec![0u8; 14];
    let n = engine.read(&handle, &mut buf, 0).unwrap();
    assert_eq!(n, 14);
    assert_eq!(&buf, b"Hello, world!\n");
    engine.release(handle).unwrap();
}

#[test]
fn raw_read_equivalence_over_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(70_000);
    store_archive(&decoder, dir.path(), "arc.rar", &[("blob.bin", &data)]);

    let engine = engine_over(decoder, dir.path());
    let handle = engine.open("/blob.bin", false).unwrap();
    for &(offset, size) in &[(0usize, 1usize), (1, 4096), (35_000, 10_000), (69_999, 1)] {
        let mut buf = vec![0u8; size];
        let n = engine.read(&handle, &mut buf, offset as u64).unwrap();
        assert_eq!(n, size, "range {}+{}", offset, size);
        assert_eq!(&buf[..n], &data[offset..offset + size]);
    }
    engine.release(handle).unwrap();
}

#[test]
fn multivolume_seam_transparency() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(100_000);
    store_multivolume(
        &decoder,
        dir.path(),
        "big.part01.rar",
        "big.bin",
        &data,
        40_000,
        25_000,
    );

    let engine = engine_over(decoder, dir.path());
    let handle = engine.open("/big.bin", false).unwrap();

    // A read straddling the first seam is byte-identical to the source.
    let mut buf = vec![0u8; 4096];
    let n = engine.read(&handle, &mut buf, 40_000 - 2048).unwrap();
    assert_eq!(n, 4096);
    assert_eq!(&buf, &data[40_000 - 2048..40_000 + 2048]);

    // Volume-sized reads concatenate back to the original file.
    let mut reassembled = Vec::new();
    let mut chunk = vec![0u8; 40_000];
    let n = engine.read(&handle, &mut chunk, 0).unwrap();
    reassembled.extend_from_slice(&chunk[..n]);
    let mut offset = n as u64;
    let mut chunk = vec![0u8; 25_000];
    while offset < data.len() as u64 {
        let n = engine.read(&handle, &mut chunk, offset).unwrap();
        assert!(n > 0);
        reassembled.extend_from_slice(&chunk[..n]);
        offset += n as u64;
    }
    assert_eq!(reassembled, data);
    engine.release(handle).unwrap();
}

#[test]
fn multivolume_whole_file_scan() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(64_123);
    store_multivolume(
        &decoder,
        dir.path(),
        "odd.part1.rar",
        "odd.bin",
        &data,
        10_000,
        7_321,
    );

    let engine = engine_over(decoder, dir.path());
    let handle = engine.open("/odd.bin", false).unwrap();
    let mut out = vec![0u8; data.len()];
    let mut offset = 0usize;
    while offset < data.len() {
        let n = engine
            .read(&handle, &mut out[offset..(offset + 8_192).min(data.len())], offset as u64)
            .unwrap();
        assert!(n > 0);
        offset += n;
    }
    assert_eq!(out, data);
    engine.release(handle).unwrap();
}

#[test]
fn getattr_reports_member_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(100_000);
    store_multivolume(
        &decoder,
        dir.path(),
        "big.part01.rar",
        "big.bin",
        &data,
        40_000,
        25_000,
    );

    let engine = engine_over(decoder, dir.path());
    let stat = engine.getattr("/big.bin").unwrap();
    assert_eq!(stat.size, 100_000);
    assert!(!stat.is_dir());
}

#[test]
fn write_open_is_rejected_for_members() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    store_archive(&decoder, dir.path(), "arc.rar", &[("file.txt", b"x")]);

    let engine = engine_over(decoder, dir.path());
    let err = engine.open("/file.txt", true).unwrap_err();
    assert_eq!(err.errno(), -1); // EPERM
}

#[test]
fn directory_handles_do_not_read() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    store_archive(&decoder, dir.path(), "arc.rar", &[("d/in.txt", b"abc")]);

    let engine = engine_over(decoder, dir.path());
    let handle = engine.open("/d", false).unwrap();
    assert!(matches!(handle, Handle::Dir));
    let mut buf = [0u8; 4];
    assert!(engine.read(&handle, &mut buf, 0).is_err());
}
