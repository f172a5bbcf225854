//! Compressed-path end-to-end reads: forward scans, history-window
//! seeks, out-of-window failures and password handling.

mod common;

use common::{MockDecoder, compressed_archive, test_payload};
use rarfs::{Engine, Error, Options, OverrideTable};
use std::io::Write;

fn small_buffer_options() -> Options {
    // 64 KiB buffer, 32 KiB history: large enough to stream, small
    // enough to exercise the window logic quickly.
    Options::new().iob_capacity(64 * 1024).history_pct(50)
}

fn engine_with(
    decoder: std::sync::Arc<MockDecoder>,
    dir: &std::path::Path,
    options: Options,
) -> Engine {
    Engine::new(decoder, dir, options, OverrideTable::new()).unwrap()
}

#[test]
fn forward_scan_matches_reference_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(200_000);
    compressed_archive(&decoder, dir.path(), "doc.rar", &[("doc.pdf", &data)], None);

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let handle = engine.open("/doc.pdf", false).unwrap();

    let mut out = vec![0u8; data.len()];
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + 16_384).min(data.len());
        let n = engine
            .read(&handle, &mut out[offset..end], offset as u64)
            .unwrap();
        assert!(n > 0, "stalled at {}", offset);
        offset += n;
    }
    assert_eq!(out, data);
    engine.release(handle).unwrap();
}

#[test]
fn single_call_whole_file_read() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(30_000);
    compressed_archive(&decoder, dir.path(), "doc.rar", &[("doc.pdf", &data)], None);

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let handle = engine.open("/doc.pdf", false).unwrap();
    let mut out = vec![0u8; data.len()];
    let n = engine.read(&handle, &mut out, 0).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(out, data);
    engine.release(handle).unwrap();
}

#[test]
fn backward_seek_within_history_replays_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(100_000);
    compressed_archive(&decoder, dir.path(), "doc.rar", &[("doc.pdf", &data)], None);

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let handle = engine.open("/doc.pdf", false).unwrap();

    // Scan forward to 40 000 in order.
    let mut scratch = vec![0u8; 40_000];
    let mut offset = 0usize;
    while offset < 40_000 {
        let n = engine
            .read(&handle, &mut scratch[offset..40_000], offset as u64)
            .unwrap();
        offset += n;
    }

    // 16 KiB back is inside the 32 KiB history window.
    let mut replay = vec![0u8; 8_192];
    let n = engine.read(&handle, &mut replay, (40_000 - 16_384) as u64).unwrap();
    assert_eq!(n, 8_192);
    assert_eq!(&replay, &data[40_000 - 16_384..40_000 - 16_384 + 8_192]);
    engine.release(handle).unwrap();
}

#[test]
fn backward_seek_beyond_history_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(120_000);
    compressed_archive(&decoder, dir.path(), "doc.rar", &[("doc.pdf", &data)], None);

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let handle = engine.open("/doc.pdf", false).unwrap();

    let mut scratch = vec![0u8; 100_000];
    let mut offset = 0usize;
    while offset < 100_000 {
        let n = engine
            .read(&handle, &mut scratch[offset..100_000], offset as u64)
            .unwrap();
        offset += n;
    }

    // 100 000 bytes back is far beyond the 32 KiB window: EIO, never
    // stale data.
    let mut buf = vec![0u8; 512];
    let err = engine.read(&handle, &mut buf, 0).unwrap_err();
    assert!(matches!(err, Error::SeekOutOfWindow { .. }));
    assert_eq!(err.errno(), -5);
    engine.release(handle).unwrap();
}

#[test]
fn offset_past_eof_reads_zero_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(10_000);
    compressed_archive(&decoder, dir.path(), "doc.rar", &[("doc.pdf", &data)], None);

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let handle = engine.open("/doc.pdf", false).unwrap();
    let mut buf = vec![0u8; 64];
    assert_eq!(engine.read(&handle, &mut buf, 10_000).unwrap(), 0);
    assert_eq!(engine.read(&handle, &mut buf, 99_999).unwrap(), 0);
    engine.release(handle).unwrap();
}

#[test]
fn password_sidecar_unlocks_encrypted_member() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(20_000);
    compressed_archive(
        &decoder,
        dir.path(),
        "enc.rar",
        &[("secret.bin", &data)],
        Some("secret"),
    );
    let mut pwd = std::fs::File::create(dir.path().join("enc.pwd")).unwrap();
    writeln!(pwd, "secret").unwrap();

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let handle = engine.open("/secret.bin", false).unwrap();
    let mut out = vec![0u8; data.len()];
    let mut offset = 0usize;
    while offset < data.len() {
        let n = engine
            .read(&handle, &mut out[offset..], offset as u64)
            .unwrap();
        assert!(n > 0);
        offset += n;
    }
    assert_eq!(out, data);
    engine.release(handle).unwrap();
}

#[test]
fn wrong_password_reads_eperm() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(20_000);
    compressed_archive(
        &decoder,
        dir.path(),
        "enc.rar",
        &[("secret.bin", &data)],
        Some("secret"),
    );
    let mut pwd = std::fs::File::create(dir.path().join("enc.pwd")).unwrap();
    writeln!(pwd, "wrong").unwrap();

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let handle = engine.open("/secret.bin", false).unwrap();
    let mut buf = vec![0u8; 4096];
    let err = engine.read(&handle, &mut buf, 0).unwrap_err();
    assert!(matches!(err, Error::WrongPassword { .. }));
    assert_eq!(err.errno(), -1);
    engine.release(handle).unwrap();
}

#[test]
fn info_descriptor_reports_header_fields() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(50_000);
    compressed_archive(&decoder, dir.path(), "doc.rar", &[("doc.pdf", &data)], None);

    let engine = engine_with(decoder, dir.path(), small_buffer_options());

    let stat = engine.getattr("/doc.pdf#info").unwrap();
    assert!(!stat.is_dir());

    let handle = engine.open("/doc.pdf#info", false).unwrap();
    assert!(handle.wants_direct_io());
    let mut buf = vec![0u8; 4096];
    let n = engine.read(&handle, &mut buf, 0).unwrap();
    assert!(n > 0);
    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
    assert!(text.contains("doc.pdf"));
    assert!(text.contains("Normal compression"));
    // Subsequent offsets are EOF.
    assert_eq!(engine.read(&handle, &mut buf, n as u64).unwrap(), 0);
    engine.release(handle).unwrap();
}

#[test]
fn independent_opens_have_independent_positions() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(50_000);
    compressed_archive(&decoder, dir.path(), "doc.rar", &[("doc.pdf", &data)], None);

    let engine = engine_with(decoder, dir.path(), small_buffer_options());
    let a = engine.open("/doc.pdf", false).unwrap();
    let b = engine.open("/doc.pdf", false).unwrap();

    let mut buf_a = vec![0u8; 1000];
    let mut buf_b = vec![0u8; 1000];
    engine.read(&a, &mut buf_a, 0).unwrap();
    engine.read(&b, &mut buf_b, 0).unwrap();
    assert_eq!(buf_a, buf_b);

    engine.release(a).unwrap();
    engine.release(b).unwrap();
}
