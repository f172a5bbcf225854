//! EOF-index behaviour: near-end probes, sidecar production and
//! round-trips, and the zero-fill fallback.

mod common;

use common::{MockDecoder, compressed_archive, test_payload};
use rarfs::{Engine, Options, OverrideTable};

fn options() -> Options {
    Options::new().iob_capacity(64 * 1024).history_pct(50)
}

#[test]
fn near_eof_probe_produces_sidecar_and_serves_tail() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(500_000);
    compressed_archive(
        &decoder,
        dir.path(),
        "movie.rar",
        &[("movie.mkv", &data)],
        None,
    );

    let engine = Engine::new(
        decoder,
        dir.path(),
        options().save_eof(true),
        OverrideTable::new(),
    )
    .unwrap();

    let handle = engine.open("/movie.mkv", false).unwrap();
    // First read probes near the end, the way players hunt for
    // container indexes.
    let probe_offset = data.len() as u64 - 256;
    let mut buf = vec![0u8; 200];
    let n = engine.read(&handle, &mut buf, probe_offset).unwrap();
    assert_eq!(n, 200);
    assert_eq!(&buf, &data[data.len() - 256..data.len() - 56]);

    // The sidecar now exists next to the archive in the source dir.
    assert!(dir.path().join("movie.r2i").exists());
    engine.release(handle).unwrap();
}

#[test]
fn sidecar_round_trip_matches_reference_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(400_000);
    compressed_archive(
        &decoder,
        dir.path(),
        "movie.rar",
        &[("movie.mkv", &data)],
        None,
    );

    let engine = Engine::new(
        decoder,
        dir.path(),
        options().save_eof(true),
        OverrideTable::new(),
    )
    .unwrap();

    // Produce the sidecar with a probe on a first open.
    let probe_offset = data.len() as u64 - 4096;
    {
        let handle = engine.open("/movie.mkv", false).unwrap();
        let mut buf = vec![0u8; 512];
        engine.read(&handle, &mut buf, probe_offset).unwrap();
        engine.release(handle).unwrap();
    }

    // A fresh open preloads it and serves the whole tail range
    // byte-identically to reference extraction.
    let handle = engine.open("/movie.mkv", false).unwrap();
    let tail_len = (data.len() as u64 - probe_offset) as usize;
    let mut tail = vec![0u8; tail_len];
    let mut offset = probe_offset;
    let mut got = 0usize;
    while got < tail_len {
        let n = engine.read(&handle, &mut tail[got..], offset).unwrap();
        assert!(n > 0);
        got += n;
        offset += n as u64;
    }
    assert_eq!(&tail, &data[probe_offset as usize..]);
    engine.release(handle).unwrap();
}

#[test]
fn probe_without_save_eof_zero_fills_and_latches_direct_io() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(300_000);
    compressed_archive(
        &decoder,
        dir.path(),
        "movie.rar",
        &[("movie.mkv", &data)],
        None,
    );

    let engine = Engine::new(decoder, dir.path(), options(), OverrideTable::new()).unwrap();
    let handle = engine.open("/movie.mkv", false).unwrap();
    assert!(!handle.wants_direct_io());

    let mut buf = vec![0xFFu8; 512];
    let n = engine
        .read(&handle, &mut buf, data.len() as u64 - 600)
        .unwrap();
    assert_eq!(n, 512);
    assert!(buf.iter().all(|&b| b == 0), "probe must be zero-filled");
    assert!(handle.wants_direct_io());
    assert!(!dir.path().join("movie.r2i").exists());
    engine.release(handle).unwrap();
}

#[test]
fn sidecar_survives_for_source_directory_listing() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(200_000);
    compressed_archive(
        &decoder,
        dir.path(),
        "movie.rar",
        &[("movie.mkv", &data)],
        None,
    );

    let engine = Engine::new(
        decoder,
        dir.path(),
        options().save_eof(true),
        OverrideTable::new(),
    )
    .unwrap();

    let handle = engine.open("/movie.mkv", false).unwrap();
    let mut buf = vec![0u8; 64];
    engine
        .read(&handle, &mut buf, data.len() as u64 - 128)
        .unwrap();
    engine.release(handle).unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|d| d.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(names.iter().any(|n| n == "movie.r2i"));
    // The mount listing surfaces it too; it lives in the source dir.
    let listing = engine.readdir("/").unwrap();
    assert!(listing.iter().any(|(n, _)| n == "movie.r2i"));
}

#[test]
fn normal_reads_do_not_produce_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let decoder = MockDecoder::new();
    let data = test_payload(100_000);
    compressed_archive(
        &decoder,
        dir.path(),
        "movie.rar",
        &[("movie.mkv", &data)],
        None,
    );

    let engine = Engine::new(
        decoder,
        dir.path(),
        options().save_eof(true),
        OverrideTable::new(),
    )
    .unwrap();

    let handle = engine.open("/movie.mkv", false).unwrap();
    let mut buf = vec![0u8; 8_192];
    let mut offset = 0u64;
    for _ in 0..4 {
        let n = engine.read(&handle, &mut buf, offset).unwrap();
        offset += n as u64;
    }
    assert!(!dir.path().join("movie.r2i").exists());
    engine.release(handle).unwrap();
}
