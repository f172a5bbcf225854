//! Shared test fixtures: a mock decoder over synthetic archives.
//!
//! The engine consumes the decoder as a black box, so tests back the
//! [`Decoder`] trait with an in-memory registry. Store-mode members
//! additionally exist as real bytes inside synthetic volume files on
//! disk, with junk padding standing in for volume headers, which is
//! what the raw read path actually touches.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rarfs::archive::decoder::{
    ArchiveHandle, ArchiveSource, ControlFlow, Decoder, MainHeader, MemberHeader, StreamSink,
};
use rarfs::error::{Error, Result};
use rarfs::password::Password;

/// Bytes of fake header padding at the front of each synthetic volume.
pub const VOL_PAD: usize = 96;

/// Chunk size the mock decoder streams payloads in.
const CHUNK: usize = 64 * 1024;

/// Token prefix identifying nested-archive payloads handed in as views.
const VIEW_MAGIC: &[u8] = b"MOCKARC:";

#[derive(Clone, Default)]
pub struct MockMember {
    pub header: MemberHeader,
    /// Full decoded payload, streamed by `process`.
    pub payload: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct MockVolume {
    pub main: MainHeader,
    pub members: Vec<MockMember>,
    /// Password required to process member payloads.
    pub password: Option<String>,
}

/// Registry-backed decoder double.
#[derive(Default)]
pub struct MockDecoder {
    by_path: Mutex<HashMap<PathBuf, MockVolume>>,
    by_token: Mutex<HashMap<String, MockVolume>>,
}

impl MockDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, path: impl AsRef<Path>, volume: MockVolume) {
        self.by_path
            .lock()
            .unwrap()
            .insert(path.as_ref().to_path_buf(), volume);
    }

    /// Registers an archive reachable only through a payload view whose
    /// content starts with `MOCKARC:<token>`.
    pub fn register_view(&self, token: &str, volume: MockVolume) {
        self.by_token
            .lock()
            .unwrap()
            .insert(token.to_string(), volume);
    }
}

impl Decoder for MockDecoder {
    fn open(
        &self,
        source: ArchiveSource,
        password: Option<Password>,
    ) -> Result<Box<dyn ArchiveHandle>> {
        let volume = match source {
            ArchiveSource::Path(path) => self
                .by_path
                .lock()
                .unwrap()
                .get(path.as_path())
                .cloned()
                .ok_or_else(|| {
                    Error::InvalidFormat(format!("not a mock archive: {}", path.display()))
                })?,
            ArchiveSource::View(mut view) => {
                let mut contents = Vec::new();
                view.read_to_end(&mut contents).map_err(Error::Io)?;
                if !contents.starts_with(VIEW_MAGIC) {
                    return Err(Error::InvalidFormat("view is not a mock archive".into()));
                }
                let token = String::from_utf8_lossy(&contents[VIEW_MAGIC.len()..])
                    .trim_end_matches(char::from(0))
                    .to_string();
                self.by_token
                    .lock()
                    .unwrap()
                    .get(token.as_str())
                    .cloned()
                    .ok_or_else(|| Error::InvalidFormat(format!("unknown view token: {}", token)))?
            }
        };

        if volume.main.encrypted_headers && password.is_none() {
            return Err(Error::PasswordRequired {
                archive: "mock".into(),
            });
        }

        Ok(Box::new(MockHandle {
            volume,
            password,
            idx: 0,
            header_read: false,
        }))
    }
}

struct MockHandle {
    volume: MockVolume,
    password: Option<Password>,
    idx: usize,
    header_read: bool,
}

impl MockHandle {
    fn check_password(&mut self, sink: &mut dyn StreamSink) -> Result<()> {
        let Some(required) = &self.volume.password else {
            return Ok(());
        };
        let given = self
            .password
            .clone()
            .or_else(|| sink.need_password());
        match given {
            Some(p) if p.as_str() == required => Ok(()),
            _ => Err(Error::WrongPassword {
                archive: "mock".into(),
            }),
        }
    }
}

impl ArchiveHandle for MockHandle {
    fn main(&self) -> MainHeader {
        self.volume.main
    }

    fn read_header(&mut self) -> Result<Option<MemberHeader>> {
        match self.volume.members.get(self.idx) {
            Some(member) => {
                self.header_read = true;
                Ok(Some(member.header.clone()))
            }
            None => Ok(None),
        }
    }

    fn skip(&mut self) -> Result<()> {
        assert!(self.header_read, "skip before read_header");
        self.idx += 1;
        self.header_read = false;
        Ok(())
    }

    fn process(&mut self, sink: &mut dyn StreamSink) -> Result<()> {
        assert!(self.header_read, "process before read_header");
        self.check_password(sink)?;
        let member = self.volume.members[self.idx].clone();
        for chunk in member.payload.chunks(CHUNK) {
            if sink.data(chunk) == ControlFlow::Cancel {
                self.idx += 1;
                self.header_read = false;
                return Err(Error::Cancelled);
            }
        }
        self.idx += 1;
        self.header_read = false;
        Ok(())
    }
}

fn store_header(name: &str, payload_len: u64, data_offset: u64) -> MemberHeader {
    MemberHeader {
        name: name.to_string(),
        unpacked_size: payload_len,
        packed_size: payload_len,
        method: 0x30,
        data_offset,
        dos_time: 0x5800_0000, // some 2024 date
        crc32: 0,
        ..MemberHeader::default()
    }
}

fn compressed_header(name: &str, payload_len: u64) -> MemberHeader {
    MemberHeader {
        name: name.to_string(),
        unpacked_size: payload_len,
        packed_size: payload_len / 2,
        method: 0x33,
        data_offset: VOL_PAD as u64,
        dos_time: 0x5800_0000,
        crc32: 0xC0FF_EE00,
        window_size: 4 * 1024 * 1024,
        ..MemberHeader::default()
    }
}

/// Writes a single-volume store archive to disk and registers it.
///
/// Each member's payload appears verbatim in the volume file behind
/// `VOL_PAD` junk bytes, like store-mode RAR data does.
pub fn store_archive(
    decoder: &MockDecoder,
    dir: &Path,
    archive_name: &str,
    files: &[(&str, &[u8])],
) -> PathBuf {
    let path = dir.join(archive_name);
    let mut volume = MockVolume::default();
    let mut f = std::fs::File::create(&path).unwrap();
    let mut offset = 0u64;
    for (name, payload) in files {
        f.write_all(&vec![0x5A; VOL_PAD]).unwrap();
        offset += VOL_PAD as u64;
        f.write_all(payload).unwrap();
        volume.members.push(MockMember {
            header: store_header(name, payload.len() as u64, offset),
            payload: payload.to_vec(),
        });
        offset += payload.len() as u64;
    }
    decoder.register(&path, volume);
    path
}

/// Writes a store-mode member split across `.partNN.rar` volumes and
/// registers every volume's header list.
pub fn store_multivolume(
    decoder: &MockDecoder,
    dir: &Path,
    base_name: &str,
    member: &str,
    payload: &[u8],
    first_cap: usize,
    next_cap: usize,
) -> PathBuf {
    let first_path = dir.join(base_name);
    let base = first_path.to_str().unwrap().to_string();

    let mut remaining = payload;
    let mut vol = 0u32;
    while !remaining.is_empty() || vol == 0 {
        let cap = if vol == 0 { first_cap } else { next_cap };
        let take = cap.min(remaining.len());
        let name = rarfs::volume::nth_name(&base, vol).unwrap();
        let mut f = std::fs::File::create(&name).unwrap();
        f.write_all(&vec![0x5A; VOL_PAD]).unwrap();
        f.write_all(&remaining[..take]).unwrap();
        remaining = &remaining[take..];

        let mut header = store_header(member, payload.len() as u64, VOL_PAD as u64);
        header.packed_size = take as u64;
        header.split_before = vol > 0;
        header.split_after = !remaining.is_empty();
        decoder.register(
            PathBuf::from(&name),
            MockVolume {
                main: MainHeader {
                    volume: true,
                    new_numbering: true,
                    first_volume: vol == 0,
                    ..MainHeader::default()
                },
                members: vec![MockMember {
                    header,
                    payload: Vec::new(),
                }],
                password: None,
            },
        );
        vol += 1;
    }
    first_path
}

/// Writes a stub volume file and registers a compressed archive whose
/// payloads only the decoder (mock) can produce.
pub fn compressed_archive(
    decoder: &MockDecoder,
    dir: &Path,
    archive_name: &str,
    files: &[(&str, &[u8])],
    password: Option<&str>,
) -> PathBuf {
    let path = dir.join(archive_name);
    std::fs::write(&path, b"Rar!\x1a\x07stub").unwrap();
    let volume = MockVolume {
        main: MainHeader::default(),
        members: files
            .iter()
            .map(|(name, payload)| {
                let mut header = compressed_header(name, payload.len() as u64);
                header.encrypted = password.is_some();
                MockMember {
                    header,
                    payload: payload.to_vec(),
                }
            })
            .collect(),
        password: password.map(String::from),
    };
    decoder.register(&path, volume);
    path
}

/// Deterministic pseudo-random payload.
pub fn test_payload(len: usize) -> Vec<u8> {
    use rand::{RngCore, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED_CAFE);
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}
