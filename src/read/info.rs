//! The `#info` descriptor.
//!
//! Opening `<path>#info` yields a small synthetic text file describing
//! the member's header: sizes, ratio, times, CRC, method, window size,
//! host OS and flags. The report is formatted once at open; reads serve
//! only offset 0 in a `cat`-like fashion, everything past the first
//! read returns EOF. No extractor is spawned.

use crate::archive::decoder::MemberHeader;
use crate::entry::FileEntry;
use crate::timestamp::format_unix;

/// Compression method names, indexed from the method byte.
fn method_name(method: u8) -> &'static str {
    match method {
        0x30 => "Storing",
        0x31 => "Fastest compression",
        0x32 => "Fast compression",
        0x33 => "Normal compression",
        0x34 => "Good compression",
        0x35 => "Best compression",
        _ => "Unknown method",
    }
}

/// Formats the descriptor text for a member.
pub fn format_info(entry: &FileEntry, header: &MemberHeader) -> String {
    let unpacked = header.unpacked_size.max(entry.stat.size);
    let ratio = if unpacked > 0 {
        (header.packed_size as f64 / unpacked as f64 * 100.0).round() as u64
    } else {
        100
    };
    let (atime, mtime, ctime) = header.unix_times.unwrap_or((
        entry.stat.atime,
        entry.stat.mtime,
        entry.stat.ctime,
    ));

    let mut flags = Vec::new();
    if header.encrypted {
        flags.push("encrypted");
    }
    if header.solid {
        flags.push("solid");
    }
    if header.split_before {
        flags.push("split-before");
    }
    if header.split_after {
        flags.push("split-after");
    }
    if flags.is_empty() {
        flags.push("none");
    }

    format!(
        "Name:     {}\n\
         Size:     {}\n\
         Packed:   {}\n\
         Ratio:    {}%\n\
         mtime:    {}\n\
         ctime:    {}\n\
         atime:    {}\n\
         CRC32:    {:08X}\n\
         Method:   {}\n\
         Window:   {}K\n\
         Host OS:  {}\n\
         Version:  {}.{}\n\
         Flags:    {}\n",
        header.name,
        unpacked,
        header.packed_size,
        ratio,
        format_unix(mtime),
        format_unix(ctime),
        format_unix(atime),
        header.crc32,
        method_name(header.method),
        header.window_size / 1024,
        header.host_os,
        header.unpacked_version / 10,
        header.unpacked_version % 10,
        flags.join(", "),
    )
}

/// Per-open handle of an `#info` descriptor.
#[derive(Debug)]
pub struct InfoReader {
    text: Vec<u8>,
}

impl InfoReader {
    /// Builds the reader with the report preformatted.
    pub fn new(entry: &FileEntry, header: &MemberHeader) -> Self {
        Self {
            text: format_info(entry, header).into_bytes(),
        }
    }

    /// The descriptor's apparent size.
    pub fn len(&self) -> u64 {
        self.text.len() as u64
    }

    /// Returns `true` for an empty descriptor (it never is in practice).
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Serves a read; only `offset == 0` yields bytes.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> usize {
        if offset != 0 {
            return 0;
        }
        let n = dst.len().min(self.text.len());
        dst[..n].copy_from_slice(&self.text[..n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::decoder::HostOs;
    use crate::entry::EntryStat;

    fn sample() -> (FileEntry, MemberHeader) {
        let mut entry = FileEntry::new("/arc/movie.mkv");
        entry.stat = EntryStat {
            size: 1_000_000,
            mtime: 1_078_057_842,
            ..EntryStat::default()
        };
        let header = MemberHeader {
            name: "movie.mkv".into(),
            unpacked_size: 1_000_000,
            packed_size: 400_000,
            method: 0x33,
            crc32: 0xDEADBEEF,
            host_os: HostOs::Unix,
            unpacked_version: 50,
            window_size: 4 * 1024 * 1024,
            solid: true,
            ..MemberHeader::default()
        };
        (entry, header)
    }

    #[test]
    fn test_report_contents() {
        let (entry, header) = sample();
        let text = format_info(&entry, &header);
        assert!(text.contains("movie.mkv"));
        assert!(text.contains("Ratio:    40%"));
        assert!(text.contains("DEADBEEF"));
        assert!(text.contains("Normal compression"));
        assert!(text.contains("4096K"));
        assert!(text.contains("Version:  5.0"));
        assert!(text.contains("solid"));
    }

    #[test]
    fn test_reads_serve_offset_zero_only() {
        let (entry, header) = sample();
        let reader = InfoReader::new(&entry, &header);

        let mut buf = vec![0u8; 16];
        let n = reader.read_at(&mut buf, 0);
        assert_eq!(n, 16);
        assert!(buf.starts_with(b"Name:"));

        assert_eq!(reader.read_at(&mut buf, 16), 0);
        assert_eq!(reader.read_at(&mut buf, 1), 0);
    }

    #[test]
    fn test_large_buffer_gets_whole_report() {
        let (entry, header) = sample();
        let reader = InfoReader::new(&entry, &header);
        let mut buf = vec![0u8; 4096];
        let n = reader.read_at(&mut buf, 0);
        assert_eq!(n as u64, reader.len());
    }
}
