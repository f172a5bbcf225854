//! Volume filename arithmetic.
//!
//! RAR sets use two numbering schemes. The old scheme counts
//! `.rar, .r00, .r01, ... .r99, .s00, ...`, wrapping the leading letter
//! every hundred volumes. The new scheme embeds the number in the stem:
//! `name.part01.rar, name.part02.rar, ...` with a writer-chosen field
//! width that must be preserved when composing names.
//!
//! Indices are 0-based throughout: index 0 is `.rar` respectively
//! `.part1.rar`, whatever width the field has.

/// Volume filename numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolumeScheme {
    /// `.rar`, `.r00`, `.r01`, ... suffix numbering.
    Old,
    /// `name.partNN.rar` stem numbering.
    #[default]
    New,
}

/// Parsed position of the numeric field inside a volume filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeFormat {
    /// Volume index, 0-based; 0 for the first volume of either scheme.
    pub index: u32,
    /// Byte position of the numeric field.
    pub pos: usize,
    /// Byte length of the numeric field.
    pub len: usize,
    /// Which scheme the name follows.
    pub scheme: VolumeScheme,
}

/// Parses a volume filename into its numeric-field format.
///
/// The new scheme is tried first since `.partNN.rar` names also end in a
/// four-character extension. Returns `None` for names that carry no
/// recognisable volume field (plain single archives).
pub fn parse(name: &str) -> Option<VolumeFormat> {
    parse_new(name).or_else(|| parse_old(name))
}

fn parse_new(name: &str) -> Option<VolumeFormat> {
    let bytes = name.as_bytes();
    // Last component must be ".part<digits>.<3-char ext>".
    let ext_dot = name.rfind('.')?;
    if bytes.len() - ext_dot != 4 {
        return None;
    }
    let part_dot = name[..ext_dot].rfind('.')?;
    let stem = &name[part_dot..ext_dot];
    if stem.len() < 6 || !stem[1..5].eq_ignore_ascii_case("part") {
        return None;
    }
    let digits = &name[part_dot + 5..ext_dot];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    if value == 0 {
        return None;
    }
    Some(VolumeFormat {
        index: value - 1,
        pos: part_dot + 5,
        len: digits.len(),
        scheme: VolumeScheme::New,
    })
}

fn parse_old(name: &str) -> Option<VolumeFormat> {
    let bytes = name.as_bytes();
    let ext_dot = name.rfind('.')?;
    if bytes.len() - ext_dot != 4 {
        return None;
    }
    let ext = &bytes[ext_dot + 1..];
    let pos = ext_dot + 2;
    if ext.eq_ignore_ascii_case(b"rar") {
        return Some(VolumeFormat {
            index: 0,
            pos,
            len: 2,
            scheme: VolumeScheme::Old,
        });
    }
    let letter = ext[0].to_ascii_lowercase();
    if !(b'r'..=b'z').contains(&letter)
        || !ext[1].is_ascii_digit()
        || !ext[2].is_ascii_digit()
    {
        return None;
    }
    let nn = (ext[1] - b'0') as u32 * 10 + (ext[2] - b'0') as u32;
    let index = nn + 1 + 100 * (letter - b'r') as u32;
    Some(VolumeFormat {
        index,
        pos,
        len: 2,
        scheme: VolumeScheme::Old,
    })
}

/// Composes the name of the `index`th volume (0-based) of the set that
/// `first` belongs to.
///
/// `first` must be a first-volume name (`.rar` or `.part1.rar` with any
/// field width); its numeric field is rewritten in place. For the new
/// scheme the field width is preserved and grown only when the index no
/// longer fits. For the old scheme indices past 100 wrap the leading
/// letter (`.r99` → `.s00`) and widen the field by one, matching the
/// on-disk names such sets actually use.
pub fn nth_name(first: &str, index: u32) -> Option<String> {
    let fmt = parse(first)?;
    let mut out = String::from(first);
    match fmt.scheme {
        VolumeScheme::New => {
            let value = index + 1;
            let field = format!("{:0width$}", value, width = fmt.len);
            out.replace_range(fmt.pos..fmt.pos + fmt.len, &field);
        }
        VolumeScheme::Old => {
            let lower = out.as_bytes()[fmt.pos - 1] >= b'r';
            if index == 0 {
                let field = if lower { "ar" } else { "AR" };
                out.replace_range(fmt.pos..fmt.pos + fmt.len, field);
            } else if index <= 100 {
                let field = format!("{:02}", index - 1);
                out.replace_range(fmt.pos..fmt.pos + fmt.len, &field);
            } else {
                let letter = (if lower { b'r' } else { b'R' }) + ((index - 1) / 100) as u8;
                let field = format!("{}{:02}", letter as char, (index - 1) % 100);
                out.replace_range(fmt.pos - 1..fmt.pos + fmt.len, &field);
            }
        }
    }
    Some(out)
}

/// Rewrites any volume name of a set into its first-volume name.
///
/// This is pure arithmetic; pre-5.x archives mis-report the first-volume
/// header bit for `.rNN` members, so callers resolving a mount must still
/// verify the candidate by opening it (see the enumerator).
pub fn first_name(name: &str) -> Option<String> {
    let fmt = parse(name)?;
    match fmt.scheme {
        VolumeScheme::New => {
            let field = format!("{:0width$}", 1, width = fmt.len);
            let mut out = String::from(name);
            out.replace_range(fmt.pos..fmt.pos + fmt.len, &field);
            Some(out)
        }
        VolumeScheme::Old => {
            let mut out = String::from(name);
            let lower = out.as_bytes()[fmt.pos - 1] >= b'r';
            let prefix = if lower { "rar" } else { "RAR" };
            out.replace_range(fmt.pos - 1..fmt.pos + fmt.len, prefix);
            Some(out)
        }
    }
}

/// Returns `true` for names that look like classic `.rNN` volume files.
///
/// The archive header remains the final judge; this only filters
/// directory scans.
pub fn is_rxx_vol(name: &str) -> bool {
    matches!(
        parse_old(name),
        Some(VolumeFormat { index, .. }) if index > 0
    )
}
