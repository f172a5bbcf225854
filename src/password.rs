//! Password handling for encrypted archives.
//!
//! Passwords come from three places, probed in order: a `<base>.pwd`
//! sidecar next to the archive (with the volume suffix replaced), a
//! hidden `.<base>.pwd` variant in the same directory, and the
//! per-archive configuration overrides. Only the first line of a sidecar
//! counts; a trailing CR/LF is stripped.

use std::path::Path;

use zeroize::Zeroizing;

/// A password for archive decryption.
///
/// The backing string is wiped on drop and never appears in `Debug`
/// output.
#[derive(Clone)]
pub struct Password {
    inner: Zeroizing<String>,
}

impl Password {
    /// Creates a new password from a string.
    pub fn new<S: Into<String>>(password: S) -> Self {
        Self {
            inner: Zeroizing::new(password.into()),
        }
    }

    /// Returns the password as a string slice.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Returns the password as UTF-16 code units, the form the decoder
    /// ABI hands to its wide-character password callback.
    pub fn as_utf16(&self) -> Vec<u16> {
        self.inner.encode_utf16().collect()
    }

    /// Returns `true` if the password is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        *self.inner == *other.inner
    }
}

/// Reads the first line of a `.pwd` sidecar, CR/LF stripped.
fn read_pwd_file(path: &Path) -> Option<Password> {
    let contents = std::fs::read_to_string(path).ok()?;
    let line = contents.lines().next().unwrap_or("");
    Some(Password::new(line))
}

/// Derives the sidecar path by replacing the archive name's last
/// four-character suffix with `.pwd` (`movie.r03` → `movie.pwd`,
/// `movie.part02.rar` → `movie.part02.pwd`).
fn sidecar_path(archive: &Path) -> Option<std::path::PathBuf> {
    let name = archive.file_name()?.to_str()?;
    if name.len() < 4 {
        return None;
    }
    let stem = &name[..name.len() - 4];
    Some(archive.with_file_name(format!("{}.pwd", stem)))
}

/// Looks a password up for the given archive path.
///
/// `configured` is the per-archive override from the mount
/// configuration, consulted last.
pub fn lookup(archive: &Path, configured: Option<&Password>) -> Option<Password> {
    if let Some(sidecar) = sidecar_path(archive) {
        if let Some(pwd) = read_pwd_file(&sidecar) {
            return Some(pwd);
        }
        // Hidden variant: .<basename>.pwd in the same directory.
        if let Some(name) = sidecar.file_name().and_then(|n| n.to_str()) {
            let hidden = sidecar.with_file_name(format!(".{}", name));
            if let Some(pwd) = read_pwd_file(&hidden) {
                return Some(pwd);
            }
        }
    }
    configured.cloned()
}
