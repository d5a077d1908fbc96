//! Memory-mapped raw data readers.

use crate::error::open_error;
use crate::{Error, Result};
use memmap2::Mmap;
use monopix_raw::WordSource;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Bytes per raw word.
pub const WORD_BYTES: usize = 4;

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire file
/// into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns [`Error::MissingFile`] if the file does not exist, or an I/O
    /// error if it cannot be memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| open_error(e, path))?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A raw data file of little-endian 32-bit words.
pub struct RawDataFile {
    reader: MappedFileReader,
}

impl RawDataFile {
    /// Maps a raw data file.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the file size is not a whole
    /// number of words, and the errors of [`MappedFileReader::open`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        if !reader.len().is_multiple_of(WORD_BYTES) {
            return Err(Error::InvalidFormat(format!(
                "file size {} is not a multiple of {WORD_BYTES} (file: {})",
                reader.len(),
                reader.path().display()
            )));
        }
        Ok(Self { reader })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    /// Returns the word at `index`.
    #[must_use]
    pub fn word(&self, index: usize) -> Option<u32> {
        let start = index.checked_mul(WORD_BYTES)?;
        let bytes = self.reader.as_bytes().get(start..start + WORD_BYTES)?;
        Some(decode_word(bytes))
    }

    /// Iterates over all words of the file.
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.reader
            .as_bytes()
            .chunks_exact(WORD_BYTES)
            .map(decode_word)
    }
}

fn decode_word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl WordSource for RawDataFile {
    fn word_count(&self) -> usize {
        self.reader.len() / WORD_BYTES
    }

    fn read_words(&self, range: Range<usize>, out: &mut Vec<u32>) -> monopix_raw::Result<()> {
        let bytes = self
            .reader
            .as_bytes()
            .get(range.start * WORD_BYTES..range.end * WORD_BYTES)
            .ok_or_else(|| {
                monopix_raw::Error::CorruptOffsets(format!(
                    "word range {}..{} outside {} ({} words)",
                    range.start,
                    range.end,
                    self.path().display(),
                    self.word_count()
                ))
            })?;
        out.clear();
        out.extend(bytes.chunks_exact(WORD_BYTES).map(decode_word));
        Ok(())
    }
}
