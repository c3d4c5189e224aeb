use bencoder::bencode::Bencode;

pub const SHA1_DIGEST_LEN: usize = 20;

/// A single file entry of the `info` dict.
///
/// Single-file torrents are normalized to one entry with an empty `path`;
/// the torrent `name` is the file name in that case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub length: u64,
    pub path: Vec<String>,
}

/// Parsed `info` dict of a metainfo file.
///
/// To create a new `Info` use the method builder `from()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub piece_length: u32,
    /// Concatenated 20-byte SHA-1 digests, one per piece.
    pub pieces: Vec<u8>,
    pub files: Vec<FileEntry>,
}

/// Possible `Info` parsing errors.
#[derive(Debug, PartialEq)]
pub enum FromInfoError {
    MissingName,
    MissingLength,
    MissingPieceLength,
    MissingPieces,
    InvalidPieceLength,
    InvalidPieces,
    InvalidFiles,
    NotADict,
}

impl Info {
    /// Builds a new `Info` from the bencoded `info` dict.
    ///
    /// It returns a `FromInfoError` if:
    /// - A required field is missing or has the wrong type.
    /// - `piece length` is not a power of two or exceeds 4 MiB.
    /// - `pieces` is not a multiple of 20 bytes, or does not cover the
    ///   declared content length.
    pub fn from(bencode: &Bencode) -> Result<Info, FromInfoError> {
        let mut name = None;
        let mut length = None;
        let mut piece_length = None;
        let mut pieces = None;
        let mut files = None;

        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromInfoError::NotADict),
        };

        for (k, v) in d.iter() {
            if k == b"name" {
                name = Some(Self::create_name(v)?);
            } else if k == b"length" {
                length = Some(Self::create_length(v)?);
            } else if k == b"piece length" {
                piece_length = Some(Self::create_piece_length(v)?);
            } else if k == b"pieces" {
                pieces = Some(Self::create_pieces(v)?);
            } else if k == b"files" {
                files = Some(Self::create_files(v)?);
            }
        }

        let name = name.ok_or(FromInfoError::MissingName)?;
        let piece_length = piece_length.ok_or(FromInfoError::MissingPieceLength)?;
        let pieces = pieces.ok_or(FromInfoError::MissingPieces)?;

        let files = match (files, length) {
            (Some(files), _) => files,
            (None, Some(length)) => vec![FileEntry {
                length,
                path: vec![],
            }],
            (None, None) => return Err(FromInfoError::MissingLength),
        };

        let info = Info {
            name,
            piece_length,
            pieces,
            files,
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<(), FromInfoError> {
        if self.piece_length == 0
            || !self.piece_length.is_power_of_two()
            || self.piece_length > 1 << 22
        {
            return Err(FromInfoError::InvalidPieceLength);
        }
        if self.pieces.is_empty() || self.pieces.len() % SHA1_DIGEST_LEN != 0 {
            return Err(FromInfoError::InvalidPieces);
        }
        let expected =
            (self.total_length() + u64::from(self.piece_length) - 1) / u64::from(self.piece_length);
        if self.piece_count() as u64 != expected {
            return Err(FromInfoError::InvalidPieces);
        }
        Ok(())
    }

    /// Total content length in bytes across all files.
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    /// Number of pieces the content is split into.
    pub fn piece_count(&self) -> u32 {
        (self.pieces.len() / SHA1_DIGEST_LEN) as u32
    }

    /// The SHA-1 digest of the piece at `index`.
    pub fn piece_hash(&self, index: u32) -> &[u8] {
        let start = index as usize * SHA1_DIGEST_LEN;
        &self.pieces[start..start + SHA1_DIGEST_LEN]
    }

    /// Actual byte length of the piece at `index`; only the last piece may
    /// be shorter than `piece_length`.
    pub fn real_piece_length(&self, index: u32) -> u32 {
        let start = u64::from(index) * u64::from(self.piece_length);
        let remaining = self.total_length().saturating_sub(start);
        remaining.min(u64::from(self.piece_length)) as u32
    }

    fn create_name(bencode: &Bencode) -> Result<String, FromInfoError> {
        let c = match bencode {
            Bencode::BString(s) => s,
            _ => return Err(FromInfoError::MissingName),
        };

        String::from_utf8(c.to_vec()).map_err(|_| FromInfoError::MissingName)
    }

    fn create_length(bencode: &Bencode) -> Result<u64, FromInfoError> {
        match bencode {
            Bencode::BNumber(n) if *n >= 0 => Ok(*n as u64),
            _ => Err(FromInfoError::MissingLength),
        }
    }

    fn create_piece_length(bencode: &Bencode) -> Result<u32, FromInfoError> {
        match bencode {
            Bencode::BNumber(n) if *n > 0 => Ok(*n as u32),
            _ => Err(FromInfoError::MissingPieceLength),
        }
    }

    fn create_pieces(bencode: &Bencode) -> Result<Vec<u8>, FromInfoError> {
        match bencode {
            Bencode::BString(s) => Ok(s.to_vec()),
            _ => Err(FromInfoError::MissingPieces),
        }
    }

    fn create_files(bencode: &Bencode) -> Result<Vec<FileEntry>, FromInfoError> {
        let list = match bencode {
            Bencode::BList(l) => l,
            _ => return Err(FromInfoError::InvalidFiles),
        };

        let mut files = Vec::with_capacity(list.len());
        for entry in list {
            files.push(Self::create_file_entry(entry)?);
        }
        if files.is_empty() {
            return Err(FromInfoError::InvalidFiles);
        }
        Ok(files)
    }

    fn create_file_entry(bencode: &Bencode) -> Result<FileEntry, FromInfoError> {
        let d = match bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromInfoError::InvalidFiles),
        };

        let mut length = None;
        let mut path = None;

        for (k, v) in d.iter() {
            if k == b"length" {
                length = Some(Self::create_length(v).map_err(|_| FromInfoError::InvalidFiles)?);
            } else if k == b"path" {
                path = Some(Self::create_path(v)?);
            }
        }

        match (length, path) {
            (Some(length), Some(path)) if !path.is_empty() => Ok(FileEntry { length, path }),
            _ => Err(FromInfoError::InvalidFiles),
        }
    }

    fn create_path(bencode: &Bencode) -> Result<Vec<String>, FromInfoError> {
        let list = match bencode {
            Bencode::BList(l) => l,
            _ => return Err(FromInfoError::InvalidFiles),
        };

        let mut path = Vec::with_capacity(list.len());
        for component in list {
            match component {
                Bencode::BString(s) => path.push(
                    String::from_utf8(s.to_vec()).map_err(|_| FromInfoError::InvalidFiles)?,
                ),
                _ => return Err(FromInfoError::InvalidFiles),
            }
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_from_single_file_info() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Bencode::BNumber(1024));
        info.insert(b"name".to_vec(), Bencode::BString(b"file.bin".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(16384));
        info.insert(b"pieces".to_vec(), Bencode::BString(vec![0xab; 20]));

        let info = Info::from(&Bencode::BDict(info)).unwrap();

        assert_eq!(info.name, "file.bin");
        assert_eq!(info.piece_length, 16384);
        assert_eq!(info.total_length(), 1024);
        assert_eq!(info.piece_count(), 1);
        assert_eq!(info.files.len(), 1);
        assert!(info.files[0].path.is_empty());
    }

    #[test]
    fn test_from_multi_file_info() {
        let info = Info::from(&build_multi_file_bencode()).unwrap();

        assert_eq!(info.files.len(), 2);
        assert_eq!(info.files[0].path, vec!["a".to_string(), "b.txt".to_string()]);
        assert_eq!(info.total_length(), 40000);
        assert_eq!(info.piece_count(), 2);
    }

    #[test]
    fn test_from_info_missing_pieces() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Bencode::BNumber(1024));
        info.insert(b"name".to_vec(), Bencode::BString(b"file.bin".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(16384));

        assert_eq!(
            Info::from(&Bencode::BDict(info)).unwrap_err(),
            FromInfoError::MissingPieces
        );
    }

    #[test]
    fn test_from_info_piece_length_not_power_of_two() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Bencode::BNumber(1024));
        info.insert(b"name".to_vec(), Bencode::BString(b"file.bin".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(10000));
        info.insert(b"pieces".to_vec(), Bencode::BString(vec![0xab; 20]));

        assert_eq!(
            Info::from(&Bencode::BDict(info)).unwrap_err(),
            FromInfoError::InvalidPieceLength
        );
    }

    #[test]
    fn test_from_info_wrong_digest_count() {
        let mut info = BTreeMap::new();
        info.insert(b"length".to_vec(), Bencode::BNumber(40000));
        info.insert(b"name".to_vec(), Bencode::BString(b"file.bin".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(16384));
        info.insert(b"pieces".to_vec(), Bencode::BString(vec![0xab; 20]));

        assert_eq!(
            Info::from(&Bencode::BDict(info)).unwrap_err(),
            FromInfoError::InvalidPieces
        );
    }

    #[test]
    fn test_real_piece_length() {
        let info = create_test_info(40000, 16384);

        assert_eq!(info.real_piece_length(0), 16384);
        assert_eq!(info.real_piece_length(1), 16384);
        assert_eq!(info.real_piece_length(2), 40000 - 2 * 16384);
    }

    #[test]
    fn test_piece_hash() {
        let mut pieces = vec![0x11; 20];
        pieces.extend(vec![0x22; 20]);
        let info = Info {
            name: "file.bin".to_string(),
            piece_length: 16384,
            pieces,
            files: vec![FileEntry {
                length: 20000,
                path: vec![],
            }],
        };

        assert_eq!(info.piece_hash(0), &[0x11; 20]);
        assert_eq!(info.piece_hash(1), &[0x22; 20]);
    }

    // Auxiliary functions

    fn create_test_info(length: u64, piece_length: u32) -> Info {
        let piece_count =
            ((length + u64::from(piece_length) - 1) / u64::from(piece_length)) as usize;
        Info {
            name: "file.bin".to_string(),
            piece_length,
            pieces: vec![0xab; piece_count * SHA1_DIGEST_LEN],
            files: vec![FileEntry {
                length,
                path: vec![],
            }],
        }
    }

    fn build_multi_file_bencode() -> Bencode {
        let mut file1 = BTreeMap::new();
        file1.insert(b"length".to_vec(), Bencode::BNumber(20000));
        file1.insert(
            b"path".to_vec(),
            Bencode::BList(vec![
                Bencode::BString(b"a".to_vec()),
                Bencode::BString(b"b.txt".to_vec()),
            ]),
        );

        let mut file2 = BTreeMap::new();
        file2.insert(b"length".to_vec(), Bencode::BNumber(20000));
        file2.insert(
            b"path".to_vec(),
            Bencode::BList(vec![Bencode::BString(b"c.txt".to_vec())]),
        );

        let mut info = BTreeMap::new();
        info.insert(
            b"files".to_vec(),
            Bencode::BList(vec![Bencode::BDict(file1), Bencode::BDict(file2)]),
        );
        info.insert(b"name".to_vec(), Bencode::BString(b"dir".to_vec()));
        info.insert(b"piece length".to_vec(), Bencode::BNumber(32768));
        info.insert(b"pieces".to_vec(), Bencode::BString(vec![0xab; 40]));

        Bencode::BDict(info)
    }
}
