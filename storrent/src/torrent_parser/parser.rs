use std::{
    fs::File,
    io::{BufReader, Error, Read},
    path::Path,
};

use super::torrent::{FromTorrentError, Torrent};

#[derive(Debug)]
pub enum ParseError {
    IoError(Error),
    FromTorrentError(FromTorrentError),
}

pub struct TorrentParser;

impl TorrentParser {
    /// Given a path to a torrent file, it parses the file and returns a Torrent struct.
    ///
    /// # Errors
    ///
    /// * `ParseError::IoError` - An error occurred while reading the file
    /// * `ParseError::FromTorrentError` - An error occurred while creating the Torrent struct
    pub fn parse(filepath: &Path) -> Result<Torrent, ParseError> {
        let buffer = Self::read_file(filepath).map_err(ParseError::IoError)?;
        Torrent::from_bytes(&buffer).map_err(ParseError::FromTorrentError)
    }

    fn read_file(filepath: &Path) -> Result<Vec<u8>, Error> {
        let file = File::open(filepath)?;
        let mut reader = BufReader::new(file);
        let mut buffer = Vec::new();

        reader.read_to_end(&mut buffer)?;

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Write, path::PathBuf};

    #[test]
    fn test_parse_torrent() {
        let filepath = PathBuf::from("./test_parse_torrent.torrent");
        let mut contents =
            b"d8:announce26:udp://tracker.example:69694:infod6:lengthi1024e4:name8:file.bin12:piece lengthi16384e6:pieces20:"
                .to_vec();
        contents.extend_from_slice(&[0xab; 20]);
        contents.extend_from_slice(b"ee");
        create_and_write_file(&filepath, &contents);

        let torrent = match TorrentParser::parse(&filepath) {
            Ok(torrent) => torrent,
            Err(e) => {
                remove_file(&filepath);
                panic!("{:?}", e);
            }
        };
        remove_file(&filepath);

        assert_eq!(
            torrent.announce_tiers,
            vec![vec!["udp://tracker.example:6969".to_string()]]
        );
        assert_eq!(torrent.total_length(), 1024);
        assert_eq!(torrent.info.name, "file.bin");
        assert_eq!(torrent.info.piece_length, 16384);
    }

    #[test]
    fn test_parse_missing_file() {
        let filepath = PathBuf::from("./no_such_file.torrent");
        assert!(matches!(
            TorrentParser::parse(&filepath),
            Err(ParseError::IoError(_))
        ));
    }

    fn create_and_write_file(path: &Path, contents: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents).unwrap();
    }

    fn remove_file(path: &Path) {
        fs::remove_file(path).unwrap();
    }
}
