use sha1::{Digest, Sha1};

use bencoder::bencode::{Bencode, BencodeError};

use super::info::{FromInfoError, Info};

/// Parsed metainfo of a torrent, immutable after load.
///
/// `announce_tiers` follows BEP 12: an ordered list of tiers, each holding
/// equivalent tracker URLs. A plain `announce` key becomes one single-URL
/// tier. `info_hash` is the SHA-1 of the `info` dict exactly as it appeared
/// in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    pub announce_tiers: Vec<Vec<String>>,
    pub info: Info,
    pub info_hash: [u8; 20],
}

/// Possible `Torrent` parsing errors.
#[derive(Debug, PartialEq)]
pub enum FromTorrentError {
    MissingAnnounce,
    MissingInfo,
    FromInfoError(FromInfoError),
    InvalidBencode(BencodeError),
    NotADict,
}

impl Torrent {
    /// Builds a new `Torrent` from the raw bytes of a metainfo file.
    ///
    /// It returns a `FromTorrentError` if:
    /// - The file is not a bencoded dict.
    /// - Neither `announce` nor `announce-list` is present.
    /// - The `info` dict is missing or malformed.
    pub fn from_bytes(data: &[u8]) -> Result<Torrent, FromTorrentError> {
        let bencode = Bencode::decode(data).map_err(FromTorrentError::InvalidBencode)?;

        let d = match &bencode {
            Bencode::BDict(d) => d,
            _ => return Err(FromTorrentError::NotADict),
        };

        let mut announce = None;
        let mut announce_list = None;
        let mut info = None;

        for (k, v) in d.iter() {
            if k == b"announce" {
                announce = Some(Self::create_announce(v)?);
            } else if k == b"announce-list" {
                announce_list = Self::create_announce_list(v);
            } else if k == b"info" {
                info = Some(Info::from(v).map_err(FromTorrentError::FromInfoError)?);
            }
        }

        let announce_tiers = match (announce_list, announce) {
            (Some(tiers), _) if !tiers.is_empty() => tiers,
            (_, Some(url)) => vec![vec![url]],
            _ => return Err(FromTorrentError::MissingAnnounce),
        };

        let info = info.ok_or(FromTorrentError::MissingInfo)?;
        let info_hash = Self::create_info_hash(data)?;

        Ok(Torrent {
            announce_tiers,
            info,
            info_hash,
        })
    }

    /// Hashes the raw `info` dict span of the metainfo file.
    fn create_info_hash(data: &[u8]) -> Result<[u8; 20], FromTorrentError> {
        let span = Bencode::dict_value_span(data, b"info")
            .map_err(FromTorrentError::InvalidBencode)?
            .ok_or(FromTorrentError::MissingInfo)?;

        let digest = Sha1::digest(&data[span]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&digest);
        Ok(info_hash)
    }

    fn create_announce(bencode: &Bencode) -> Result<String, FromTorrentError> {
        let announce_url = match bencode {
            Bencode::BString(s) => s,
            _ => return Err(FromTorrentError::MissingAnnounce),
        };

        String::from_utf8(announce_url.to_vec()).map_err(|_| FromTorrentError::MissingAnnounce)
    }

    /// A malformed `announce-list` is ignored so the plain `announce` key can
    /// still be used.
    fn create_announce_list(bencode: &Bencode) -> Option<Vec<Vec<String>>> {
        let tiers = match bencode {
            Bencode::BList(l) => l,
            _ => return None,
        };

        let mut announce_tiers = Vec::with_capacity(tiers.len());
        for tier in tiers {
            let urls = match tier {
                Bencode::BList(urls) => urls,
                _ => return None,
            };
            let mut tier_urls = Vec::with_capacity(urls.len());
            for url in urls {
                match url {
                    Bencode::BString(s) => tier_urls.push(String::from_utf8(s.to_vec()).ok()?),
                    _ => return None,
                }
            }
            if !tier_urls.is_empty() {
                announce_tiers.push(tier_urls);
            }
        }
        Some(announce_tiers)
    }

    /// Returns the name of the torrent.
    pub fn name(&self) -> String {
        self.info.name.clone()
    }

    /// Returns the nominal piece size of the torrent.
    pub fn piece_length(&self) -> u32 {
        self.info.piece_length
    }

    /// Returns the total content length in bytes.
    pub fn total_length(&self) -> u64 {
        self.info.total_length()
    }

    /// Returns the number of pieces of the torrent.
    pub fn total_pieces(&self) -> u32 {
        self.info.piece_count()
    }

    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }
}
