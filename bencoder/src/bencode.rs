use std::collections::BTreeMap;
use std::ops::Range;

/// One bencoded value, as found in metainfo files and HTTP tracker
/// responses.
///
/// Strings are kept as raw bytes: piece digests and compact peer lists are
/// binary, and torrent names only become UTF-8 at the callers that need
/// text.
#[derive(Debug, Clone, PartialEq)]
pub enum Bencode {
    BNumber(i64),
    BString(Vec<u8>),
    BList(Vec<Bencode>),
    BDict(BTreeMap<Vec<u8>, Bencode>),
}

/// Possible decoding errors.
#[derive(Debug, PartialEq)]
pub enum BencodeError {
    /// The input ended in the middle of a value.
    UnexpectedEnd,
    /// A byte that cannot start a bencoded value.
    UnknownPrefix(u8),
    InvalidNumber,
    InvalidStringLength,
    /// Dict keys must be strings.
    NonStringKey,
}

impl Bencode {
    /// Decodes the first value in `data`; trailing bytes are left alone.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bencoder::bencode::Bencode;
    ///
    /// let decoded = Bencode::decode(b"d8:announce18:udp://tracker:6969e").unwrap();
    ///
    /// match decoded {
    ///     Bencode::BDict(dict) => assert!(dict.contains_key(b"announce".as_slice())),
    ///     _ => unreachable!(),
    /// }
    /// ```
    pub fn decode(data: &[u8]) -> Result<Bencode, BencodeError> {
        Parser::new(data).value()
    }

    /// Decodes the first value and reports how many bytes it occupied, so
    /// callers can walk a stream of concatenated values.
    pub fn decode_prefix(data: &[u8]) -> Result<(Bencode, usize), BencodeError> {
        let mut parser = Parser::new(data);
        let value = parser.value()?;
        Ok((value, parser.pos))
    }

    /// Locates the raw byte range of the value stored under `key` in a
    /// top-level dict, without copying or re-encoding anything.
    ///
    /// A torrent's swarm id is the SHA-1 of the `info` dict exactly as it
    /// sits in the file. Re-encoding the parsed dict would silently
    /// canonicalize any oddly-ordered input and change the hash, so the
    /// span has to come from the original bytes.
    pub fn dict_value_span(data: &[u8], key: &[u8]) -> Result<Option<Range<usize>>, BencodeError> {
        let mut parser = Parser::new(data);
        match parser.peek() {
            Some(b'd') => parser.pos += 1,
            Some(other) => return Err(BencodeError::UnknownPrefix(other)),
            None => return Err(BencodeError::UnexpectedEnd),
        }

        while !parser.take(b'e') {
            if parser.peek().is_none() {
                return Err(BencodeError::UnexpectedEnd);
            }
            let entry_key = match parser.value()? {
                Bencode::BString(entry_key) => entry_key,
                _ => return Err(BencodeError::NonStringKey),
            };
            let value_start = parser.pos;
            parser.value()?;
            if entry_key == key {
                return Ok(Some(value_start..parser.pos));
            }
        }
        Ok(None)
    }

    /// Serializes the value. Dict keys come out sorted, as the format
    /// demands.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Bencode::BNumber(number) => {
                out.push(b'i');
                out.extend(number.to_string().into_bytes());
                out.push(b'e');
            }
            Bencode::BString(bytes) => {
                write_string(bytes, out);
            }
            Bencode::BList(values) => {
                out.push(b'l');
                for value in values {
                    value.write(out);
                }
                out.push(b'e');
            }
            Bencode::BDict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    write_string(key, out);
                    value.write(out);
                }
                out.push(b'e');
            }
        }
    }
}

fn write_string(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend(bytes.len().to_string().into_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

/// Cursor over the input. Every helper leaves `pos` just past what it
/// consumed, which is what makes the span bookkeeping above possible.
struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Consumes the next byte when it matches.
    fn take(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consumes bytes up to (and including) `terminator`, returning the
    /// bytes before it.
    fn until(&mut self, terminator: u8) -> Result<&'a [u8], BencodeError> {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(byte) if byte == terminator => {
                    let span = &self.data[start..self.pos];
                    self.pos += 1;
                    return Ok(span);
                }
                Some(_) => self.pos += 1,
                None => return Err(BencodeError::UnexpectedEnd),
            }
        }
    }

    fn value(&mut self) -> Result<Bencode, BencodeError> {
        match self.peek() {
            Some(b'i') => self.number(),
            Some(b'l') => self.list(),
            Some(b'd') => self.dict(),
            Some(b'0'..=b'9') => Ok(Bencode::BString(self.string()?)),
            Some(other) => Err(BencodeError::UnknownPrefix(other)),
            None => Err(BencodeError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<Bencode, BencodeError> {
        self.pos += 1; // 'i'
        let digits = self.until(b'e')?;
        let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidNumber)?;
        let number = text.parse().map_err(|_| BencodeError::InvalidNumber)?;
        Ok(Bencode::BNumber(number))
    }

    fn string(&mut self) -> Result<Vec<u8>, BencodeError> {
        let digits = self.until(b':')?;
        let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidStringLength)?;
        let length: usize = text
            .parse()
            .map_err(|_| BencodeError::InvalidStringLength)?;

        let start = self.pos;
        let end = start
            .checked_add(length)
            .ok_or(BencodeError::InvalidStringLength)?;
        if end > self.data.len() {
            return Err(BencodeError::UnexpectedEnd);
        }
        self.pos = end;
        Ok(self.data[start..end].to_vec())
    }

    fn list(&mut self) -> Result<Bencode, BencodeError> {
        self.pos += 1; // 'l'
        let mut values = Vec::new();
        while !self.take(b'e') {
            if self.peek().is_none() {
                return Err(BencodeError::UnexpectedEnd);
            }
            values.push(self.value()?);
        }
        Ok(Bencode::BList(values))
    }

    fn dict(&mut self) -> Result<Bencode, BencodeError> {
        self.pos += 1; // 'd'
        let mut entries = BTreeMap::new();
        while !self.take(b'e') {
            if self.peek().is_none() {
                return Err(BencodeError::UnexpectedEnd);
            }
            let key = match self.value()? {
                Bencode::BString(key) => key,
                _ => return Err(BencodeError::NonStringKey),
            };
            let value = self.value()?;
            entries.insert(key, value);
        }
        Ok(Bencode::BDict(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_metainfo_shaped_dict() {
        let data = b"d8:announce18:udp://tracker:69694:infod6:lengthi1024e12:piece lengthi16384eee";

        let decoded = Bencode::decode(data).unwrap();

        let dict = match decoded {
            Bencode::BDict(dict) => dict,
            other => panic!("expected a dict, got {:?}", other),
        };
        assert_eq!(
            dict.get(b"announce".as_slice()),
            Some(&Bencode::BString(b"udp://tracker:6969".to_vec()))
        );
        match dict.get(b"info".as_slice()) {
            Some(Bencode::BDict(info)) => {
                assert_eq!(info.get(b"length".as_slice()), Some(&Bencode::BNumber(1024)));
            }
            other => panic!("expected the info dict, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_binary_string_survives() {
        // piece digests are raw bytes, not text
        let mut data = b"24:".to_vec();
        let digestish: Vec<u8> = (0..24).map(|i| 0xe0 + i).collect();
        data.extend_from_slice(&digestish);

        assert_eq!(
            Bencode::decode(&data).unwrap(),
            Bencode::BString(digestish)
        );
    }

    #[test]
    fn test_decode_negative_number() {
        assert_eq!(Bencode::decode(b"i-42e").unwrap(), Bencode::BNumber(-42));
    }

    #[test]
    fn test_decode_truncated_inputs_fail() {
        assert_eq!(Bencode::decode(b""), Err(BencodeError::UnexpectedEnd));
        assert_eq!(Bencode::decode(b"i42"), Err(BencodeError::UnexpectedEnd));
        assert_eq!(Bencode::decode(b"10:short"), Err(BencodeError::UnexpectedEnd));
        assert_eq!(
            Bencode::decode(b"l4:spam"),
            Err(BencodeError::UnexpectedEnd)
        );
        assert_eq!(
            Bencode::decode(b"d3:key"),
            Err(BencodeError::UnexpectedEnd)
        );
    }

    #[test]
    fn test_decode_unknown_prefix() {
        assert_eq!(
            Bencode::decode(b"x123"),
            Err(BencodeError::UnknownPrefix(b'x'))
        );
    }

    #[test]
    fn test_decode_rejects_non_string_key() {
        assert_eq!(
            Bencode::decode(b"di1e4:spame"),
            Err(BencodeError::NonStringKey)
        );
    }

    #[test]
    fn test_decode_rejects_malformed_number() {
        assert_eq!(
            Bencode::decode(b"i4x2e"),
            Err(BencodeError::InvalidNumber)
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(
            Bencode::decode(b"i7etrailing-junk").unwrap(),
            Bencode::BNumber(7)
        );
    }

    #[test]
    fn test_decode_prefix_walks_concatenated_values() {
        let data = b"4:spami42ele";

        let (first, consumed) = Bencode::decode_prefix(data).unwrap();
        assert_eq!(first, Bencode::BString(b"spam".to_vec()));

        let (second, consumed_next) = Bencode::decode_prefix(&data[consumed..]).unwrap();
        assert_eq!(second, Bencode::BNumber(42));

        let (third, _) = Bencode::decode_prefix(&data[consumed + consumed_next..]).unwrap();
        assert_eq!(third, Bencode::BList(vec![]));
    }

    #[test]
    fn test_dict_value_span_returns_the_raw_bytes() {
        let data = b"d3:fooi42e4:infod6:lengthi5ee3:zzz1:ze";

        let span = Bencode::dict_value_span(data, b"info").unwrap().unwrap();

        assert_eq!(&data[span], b"d6:lengthi5ee");
    }

    #[test]
    fn test_dict_value_span_missing_key() {
        let data = b"d3:fooi42ee";

        assert_eq!(Bencode::dict_value_span(data, b"info").unwrap(), None);
    }

    #[test]
    fn test_dict_value_span_rejects_non_dict() {
        assert_eq!(
            Bencode::dict_value_span(b"l3:fooe", b"info"),
            Err(BencodeError::UnknownPrefix(b'l'))
        );
    }

    #[test]
    fn test_encode_sorts_dict_keys() {
        let mut dict = BTreeMap::new();
        dict.insert(b"zzz".to_vec(), Bencode::BNumber(1));
        dict.insert(b"aaa".to_vec(), Bencode::BString(b"first".to_vec()));

        assert_eq!(Bencode::BDict(dict).encode(), b"d3:aaa5:first3:zzzi1ee");
    }

    #[test]
    fn test_encode_decode_round_trip_of_a_tracker_response() {
        let mut dict = BTreeMap::new();
        dict.insert(b"interval".to_vec(), Bencode::BNumber(1800));
        dict.insert(
            b"peers".to_vec(),
            Bencode::BString(vec![127, 0, 0, 1, 0x1a, 0xe1]),
        );
        let value = Bencode::BDict(dict);

        assert_eq!(Bencode::decode(&value.encode()).unwrap(), value);
    }
}
