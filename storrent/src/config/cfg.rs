use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::str::FromStr;

use super::constants;

/// `Cfg` struct containing the config file information, previously created
/// with `Cfg::new`.
///
/// - `tcp_port`: port to listen on for incoming peer connections,
/// - `download_directory`: directory where downloaded content is stored,
/// - `pipelining_size`: number of block requests kept in flight per peer,
/// - `max_outbound_peers`: cap on peers we dial per torrent,
/// - `unchoke_slots`: number of peers unchoked by throughput ranking,
/// - `endgame_threshold`: remaining-piece count at which endgame starts,
///
/// Every setting has a default, so an empty file is a valid config.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub tcp_port: u16,
    pub download_directory: String,
    pub pipelining_size: u32,
    pub max_outbound_peers: u32,
    pub unchoke_slots: u32,
    pub endgame_threshold: u32,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            tcp_port: constants::DEFAULT_TCP_PORT,
            download_directory: constants::DEFAULT_DOWNLOAD_DIRECTORY.to_string(),
            pipelining_size: constants::DEFAULT_PIPELINING_SIZE,
            max_outbound_peers: constants::DEFAULT_MAX_OUTBOUND_PEERS,
            unchoke_slots: constants::DEFAULT_UNCHOKE_SLOTS,
            endgame_threshold: constants::DEFAULT_ENDGAME_THRESHOLD,
        }
    }
}

impl Cfg {
    /// Builds a Cfg struct containing the config file information by the given path.
    /// The format of the config file must be: {config_name}={config_value} (without brackets).
    /// In case of success it returns a Cfg struct.
    ///
    /// It returns an io::Error if:
    /// - The path to the config file does not exist or could not be open/read.
    /// - The config file has wrong format.
    /// - A wrong config_name was in the config file.
    /// - A numeric setting is not a valid number in the config file.
    pub fn new(path: &str) -> io::Result<Self> {
        let mut cfg = Self::default();

        let file = File::open(path)?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let current_line = line?;
            if current_line.is_empty() {
                continue;
            }
            let setting: Vec<&str> = current_line.split('=').collect();

            if setting.len() != 2 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid config input: {}", current_line),
                ));
            }
            cfg = Self::load_setting(cfg, setting[0], setting[1])?;
        }
        Ok(cfg)
    }

    fn load_setting(mut self, name: &str, value: &str) -> io::Result<Self> {
        match name {
            constants::TCP_PORT => {
                self.tcp_port = self.parse_value(value, constants::TCP_PORT)?;
            }
            constants::DOWNLOAD_DIRECTORY => self.download_directory = String::from(value),

            constants::PIPELINING_SIZE => {
                self.pipelining_size = self.parse_value(value, constants::PIPELINING_SIZE)?;
            }

            constants::MAX_OUTBOUND_PEERS => {
                self.max_outbound_peers = self.parse_value(value, constants::MAX_OUTBOUND_PEERS)?;
            }

            constants::UNCHOKE_SLOTS => {
                self.unchoke_slots = self.parse_value(value, constants::UNCHOKE_SLOTS)?;
            }

            constants::ENDGAME_THRESHOLD => {
                self.endgame_threshold = self.parse_value(value, constants::ENDGAME_THRESHOLD)?;
            }

            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid config setting name: {}", name),
                ))
            }
        }
        Ok(self)
    }

    fn parse_value<F>(&self, value: &str, setting: &str) -> io::Result<F>
    where
        F: FromStr,
    {
        match value.parse::<F>() {
            Err(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Invalid setting: {}, is not a valid type: {}",
                    setting, value
                ),
            )),
            Ok(parsed) => Ok(parsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Write};

    #[test]
    fn test_good_config() {
        let path = "./test_good_config.cfg";
        let contents = b"TCP_PORT=1000\nDOWNLOAD_DIRECTORY=./download\nPIPELINING_SIZE=5\nMAX_OUTBOUND_PEERS=30\nUNCHOKE_SLOTS=6\nENDGAME_THRESHOLD=12";
        create_and_write_file(path, contents);

        let config = Cfg::new(path).unwrap();

        assert_eq!(config.tcp_port, 1000);
        assert_eq!(config.download_directory, "./download");
        assert_eq!(config.pipelining_size, 5);
        assert_eq!(config.max_outbound_peers, 30);
        assert_eq!(config.unchoke_slots, 6);
        assert_eq!(config.endgame_threshold, 12);

        remove_file(path);
    }

    #[test]
    fn test_bad_path() {
        let path = "bad path";
        let config = Cfg::new(path);
        assert!(config.is_err());
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let path = "./test_empty_file.cfg";
        create_and_write_file(path, b"");

        let config = Cfg::new(path).unwrap();

        assert_eq!(config.tcp_port, constants::DEFAULT_TCP_PORT);
        assert_eq!(config.pipelining_size, constants::DEFAULT_PIPELINING_SIZE);
        remove_file(path);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let path = "./test_partial_config.cfg";
        create_and_write_file(path, b"TCP_PORT=2500");

        let config = Cfg::new(path).unwrap();

        assert_eq!(config.tcp_port, 2500);
        assert_eq!(
            config.download_directory,
            constants::DEFAULT_DOWNLOAD_DIRECTORY
        );
        remove_file(path);
    }

    #[test]
    fn test_setting_doesnt_exist() {
        let path = "./test_setting_doesnt_exist.cfg";
        create_and_write_file(path, b"WRONG_SETTING=1000");

        assert!(Cfg::new(path).is_err());
        remove_file(path);
    }

    #[test]
    fn test_tcp_port_not_a_number() {
        let path = "./test_tcp_port_not_a_number.cfg";
        create_and_write_file(path, b"TCP_PORT=abcd");

        assert!(Cfg::new(path).is_err());
        remove_file(path);
    }

    #[test]
    fn test_bad_format() {
        let path = "./test_bad_format.cfg";
        create_and_write_file(path, b"TCP_PORT=abcd=1234");

        assert!(Cfg::new(path).is_err());
        remove_file(path);
    }

    // Auxiliary functions

    fn create_and_write_file(path: &str, contents: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents).unwrap();
    }

    fn remove_file(path: &str) {
        fs::remove_file(path).unwrap();
    }
}
