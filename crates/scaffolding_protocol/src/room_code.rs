//! The `U/AAAA-BBBB-CCCC-DDDD` room-code codec.
//!
//! A room code carries everything a guest needs to join a session: the first
//! two groups name the overlay network, the last two are its shared secret.
//! The 16 payload symbols, read as a little-endian base-34 integer, must be
//! divisible by 7.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use thiserror::Error;

/// The 34-symbol room-code alphabet. `I` and `O` are excluded so codes
/// survive being read aloud or copied by hand.
pub const ALPHABET: &[u8; 34] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Prefix of the overlay network name derived from a room code.
pub const NETWORK_NAME_PREFIX: &str = "scaffolding-mc-";

const PAYLOAD_LEN: usize = 19; // "AAAA-BBBB-CCCC-DDDD"
const GROUPS: usize = 4;
const GROUP_WIDTH: usize = 4;

/// A validated room code in canonical `U/AAAA-BBBB-CCCC-DDDD` form.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct RoomCode(String);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum RoomCodeError {
    #[error("room code is empty")]
    Empty,
    #[error("room code must start with `U/`")]
    BadPrefix,
    #[error("room code payload must be {PAYLOAD_LEN} characters long")]
    BadLength,
    #[error("room code must have four dash-separated groups")]
    BadDash,
    #[error("room code groups must be four symbols wide")]
    BadPart,
    #[error("`{0}` is not a room code symbol")]
    BadChar(char),
    #[error("room code checksum mismatch")]
    BadChecksum,
}

impl RoomCode {
    /// Generates a fresh random room code whose checksum holds.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut symbols = [0u8; 16];
        for s in &mut symbols {
            *s = rng.gen_range(0..ALPHABET.len() as u8);
        }

        // 34^15 is coprime to 7, so stepping the final symbol walks every
        // residue class; at most six steps reach checksum zero.
        while checksum_mod7(&symbols) != 0 {
            symbols[15] = (symbols[15] + 1) % ALPHABET.len() as u8;
        }

        let mut out = String::with_capacity(2 + PAYLOAD_LEN);
        out.push_str("U/");
        for (i, &s) in symbols.iter().enumerate() {
            if i > 0 && i % GROUP_WIDTH == 0 {
                out.push('-');
            }
            out.push(ALPHABET[s as usize] as char);
        }

        Self(out)
    }

    /// Validates `s` and returns it in canonical form.
    pub fn parse(s: &str) -> Result<Self, RoomCodeError> {
        if s.is_empty() {
            return Err(RoomCodeError::Empty);
        }

        let payload = s.strip_prefix("U/").ok_or(RoomCodeError::BadPrefix)?;

        if payload.len() != PAYLOAD_LEN {
            return Err(RoomCodeError::BadLength);
        }

        let groups: Vec<&str> = payload.split('-').collect();
        if groups.len() != GROUPS {
            return Err(RoomCodeError::BadDash);
        }
        if groups.iter().any(|g| g.len() != GROUP_WIDTH) {
            return Err(RoomCodeError::BadPart);
        }

        let mut symbols = [0u8; 16];
        for (i, ch) in groups.iter().flat_map(|g| g.chars()).enumerate() {
            symbols[i] = symbol_value(ch).ok_or(RoomCodeError::BadChar(ch))?;
        }

        if checksum_mod7(&symbols) != 0 {
            return Err(RoomCodeError::BadChecksum);
        }

        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Overlay network name: `scaffolding-mc-AAAA-BBBB`.
    pub fn network_name(&self) -> String {
        format!("{NETWORK_NAME_PREFIX}{}-{}", self.group(0), self.group(1))
    }

    /// Overlay network secret: `CCCC-DDDD`.
    pub fn network_secret(&self) -> String {
        format!("{}-{}", self.group(2), self.group(3))
    }

    fn group(&self, n: usize) -> &str {
        let start = 2 + n * (GROUP_WIDTH + 1);
        &self.0[start..start + GROUP_WIDTH]
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Little-endian base-34 value of `symbols`, reduced mod 7. Accumulating
/// `(mod + v*pow) % 7` keeps everything in `u32` instead of a big integer.
fn checksum_mod7(symbols: &[u8; 16]) -> u32 {
    let mut acc = 0u32;
    let mut pow = 1u32;
    for &v in symbols {
        acc = (acc + u32::from(v) * pow) % 7;
        pow = pow * 34 % 7;
    }
    acc
}

fn symbol_value(ch: char) -> Option<u8> {
    ALPHABET
        .iter()
        .position(|&a| a == ch as u8)
        .map(|i| i as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_parse_round_trip() {
        for _ in 0..1_000 {
            let code = RoomCode::generate();
            let parsed = RoomCode::parse(code.as_str()).unwrap();
            assert_eq!(code, parsed);
        }
    }

    #[test]
    fn generated_codes_pass_checksum() {
        for _ in 0..1_000 {
            let code = RoomCode::generate();
            let payload: Vec<u8> = code
                .as_str()
                .chars()
                .skip(2)
                .filter(|&c| c != '-')
                .map(|c| symbol_value(c).unwrap())
                .collect();
            let symbols: [u8; 16] = payload.try_into().unwrap();
            assert_eq!(checksum_mod7(&symbols), 0);
        }
    }

    #[test]
    fn parse_corpus() {
        assert_eq!(RoomCode::parse(""), Err(RoomCodeError::Empty));
        assert_eq!(
            RoomCode::parse("X/AAAA-BBBB-CCCC-DDDD"),
            Err(RoomCodeError::BadPrefix)
        );
        assert_eq!(
            RoomCode::parse("U/AAAA-BBBB-CCCC"),
            Err(RoomCodeError::BadLength)
        );
        assert_eq!(
            RoomCode::parse("U/AAAA BBBB-CCCC-DDDD"),
            Err(RoomCodeError::BadDash)
        );
        assert_eq!(
            RoomCode::parse("U/AAA-ABBBB-CCCC-DDDD"),
            Err(RoomCodeError::BadPart)
        );
        assert_eq!(
            RoomCode::parse("U/IAAA-BBBB-CCCC-DDDD"),
            Err(RoomCodeError::BadChar('I'))
        );
        assert_eq!(
            RoomCode::parse("U/OAAA-BBBB-CCCC-DDDD"),
            Err(RoomCodeError::BadChar('O'))
        );
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        // Take a valid code and step the first symbol once; 34^0 = 1 is
        // coprime to 7, so the checksum must break.
        let code = RoomCode::generate();
        let mut chars: Vec<char> = code.as_str().chars().collect();
        let v = symbol_value(chars[2]).unwrap();
        chars[2] = ALPHABET[(v as usize + 1) % ALPHABET.len()] as char;
        let tampered: String = chars.into_iter().collect();
        assert_eq!(
            RoomCode::parse(&tampered),
            Err(RoomCodeError::BadChecksum)
        );
    }

    #[test]
    fn derived_network_identity() {
        let code = RoomCode::parse("U/0000-0000-0000-0000").unwrap();
        assert_eq!(code.network_name(), "scaffolding-mc-0000-0000");
        assert_eq!(code.network_secret(), "0000-0000");

        let code = RoomCode::generate();
        let name = code.network_name();
        assert!(name.starts_with(NETWORK_NAME_PREFIX));
        assert_eq!(name.len(), NETWORK_NAME_PREFIX.len() + 9);
        assert_eq!(code.network_secret().len(), 9);
    }

    #[test]
    fn from_str_matches_parse() {
        let code = RoomCode::generate();
        let via_from_str: RoomCode = code.as_str().parse().unwrap();
        assert_eq!(code, via_from_str);
    }
}
