//! Android key codes
//!
//! The executor only carries an integer through to `input keyevent`, so any
//! code the device understands can be sent. The names here cover the keys
//! worth typing on a command line.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a key name cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown key '{0}': use a key code number or a name such as DPAD_UP")]
pub struct ParseKeyError(pub String);

/// A platform key code as understood by `input keyevent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u32);

impl KeyCode {
    pub const HOME: KeyCode = KeyCode(3);
    pub const BACK: KeyCode = KeyCode(4);
    pub const DPAD_UP: KeyCode = KeyCode(19);
    pub const DPAD_DOWN: KeyCode = KeyCode(20);
    pub const DPAD_LEFT: KeyCode = KeyCode(21);
    pub const DPAD_RIGHT: KeyCode = KeyCode(22);
    pub const DPAD_CENTER: KeyCode = KeyCode(23);
    pub const VOLUME_UP: KeyCode = KeyCode(24);
    pub const VOLUME_DOWN: KeyCode = KeyCode(25);
    pub const POWER: KeyCode = KeyCode(26);
    pub const SPACE: KeyCode = KeyCode(62);
    pub const ENTER: KeyCode = KeyCode(66);
    pub const MEDIA_PLAY_PAUSE: KeyCode = KeyCode(85);

    const NAMED: &'static [(&'static str, KeyCode)] = &[
        ("HOME", KeyCode::HOME),
        ("BACK", KeyCode::BACK),
        ("DPAD_UP", KeyCode::DPAD_UP),
        ("DPAD_DOWN", KeyCode::DPAD_DOWN),
        ("DPAD_LEFT", KeyCode::DPAD_LEFT),
        ("DPAD_RIGHT", KeyCode::DPAD_RIGHT),
        ("DPAD_CENTER", KeyCode::DPAD_CENTER),
        ("VOLUME_UP", KeyCode::VOLUME_UP),
        ("VOLUME_DOWN", KeyCode::VOLUME_DOWN),
        ("POWER", KeyCode::POWER),
        ("SPACE", KeyCode::SPACE),
        ("ENTER", KeyCode::ENTER),
        ("MEDIA_PLAY_PAUSE", KeyCode::MEDIA_PLAY_PAUSE),
    ];

    pub fn code(self) -> u32 {
        self.0
    }

    /// Name of a well-known key code
    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(_, key)| *key == self)
            .map(|(name, _)| *name)
    }

    /// All named key codes
    pub fn named() -> impl Iterator<Item = (&'static str, KeyCode)> {
        Self::NAMED.iter().copied()
    }
}

impl FromStr for KeyCode {
    type Err = ParseKeyError;

    /// Accepts a decimal code, or a name with or without the `KEYCODE_`
    /// prefix in any case (`19`, `dpad_up`, `KEYCODE_DPAD_UP`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u32>() {
            return Ok(KeyCode(code));
        }

        let upper = trimmed.to_ascii_uppercase().replace('-', "_");
        let name = upper.strip_prefix("KEYCODE_").unwrap_or(&upper);

        Self::NAMED
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, key)| *key)
            .ok_or_else(|| ParseKeyError(s.to_string()))
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<u32> for KeyCode {
    fn from(code: u32) -> Self {
        KeyCode(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers_and_names() {
        assert_eq!("19".parse::<KeyCode>().unwrap(), KeyCode::DPAD_UP);
        assert_eq!("dpad_down".parse::<KeyCode>().unwrap(), KeyCode::DPAD_DOWN);
        assert_eq!("KEYCODE_DPAD_LEFT".parse::<KeyCode>().unwrap(), KeyCode::DPAD_LEFT);
        assert_eq!("dpad-right".parse::<KeyCode>().unwrap(), KeyCode::DPAD_RIGHT);
        assert_eq!("1234".parse::<KeyCode>().unwrap(), KeyCode(1234));
    }

    #[test]
    fn test_parse_unknown() {
        let err = "jump".parse::<KeyCode>().unwrap_err();
        assert_eq!(err, ParseKeyError("jump".to_string()));
        assert!("-1".parse::<KeyCode>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyCode::ENTER.to_string(), "ENTER (66)");
        assert_eq!(KeyCode(300).to_string(), "300");
    }

    #[test]
    fn test_named_codes_are_unique() {
        let mut codes: Vec<u32> = KeyCode::named().map(|(_, key)| key.code()).collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total);
    }
}
