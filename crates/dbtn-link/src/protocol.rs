//! Device wire protocol
//!
//! Plain text, one command per line, case-sensitive.
//!
//! | Direction | Command |
//! |-----------|---------|
//! | host → device | `PING`, `PLAYSOUND <1-255>`, `SETVOLUME <0-30>` |
//! | device → host | `PONG`, `BUTTONPRESS`, `BUTTONRELEASE` |

use std::fmt;

pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const BUTTON_PRESS: &str = "BUTTONPRESS";
pub const BUTTON_RELEASE: &str = "BUTTONRELEASE";

pub const MIN_SOUND_ID: u8 = 1;
pub const MAX_SOUND_ID: u8 = 255;
pub const MAX_VOLUME: u8 = 30;

/// A line received from the device, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    ButtonPress,
    ButtonRelease,
    Pong,
    /// Anything else the firmware prints (boot banners, debug output)
    Unknown(String),
}

impl InboundCommand {
    /// Classify an already-framed line.
    ///
    /// Button events match by prefix since some firmware revisions append
    /// a payload; the probe reply must match exactly.
    pub fn parse(line: &str) -> Self {
        if line.starts_with(BUTTON_PRESS) {
            InboundCommand::ButtonPress
        } else if line.starts_with(BUTTON_RELEASE) {
            InboundCommand::ButtonRelease
        } else if line == PONG {
            InboundCommand::Pong
        } else {
            InboundCommand::Unknown(line.to_string())
        }
    }
}

/// A command written to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundCommand {
    Ping,
    PlaySound(u8),
    SetVolume(u8),
}

impl OutboundCommand {
    /// `PLAYSOUND` for a configured sound identifier such as `"0003"`.
    ///
    /// Returns `None` when the id is not a number in 1..=255.
    pub fn play_sound(sound_id: &str) -> Option<Self> {
        let id: u16 = sound_id.trim().parse().ok()?;
        if id < MIN_SOUND_ID as u16 || id > MAX_SOUND_ID as u16 {
            return None;
        }
        Some(OutboundCommand::PlaySound(id as u8))
    }

    /// `SETVOLUME`, or `None` when the level is above the device maximum
    pub fn set_volume(level: u8) -> Option<Self> {
        (level <= MAX_VOLUME).then_some(OutboundCommand::SetVolume(level))
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundCommand::Ping => f.write_str(PING),
            OutboundCommand::PlaySound(id) => write!(f, "PLAYSOUND {}", id),
            OutboundCommand::SetVolume(level) => write!(f, "SETVOLUME {}", level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vocabulary() {
        assert_eq!(InboundCommand::parse("BUTTONPRESS"), InboundCommand::ButtonPress);
        assert_eq!(
            InboundCommand::parse("BUTTONRELEASE"),
            InboundCommand::ButtonRelease
        );
        assert_eq!(InboundCommand::parse("PONG"), InboundCommand::Pong);
    }

    #[test]
    fn test_parse_button_prefix_with_payload() {
        assert_eq!(
            InboundCommand::parse("BUTTONRELEASE 1"),
            InboundCommand::ButtonRelease
        );
        assert_eq!(
            InboundCommand::parse("BUTTONPRESS:long"),
            InboundCommand::ButtonPress
        );
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(
            InboundCommand::parse("pong"),
            InboundCommand::Unknown("pong".to_string())
        );
        assert_eq!(
            InboundCommand::parse("PONG!"),
            InboundCommand::Unknown("PONG!".to_string())
        );
        assert!(matches!(
            InboundCommand::parse("buttonrelease"),
            InboundCommand::Unknown(_)
        ));
    }

    #[test]
    fn test_play_sound_parses_padded_ids() {
        assert_eq!(
            OutboundCommand::play_sound("0003"),
            Some(OutboundCommand::PlaySound(3))
        );
        assert_eq!(
            OutboundCommand::play_sound("255"),
            Some(OutboundCommand::PlaySound(255))
        );
    }

    #[test]
    fn test_play_sound_rejects_out_of_range() {
        assert_eq!(OutboundCommand::play_sound("0"), None);
        assert_eq!(OutboundCommand::play_sound("256"), None);
        assert_eq!(OutboundCommand::play_sound("abc"), None);
        assert_eq!(OutboundCommand::play_sound(""), None);
        assert_eq!(OutboundCommand::play_sound("-4"), None);
    }

    #[test]
    fn test_set_volume_bounds() {
        assert_eq!(
            OutboundCommand::set_volume(0),
            Some(OutboundCommand::SetVolume(0))
        );
        assert_eq!(
            OutboundCommand::set_volume(30),
            Some(OutboundCommand::SetVolume(30))
        );
        assert_eq!(OutboundCommand::set_volume(31), None);
    }

    #[test]
    fn test_outbound_wire_format() {
        assert_eq!(OutboundCommand::Ping.to_string(), "PING");
        assert_eq!(OutboundCommand::PlaySound(12).to_string(), "PLAYSOUND 12");
        assert_eq!(OutboundCommand::SetVolume(20).to_string(), "SETVOLUME 20");
    }
}
