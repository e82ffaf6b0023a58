//! Container detection for uploaded audio.
//!
//! Uploads are staged under an audio extension before the decoder sees them.
//! Rather than trusting the client's filename or content type, the leading
//! bytes are inspected. Anything unrecognised keeps the configured default
//! suffix and is left for the decoder to accept or reject.

/// Containers the decoder is built to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Aac,
    Flac,
    Ogg,
    Mp4,
    WebM,
}

impl AudioFormat {
    /// Identify the container from its first bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            return Some(AudioFormat::Wav);
        }
        if bytes.starts_with(b"fLaC") {
            return Some(AudioFormat::Flac);
        }
        if bytes.starts_with(b"OggS") {
            return Some(AudioFormat::Ogg);
        }
        if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
            return Some(AudioFormat::Mp4);
        }
        if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            return Some(AudioFormat::WebM);
        }
        if bytes.starts_with(b"ID3") {
            return Some(AudioFormat::Mp3);
        }
        if bytes.len() >= 2 && bytes[0] == 0xFF {
            // ADTS (AAC) and MPEG audio share the 12-bit sync word; ADTS
            // always has layer bits 00.
            if bytes[1] & 0xF6 == 0xF0 {
                return Some(AudioFormat::Aac);
            }
            if bytes[1] & 0xE0 == 0xE0 && bytes[1] & 0x06 != 0 {
                return Some(AudioFormat::Mp3);
            }
        }
        None
    }

    /// Guess from a declared MIME type (only used for logging mismatches).
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "audio/wav" | "audio/wave" | "audio/x-wav" | "audio/vnd.wave" => Some(AudioFormat::Wav),
            "audio/mpeg" | "audio/mp3" => Some(AudioFormat::Mp3),
            "audio/aac" | "audio/x-aac" => Some(AudioFormat::Aac),
            "audio/flac" | "audio/x-flac" => Some(AudioFormat::Flac),
            "audio/ogg" | "application/ogg" => Some(AudioFormat::Ogg),
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "video/mp4" => Some(AudioFormat::Mp4),
            "audio/webm" | "video/webm" => Some(AudioFormat::WebM),
            _ => None,
        }
    }

    /// File suffix used when staging, including the dot.
    pub fn suffix(&self) -> &'static str {
        match self {
            AudioFormat::Wav => ".wav",
            AudioFormat::Mp3 => ".mp3",
            AudioFormat::Aac => ".aac",
            AudioFormat::Flac => ".flac",
            AudioFormat::Ogg => ".ogg",
            AudioFormat::Mp4 => ".m4a",
            AudioFormat::WebM => ".webm",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_containers() {
        assert_eq!(AudioFormat::sniff(b"RIFF\x24\x00\x00\x00WAVEfmt "), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::sniff(b"fLaC\x00\x00\x00\x22"), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::sniff(b"OggS\x00\x02"), Some(AudioFormat::Ogg));
        assert_eq!(AudioFormat::sniff(b"\x00\x00\x00\x20ftypM4A "), Some(AudioFormat::Mp4));
        assert_eq!(AudioFormat::sniff(&[0x1A, 0x45, 0xDF, 0xA3, 0x9F]), Some(AudioFormat::WebM));
        assert_eq!(AudioFormat::sniff(b"ID3\x04\x00"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::sniff(&[0xFF, 0xFB, 0x90, 0x64]), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::sniff(&[0xFF, 0xF1, 0x50, 0x80]), Some(AudioFormat::Aac));
    }

    #[test]
    fn test_sniff_rejects_non_audio() {
        assert_eq!(AudioFormat::sniff(b""), None);
        assert_eq!(AudioFormat::sniff(b"hello, this is a text file"), None);
        assert_eq!(AudioFormat::sniff(b"RIFF\x24\x00\x00\x00AVI "), None);
        assert_eq!(AudioFormat::sniff(&[0xFF]), None);
    }

    #[test]
    fn test_mime_mapping() {
        assert_eq!(AudioFormat::from_mime("audio/x-wav"), Some(AudioFormat::Wav));
        assert_eq!(AudioFormat::from_mime("Audio/WebM"), Some(AudioFormat::WebM));
        assert_eq!(AudioFormat::from_mime("text/plain"), None);
        assert_eq!(AudioFormat::Mp4.suffix(), ".m4a");
    }
}
