use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ArchiveError;

/// Archive container formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    Tar,
    TarGz,
}

/// Static capability table: can entries be streamed incrementally?
///
/// Only streaming formats expose a per-entry output stream, which is what
/// byte-level progress and throughput limiting hook into.
pub const SUPPORTS_FILE_STREAMING: [(ArchiveFormat, bool); 3] = [
    (ArchiveFormat::Zip, true),
    (ArchiveFormat::Tar, false),
    (ArchiveFormat::TarGz, false),
];

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 3] = [Self::Zip, Self::Tar, Self::TarGz];

    /// Looks the format up in [`SUPPORTS_FILE_STREAMING`].
    pub fn supports_streaming(self) -> bool {
        SUPPORTS_FILE_STREAMING
            .iter()
            .find(|(format, _)| *format == self)
            .is_some_and(|(_, streaming)| *streaming)
    }

    /// Conventional file extension, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        }
    }

    /// Guesses the format from a destination file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar" => Ok(Self::Tar),
            "tar.gz" | "tgz" | "tar_gz" => Ok(Self::TarGz),
            _ => Err(ArchiveError::UnknownFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_table_covers_every_format() {
        for format in ArchiveFormat::ALL {
            assert!(SUPPORTS_FILE_STREAMING.iter().any(|(f, _)| *f == format));
        }
        assert!(ArchiveFormat::Zip.supports_streaming());
        assert!(!ArchiveFormat::Tar.supports_streaming());
        assert!(!ArchiveFormat::TarGz.supports_streaming());
    }

    #[test]
    fn parse_and_display() {
        for format in ArchiveFormat::ALL {
            let parsed: ArchiveFormat = format.to_string().parse().unwrap();
            assert_eq!(parsed, format);
        }
        assert_eq!("TGZ".parse::<ArchiveFormat>().unwrap(), ArchiveFormat::TarGz);
        assert!("rar".parse::<ArchiveFormat>().is_err());
    }

    #[test]
    fn guess_from_file_name() {
        assert_eq!(
            ArchiveFormat::from_file_name("backup.ZIP"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            ArchiveFormat::from_file_name("src.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_file_name("src.tgz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_file_name("src.tar"),
            Some(ArchiveFormat::Tar)
        );
        assert_eq!(ArchiveFormat::from_file_name("notes.txt"), None);
    }
}
