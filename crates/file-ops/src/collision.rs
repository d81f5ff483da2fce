//! Destination collision detection.

use serde::{Deserialize, Serialize};

use crate::file::FileHandle;

/// Outcome of a collision check between a source and a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collision {
    None,
    /// The destination already exists and would be overwritten.
    DestinationExists,
    /// Source and destination are the same file.
    SameSourceAndDestination,
    /// The destination lives inside the source folder.
    SourceParentOfDestination,
}

impl Collision {
    pub fn is_collision(self) -> bool {
        self != Self::None
    }

    /// Short human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::None => "no collision",
            Self::DestinationExists => "file already exists in destination",
            Self::SameSourceAndDestination => "source and destination are the same",
            Self::SourceParentOfDestination => "source folder contains destination",
        }
    }
}

/// Checks whether writing `source` to `destination` would collide.
///
/// `source` is `None` when the operation has no single source file, e.g.
/// when many files are packed into one archive.
pub fn check_for_collision(
    source: Option<&dyn FileHandle>,
    destination: &dyn FileHandle,
) -> Collision {
    if let Some(source) = source {
        if source.canonical_equals(destination) {
            return Collision::SameSourceAndDestination;
        }
        if source.is_directory() && source.is_parent_of(destination) {
            return Collision::SourceParentOfDestination;
        }
    }

    if destination.exists() {
        return Collision::DestinationExists;
    }

    Collision::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFs;

    fn fs() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.add_file("/src/a.txt", b"a").add_file("/out/existing.zip", b"PK");
        fs
    }

    #[test]
    fn no_collision_for_new_destination() {
        let fs = fs();
        let dest = fs.file("/out/new.zip");
        assert_eq!(check_for_collision(None, dest.as_ref()), Collision::None);
        assert!(!Collision::None.is_collision());
    }

    #[test]
    fn existing_destination() {
        let fs = fs();
        let dest = fs.file("/out/existing.zip");
        let collision = check_for_collision(None, dest.as_ref());
        assert_eq!(collision, Collision::DestinationExists);
        assert!(collision.is_collision());
    }

    #[test]
    fn same_source_and_destination() {
        let fs = fs();
        let a = fs.file("/src/a.txt");
        assert_eq!(
            check_for_collision(Some(a.as_ref()), a.as_ref()),
            Collision::SameSourceAndDestination
        );
    }

    #[test]
    fn source_parent_of_destination() {
        let fs = fs();
        let src = fs.file("/src");
        let dest = fs.file("/src/inner/copy");
        assert_eq!(
            check_for_collision(Some(src.as_ref()), dest.as_ref()),
            Collision::SourceParentOfDestination
        );
    }

    #[test]
    fn descriptions_are_distinct() {
        let all = [
            Collision::None,
            Collision::DestinationExists,
            Collision::SameSourceAndDestination,
            Collision::SourceParentOfDestination,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.description(), b.description());
            }
        }
    }
}
