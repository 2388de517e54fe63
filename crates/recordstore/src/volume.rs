use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use memmap2::Mmap;

/// How a store file is read back during open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum VolumeKind {
    /// Memory-map the file and replay from the mapping.
    #[default]
    Mmap,
    /// Read the whole file into a heap buffer.
    Heap,
}

/// Replay-time view over the bytes of a store file.
///
/// Appends never go through a volume; they use the store's buffered writer.
pub(crate) enum Volume {
    Mmap(Mmap),
    Heap(Vec<u8>),
}

impl Volume {
    pub(crate) fn open(file: &mut File, kind: VolumeKind) -> io::Result<Self> {
        match kind {
            VolumeKind::Mmap => {
                // SAFETY: the store holds an exclusive file lock for its
                // whole lifetime, so the underlying file cannot be mutated
                // by another process while the mapping is live.
                let map = unsafe { Mmap::map(&*file)? };
                Ok(Volume::Mmap(map))
            }
            VolumeKind::Heap => {
                let mut buf = Vec::new();
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut buf)?;
                Ok(Volume::Heap(buf))
            }
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Volume::Mmap(map) => map,
            Volume::Heap(buf) => buf,
        }
    }
}
