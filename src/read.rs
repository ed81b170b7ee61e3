use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use memmap2::Mmap;

use crate::error::SplitError;

pub const HEADER_LEN: usize = 1024;

/// Pixel types of the MRC modes that can be re-emitted frame by frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Int8,
    Int16,
    Float32,
    Uint16,
    Float16,
}

impl Mode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Int8),
            1 => Some(Self::Int16),
            2 => Some(Self::Float32),
            6 => Some(Self::Uint16),
            12 => Some(Self::Float16),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Int8 => 0,
            Self::Int16 => 1,
            Self::Float32 => 2,
            Self::Uint16 => 6,
            Self::Float16 => 12,
        }
    }

    pub fn bytes_per_voxel(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 | Self::Uint16 | Self::Float16 => 2,
            Self::Float32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn machine_stamp(self) -> [u8; 4] {
        match self {
            Self::Little => [0x44, 0x44, 0x00, 0x00],
            Self::Big => [0x11, 0x11, 0x00, 0x00],
        }
    }
}

/// What the splitter needs to know about a stack: shape, pixel type, byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub mode: Mode,
    pub endianness: Endianness,
}

impl FrameLayout {
    /// Bytes of one frame, `None` if that does not fit in `usize`.
    pub fn frame_len(&self) -> Option<usize> {
        self.nx
            .checked_mul(self.ny)?
            .checked_mul(self.mode.bytes_per_voxel())
    }

    pub fn data_len(&self) -> Option<usize> {
        self.frame_len()?.checked_mul(self.nz)
    }
}

/// Read-only access to the 2D frames of a volumetric stack, frame by frame.
pub trait FrameSource {
    fn layout(&self) -> FrameLayout;

    /// Raw bytes of the `z`th frame, exactly as stored.
    fn get_slice(&self, z: usize) -> Result<&[u8], SplitError>;

    /// `(nx, ny, nz)`, where `nz` is the number of frames.
    fn dimensions(&self) -> (usize, usize, usize) {
        let layout = self.layout();
        (layout.nx, layout.ny, layout.nz)
    }

    fn num_frames(&self) -> usize {
        self.layout().nz
    }
}

fn corrupt(path: &Path, msg: impl std::fmt::Display) -> SplitError {
    SplitError::UnsupportedStack(format!("{}: {msg}", path.display()))
}

fn read_words<E: ByteOrder>(header: &[u8]) -> std::io::Result<[i32; 4]> {
    let mut cursor = Cursor::new(header);
    Ok([
        cursor.read_i32::<E>()?,
        cursor.read_i32::<E>()?,
        cursor.read_i32::<E>()?,
        cursor.read_i32::<E>()?,
    ])
}

fn read_nsymbt<E: ByteOrder>(header: &[u8]) -> i32 {
    E::read_i32(&header[92..96])
}

/// Parses the fixed header; returns the layout and the offset of the first frame.
pub fn parse_header(header: &[u8], path: &Path) -> Result<(FrameLayout, usize), SplitError> {
    if header.len() < HEADER_LEN {
        return Err(corrupt(path, "shorter than an MRC header"));
    }

    let endianness = match (header[212], header[213]) {
        (0x44, 0x44) | (0x44, 0x41) => Endianness::Little,
        (0x11, 0x11) => Endianness::Big,
        // unset stamp: trust whichever byte order gives a sensible mode
        _ if (0..=16).contains(&LittleEndian::read_i32(&header[12..16])) => Endianness::Little,
        _ => Endianness::Big,
    };

    let ([nx, ny, nz, mode], nsymbt) = match endianness {
        Endianness::Little => (
            read_words::<LittleEndian>(header)?,
            read_nsymbt::<LittleEndian>(header),
        ),
        Endianness::Big => (
            read_words::<BigEndian>(header)?,
            read_nsymbt::<BigEndian>(header),
        ),
    };

    let mode = Mode::from_code(mode).ok_or_else(|| corrupt(path, format!("mode {mode}")))?;
    let dim = |v: i32, name: &str| {
        usize::try_from(v).map_err(|_| corrupt(path, format!("negative {name}: {v}")))
    };
    let layout = FrameLayout {
        nx: dim(nx, "nx")?,
        ny: dim(ny, "ny")?,
        nz: dim(nz, "nz")?,
        mode,
        endianness,
    };
    let offset = HEADER_LEN
        .checked_add(dim(nsymbt, "nsymbt")?)
        .ok_or_else(|| corrupt(path, "extended header too large"))?;

    Ok((layout, offset))
}

/// A memory-mapped `.mrc` stack. The mapping lives as long as this value.
#[derive(Debug)]
pub struct MrcStack {
    path: PathBuf,
    layout: FrameLayout,
    data_offset: usize,
    mmap: Mmap,
}

impl MrcStack {
    pub fn open(path: &Path) -> Result<Self, SplitError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let (layout, data_offset) = parse_header(&mmap, path)?;

        let needed = layout
            .data_len()
            .and_then(|len| len.checked_add(data_offset))
            .ok_or_else(|| corrupt(path, "dimensions overflow"))?;
        if mmap.len() < needed {
            return Err(corrupt(
                path,
                format!("{} bytes, header needs {needed}", mmap.len()),
            ));
        }

        Ok(Self {
            path: path.to_owned(),
            layout,
            data_offset,
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for MrcStack {
    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn get_slice(&self, z: usize) -> Result<&[u8], SplitError> {
        let frames = self.layout.nz;
        let out_of_range = || SplitError::FrameOutOfRange { frame: z, frames };
        if z >= frames {
            return Err(out_of_range());
        }

        let frame_len = self.layout.frame_len().ok_or_else(out_of_range)?;
        let start = z
            .checked_mul(frame_len)
            .and_then(|s| s.checked_add(self.data_offset))
            .ok_or_else(out_of_range)?;
        let end = start.checked_add(frame_len).ok_or_else(out_of_range)?;

        self.mmap.get(start..end).ok_or_else(out_of_range)
    }
}

#[cfg(test)]
pub struct InMemoryStack {
    pub data: Vec<u8>,
    pub layout: FrameLayout,
}

#[cfg(test)]
impl InMemoryStack {
    /// Little-endian int16 frames; every sample of frame `z` is `z * 100 + position`.
    pub fn numbered(nx: usize, ny: usize, nz: usize) -> Self {
        let data = (0..nz)
            .flat_map(|z| (0..nx * ny).map(move |i| (z * 100 + i) as i16))
            .flat_map(i16::to_le_bytes)
            .collect();
        Self {
            data,
            layout: FrameLayout {
                nx,
                ny,
                nz,
                mode: Mode::Int16,
                endianness: Endianness::Little,
            },
        }
    }
}

#[cfg(test)]
impl FrameSource for InMemoryStack {
    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn get_slice(&self, z: usize) -> Result<&[u8], SplitError> {
        let frame_len = self.layout.frame_len().unwrap_or(0);
        self.data
            .get(z * frame_len..(z + 1) * frame_len)
            .filter(|_| z < self.layout.nz)
            .ok_or(SplitError::FrameOutOfRange {
                frame: z,
                frames: self.layout.nz,
            })
    }
}
