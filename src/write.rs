use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use half::f16;

use crate::{
    error::SplitError,
    read::{Endianness, FrameLayout, HEADER_LEN, Mode},
};

const NVERSION: i32 = 20140;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Stats {
    min: f32,
    max: f32,
    mean: f32,
    rms: f32,
}

fn decode<E: ByteOrder>(sample: &[u8], mode: Mode) -> f64 {
    match mode {
        Mode::Int8 => sample[0] as i8 as f64,
        Mode::Int16 => E::read_i16(sample) as f64,
        Mode::Uint16 => E::read_u16(sample) as f64,
        Mode::Float32 => E::read_f32(sample) as f64,
        Mode::Float16 => f16::from_bits(E::read_u16(sample)).to_f64(),
    }
}

fn values<'a>(data: &'a [u8], layout: &FrameLayout) -> impl Iterator<Item = f64> + 'a {
    let mode = layout.mode;
    let endianness = layout.endianness;
    data.chunks_exact(mode.bytes_per_voxel())
        .map(move |sample| match endianness {
            Endianness::Little => decode::<LittleEndian>(sample, mode),
            Endianness::Big => decode::<BigEndian>(sample, mode),
        })
}

fn stats(data: &[u8], layout: &FrameLayout) -> Stats {
    let n = data.len() / layout.mode.bytes_per_voxel();
    if n == 0 {
        return Stats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            rms: 0.0,
        };
    }
    let (min, max, sum) = values(data, layout).fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(min, max, sum), v| (min.min(v), max.max(v), sum + v),
    );
    let mean = sum / n as f64;
    let var = values(data, layout)
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    Stats {
        min: min as f32,
        max: max as f32,
        mean: mean as f32,
        rms: var.sqrt() as f32,
    }
}

/// MRC2014 header in the byte order `E`; cell dimensions are left unset.
fn write_header<E: ByteOrder, W: Write>(
    out: &mut W,
    layout: &FrameLayout,
    stats: Stats,
) -> io::Result<()> {
    let dims = [layout.nx as i32, layout.ny as i32, layout.nz as i32];

    for d in dims {
        out.write_i32::<E>(d)?; // nx, ny, nz
    }
    out.write_i32::<E>(layout.mode.code())?;
    for _ in 0..3 {
        out.write_i32::<E>(0)?; // nxstart, nystart, nzstart
    }
    for d in dims {
        out.write_i32::<E>(d)?; // mx, my, mz
    }
    for _ in 0..3 {
        out.write_f32::<E>(0.0)?; // cella
    }
    for _ in 0..3 {
        out.write_f32::<E>(90.0)?; // cellb
    }
    for axis in 1..=3 {
        out.write_i32::<E>(axis)?; // mapc, mapr, maps
    }
    out.write_f32::<E>(stats.min)?;
    out.write_f32::<E>(stats.max)?;
    out.write_f32::<E>(stats.mean)?;
    out.write_i32::<E>(0)?; // ispg: image or image stack
    out.write_i32::<E>(0)?; // nsymbt

    // extra: 8 unused bytes, exttyp, nversion, 84 unused bytes
    out.write_all(&[0u8; 8])?;
    out.write_all(&[0u8; 4])?;
    out.write_i32::<E>(NVERSION)?;
    out.write_all(&[0u8; 84])?;

    for _ in 0..3 {
        out.write_f32::<E>(0.0)?; // origin
    }
    out.write_all(b"MAP ")?;
    out.write_all(&layout.endianness.machine_stamp())?;
    out.write_f32::<E>(stats.rms)?;
    out.write_i32::<E>(0)?; // nlabl
    out.write_all(&[0u8; 800])?;
    Ok(())
}

/// Writes raw samples laid out as `layout` (x fastest, then y, then z) as a new
/// MRC file. The samples are copied as they are; mode and byte order of the
/// header follow `layout`.
///
/// Fails if `filename` already exists.
pub fn write_mrc(filename: &Path, data: &[u8], layout: &FrameLayout) -> Result<(), SplitError> {
    let dims_fit = [layout.nx, layout.ny, layout.nz]
        .iter()
        .all(|&d| i32::try_from(d).is_ok());
    let expected = layout.data_len().filter(|_| dims_fit);
    if expected != Some(data.len()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{}x{}x{} {:?} image does not match {} bytes of data",
                layout.nx,
                layout.ny,
                layout.nz,
                layout.mode,
                data.len()
            ),
        )
        .into());
    }

    let out_file = File::create_new(filename)?;
    let mut out = BufWriter::with_capacity(HEADER_LEN + data.len(), out_file);
    let stats = stats(data, layout);
    match layout.endianness {
        Endianness::Little => write_header::<LittleEndian, _>(&mut out, layout, stats)?,
        Endianness::Big => write_header::<BigEndian, _>(&mut out, layout, stats)?,
    }
    out.write_all(data)?;
    out.flush()?;
    Ok(())
}

/// Writes one frame of a stack with `layout` as a single-frame file.
pub fn write_mrc_slice(
    filename: &Path,
    data: &[u8],
    layout: &FrameLayout,
) -> Result<(), SplitError> {
    let frame = FrameLayout { nz: 1, ..*layout };
    write_mrc(filename, data, &frame)
}
