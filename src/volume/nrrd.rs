//! Minimal reader and writer for the 3-D NRRD files the Allen institute publishes.
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use ndarray::{Array3, ShapeBuilder};
use num::NumCast;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NrrdError {
    #[error("not an NRRD file")]
    Magic,
    #[error("malformed header: {0}")]
    Header(String),
    #[error("unsupported {0}")]
    Unsupported(String),
    #[error("payload has {actual} bytes, expected {expected}")]
    PayloadLength { expected: usize, actual: usize },
    #[error("voxel value does not fit the requested element type")]
    Range,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}
impl ElementType {
    fn parse(name: &str) -> Result<Self, NrrdError> {
        use ElementType::*;
        Ok(match name {
            "signed char" | "int8" | "int8_t" => I8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => U8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => I16,
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => U16,
            "int" | "signed int" | "int32" | "int32_t" => I32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => U32,
            "float" => F32,
            "double" => F64,
            other => return Err(NrrdError::Unsupported(format!("type {other:?}"))),
        })
    }
    pub fn size(&self) -> usize {
        use ElementType::*;
        match self {
            I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NrrdHeader {
    pub element_type: ElementType,
    pub sizes: [usize; 3],
    pub encoding: Encoding,
    /// voxel edge lengths per axis, if the header declares them
    pub spacings: Option<[f64; 3]>,
    endian: Endian,
}
impl NrrdHeader {
    fn parse(text: &str) -> Result<Self, NrrdError> {
        let mut lines = text.lines();
        if !lines.next().is_some_and(|l| l.starts_with("NRRD000")) {
            return Err(NrrdError::Magic);
        }

        let mut element_type = None;
        let mut dimension = None;
        let mut sizes = None;
        let mut encoding = None;
        let mut endian = Endian::Little;
        let mut spacings = None;
        for line in lines {
            if line.starts_with('#') || line.contains(":=") {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(NrrdError::Header(format!("unexpected line {line:?}")));
            };
            let value = value.trim();
            match key.trim() {
                "type" => element_type = Some(ElementType::parse(value)?),
                "dimension" => dimension = Some(parse_number::<usize>(value)?),
                "sizes" => sizes = Some(parse_triple::<usize>(value.split_whitespace())?),
                "encoding" => {
                    encoding = Some(match value {
                        "raw" => Encoding::Raw,
                        "gzip" | "gz" => Encoding::Gzip,
                        other => return Err(NrrdError::Unsupported(format!("encoding {other:?}"))),
                    })
                }
                "endian" => {
                    endian = match value {
                        "little" => Endian::Little,
                        "big" => Endian::Big,
                        other => return Err(NrrdError::Header(format!("endian {other:?}"))),
                    }
                }
                "spacings" => spacings = Some(parse_triple::<f64>(value.split_whitespace())?),
                "space directions" => spacings = Some(parse_space_directions(value)?),
                _ => {}
            }
        }

        if dimension != Some(3) {
            return Err(NrrdError::Unsupported(format!("dimension {dimension:?}")));
        }
        let header = NrrdHeader {
            element_type: element_type.ok_or_else(|| NrrdError::Header("missing type".into()))?,
            sizes: sizes.ok_or_else(|| NrrdError::Header("missing sizes".into()))?,
            encoding: encoding.ok_or_else(|| NrrdError::Header("missing encoding".into()))?,
            spacings,
            endian,
        };
        if header.sizes.contains(&0) {
            return Err(NrrdError::Header(format!("empty axis in sizes {:?}", header.sizes)));
        }
        header.payload_len()?;
        Ok(header)
    }
    /// Always fits in `usize` for a parsed header.
    pub fn voxel_count(&self) -> usize { self.sizes.iter().product() }
    fn payload_len(&self) -> Result<usize, NrrdError> {
        self.sizes
            .iter()
            .try_fold(self.element_type.size(), |acc, &n| acc.checked_mul(n))
            .ok_or_else(|| NrrdError::Header("sizes overflow".into()))
    }
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Result<T, NrrdError> {
    s.trim().parse().map_err(|_| NrrdError::Header(format!("bad number {s:?}")))
}

fn parse_triple<'a, T: std::str::FromStr + Copy>(values: impl Iterator<Item = &'a str>) -> Result<[T; 3], NrrdError> {
    let values = values.map(parse_number::<T>).collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        &[a, b, c] => Ok([a, b, c]),
        _ => Err(NrrdError::Header(format!("expected 3 values, got {}", values.len()))),
    }
}

// "(25,0,0) (0,25,0) (0,0,25)": the spacing of each axis is the length of its direction vector
fn parse_space_directions(value: &str) -> Result<[f64; 3], NrrdError> {
    let vectors = value
        .split_whitespace()
        .map(|v| parse_triple::<f64>(v.trim_matches(|c| c == '(' || c == ')').split(',')))
        .collect::<Result<Vec<_>, _>>()?;
    match vectors.as_slice() {
        [a, b, c] => Ok([a, b, c].map(|v| v.iter().map(|x| x * x).sum::<f64>().sqrt())),
        _ => Err(NrrdError::Header("expected 3 space directions".into())),
    }
}

macro_rules! decode_as {
    ($t:ty, $chunk:expr, $endian:expr) => {{
        let bytes = $chunk.try_into().map_err(|_| NrrdError::Range)?;
        match $endian {
            Endian::Little => <$t>::from_le_bytes(bytes),
            Endian::Big => <$t>::from_be_bytes(bytes),
        }
    }};
}

fn decode<T: NumCast>(payload: &[u8], header: &NrrdHeader) -> Result<Vec<T>, NrrdError> {
    let endian = header.endian;
    payload
        .chunks_exact(header.element_type.size())
        .map(|c| -> Result<T, NrrdError> {
            let value: Option<T> = match header.element_type {
                ElementType::I8 => T::from(c[0] as i8),
                ElementType::U8 => T::from(c[0]),
                ElementType::I16 => T::from(decode_as!(i16, c, endian)),
                ElementType::U16 => T::from(decode_as!(u16, c, endian)),
                ElementType::I32 => T::from(decode_as!(i32, c, endian)),
                ElementType::U32 => T::from(decode_as!(u32, c, endian)),
                ElementType::F32 => T::from(decode_as!(f32, c, endian)),
                ElementType::F64 => T::from(decode_as!(f64, c, endian)),
            };
            value.ok_or(NrrdError::Range)
        })
        .collect()
}

/// Parses an NRRD file into an array indexed like the file's axes; the first axis varies fastest on disk.
pub fn read<T: NumCast>(bytes: &[u8]) -> Result<(NrrdHeader, Array3<T>), NrrdError> {
    let header_end = bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| NrrdError::Header("no blank line after the header".into()))?;
    let text = std::str::from_utf8(&bytes[..header_end]).map_err(|_| NrrdError::Header("header is not text".into()))?;
    let header = NrrdHeader::parse(text)?;

    let raw = &bytes[header_end + 2..];
    let mut inflated = Vec::new();
    let payload = match header.encoding {
        Encoding::Raw => raw,
        Encoding::Gzip => {
            GzDecoder::new(raw).read_to_end(&mut inflated)?;
            &inflated[..]
        }
    };

    let expected = header.payload_len()?;
    if payload.len() != expected {
        return Err(NrrdError::PayloadLength {
            expected,
            actual: payload.len(),
        });
    }

    let data = decode::<T>(payload, &header)?;
    let [s0, s1, s2] = header.sizes;
    let array = Array3::from_shape_vec((s0, s1, s2).f(), data).map_err(|e| NrrdError::Header(e.to_string()))?;
    Ok((header, array))
}

/// Element types the writer can store.
pub trait NrrdElement: Copy {
    const TYPE: &'static str;
    fn put_le(self, out: &mut Vec<u8>);
}
macro_rules! nrrd_element {
    ($t:ty, $name:expr) => {
        impl NrrdElement for $t {
            const TYPE: &'static str = $name;
            fn put_le(self, out: &mut Vec<u8>) { out.extend_from_slice(&self.to_le_bytes()) }
        }
    };
}
nrrd_element!(i8, "int8");
nrrd_element!(u8, "uint8");
nrrd_element!(i16, "int16");
nrrd_element!(u16, "uint16");
nrrd_element!(i32, "int32");
nrrd_element!(u32, "uint32");
nrrd_element!(f32, "float");
nrrd_element!(f64, "double");

pub fn write<T: NrrdElement>(array: &Array3<T>, spacing: f64, encoding: Encoding) -> Result<Vec<u8>, NrrdError> {
    let (s0, s1, s2) = array.dim();
    let mut payload = Vec::with_capacity(array.len() * std::mem::size_of::<T>());
    // reversed axes iterate the original first axis fastest
    for value in array.t().iter() {
        value.put_le(&mut payload);
    }

    let mut out = format!(
        "NRRD0004\n# written by activity-viewer\ntype: {}\ndimension: 3\nsizes: {} {} {}\nspace directions: ({s},0,0) (0,{s},0) (0,0,{s})\nendian: little\nencoding: {}\n\n",
        T::TYPE,
        s0,
        s1,
        s2,
        match encoding {
            Encoding::Raw => "raw",
            Encoding::Gzip => "gzip",
        },
        s = spacing,
    )
    .into_bytes();

    match encoding {
        Encoding::Raw => out.extend_from_slice(&payload),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(out, Compression::fast());
            encoder.write_all(&payload)?;
            out = encoder.finish()?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn labelled(shape: (usize, usize, usize)) -> Array3<u32> {
        Array3::from_shape_fn(shape, |(a, d, l)| (a * 10000 + d * 100 + l) as u32)
    }

    #[test]
    fn reads_what_it_writes() {
        let array = labelled((4, 3, 5));
        for encoding in [Encoding::Raw, Encoding::Gzip] {
            let bytes = write(&array, 100.0, encoding).unwrap();
            let (header, read_back) = read::<u32>(&bytes).unwrap();
            assert_eq!(header.sizes, [4, 3, 5]);
            assert_eq!(header.spacings, Some([100.0, 100.0, 100.0]));
            assert_eq!(read_back, array);
        }
    }

    #[test]
    fn first_axis_varies_fastest() {
        let header = "NRRD0004\ntype: uint8\ndimension: 3\nsizes: 2 1 2\nencoding: raw\n\n";
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        let (_, array) = read::<u8>(&bytes).unwrap();
        assert_eq!(array[[0, 0, 0]], 1);
        assert_eq!(array[[1, 0, 0]], 2);
        assert_eq!(array[[0, 0, 1]], 3);
        assert_eq!(array[[1, 0, 1]], 4);
    }

    #[test]
    fn converts_big_endian_and_element_types() {
        let header = "NRRD0005\n# comment\ntype: short\ndimension: 3\nsizes: 1 1 2\nendian: big\nencoding: raw\nspacings: 25 25 25\n\n";
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(&[0x01, 0x00, 0xff, 0xff]);
        let (header, array) = read::<f32>(&bytes).unwrap();
        assert_eq!(header.spacings, Some([25.0; 3]));
        assert_eq!(array[[0, 0, 0]], 256.0);
        assert_eq!(array[[0, 0, 1]], -1.0);
        assert!(matches!(read::<u32>(&bytes), Err(NrrdError::Range)));
    }

    #[test]
    fn detects_corruption() {
        let bytes = write(&labelled((4, 3, 5)), 100.0, Encoding::Raw).unwrap();
        let truncated = &bytes[..bytes.len() - 7];
        assert!(matches!(read::<u32>(truncated), Err(NrrdError::PayloadLength { .. })));
        assert!(matches!(read::<u32>(b"garbage\n\n"), Err(NrrdError::Magic)));

        let gz = write(&labelled((4, 3, 5)), 100.0, Encoding::Gzip).unwrap();
        assert!(read::<u32>(&gz[..gz.len() - 20]).is_err());

        let unsupported = b"NRRD0004\ntype: block\ndimension: 3\nsizes: 1 1 1\nencoding: raw\n\n\x00";
        assert!(matches!(read::<u8>(unsupported), Err(NrrdError::Unsupported(_))));
    }

    #[test]
    fn rejects_impossible_sizes() {
        let huge = b"NRRD0004\ntype: uint32\ndimension: 3\nsizes: 4294967296 4294967296 4294967296\nencoding: raw\n\n\x00";
        assert!(matches!(read::<u32>(huge), Err(NrrdError::Header(m)) if m == "sizes overflow"));

        let empty = b"NRRD0004\ntype: uint8\ndimension: 3\nsizes: 0 4 4\nencoding: raw\n\n";
        assert!(matches!(read::<u8>(empty), Err(NrrdError::Header(_))));
    }
}
