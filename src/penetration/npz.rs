//! Reading numpy `.npz` archives whose arrays may be integers, floats or unicode strings.
use ndarray::{ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, ReadDataError, ReadNpyError, ReadNpzError, ReadableElement};
use py_literal::Value as PyValue;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, Read, Seek},
    path::Path,
};

/// A numpy `U` (UCS-4) or `S` (bytes) string element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NpyString(pub String);

enum StringKind {
    Ucs4 { big_endian: bool },
    Bytes,
}

fn string_descriptor(type_desc: &PyValue) -> Option<(StringKind, usize)> {
    let PyValue::String(descr) = type_desc else {
        return None;
    };
    let mut chars = descr.chars();
    let (order, kind) = (chars.next()?, chars.next()?);
    let width: usize = chars.as_str().parse().ok()?;
    match (order, kind) {
        ('<' | '=' | '|', 'U') => Some((StringKind::Ucs4 { big_endian: false }, width)),
        ('>', 'U') => Some((StringKind::Ucs4 { big_endian: true }, width)),
        ('|' | '<' | '>' | '=', 'S') => Some((StringKind::Bytes, width)),
        _ => None,
    }
}

impl ReadableElement for NpyString {
    fn read_to_end_exact_vec<R: Read>(mut reader: R, type_desc: &PyValue, len: usize) -> Result<Vec<Self>, ReadDataError> {
        let Some((kind, width)) = string_descriptor(type_desc) else {
            return Err(ReadDataError::WrongDescriptor(type_desc.clone()));
        };
        let item_size = match kind {
            StringKind::Ucs4 { .. } => width * 4,
            StringKind::Bytes => width,
        };

        let mut buf = vec![0u8; len * item_size];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ReadDataError::MissingData,
            _ => ReadDataError::Io(e),
        })?;
        let extra = io::copy(&mut reader, &mut io::sink()).map_err(ReadDataError::Io)?;
        if extra > 0 {
            return Err(ReadDataError::ExtraBytes(extra as usize));
        }
        if item_size == 0 {
            return Ok(vec![NpyString::default(); len]);
        }

        Ok(buf
            .chunks_exact(item_size)
            .map(|item| match kind {
                StringKind::Ucs4 { big_endian } => NpyString(
                    item.chunks_exact(4)
                        .map(|c| {
                            let c = [c[0], c[1], c[2], c[3]];
                            if big_endian {
                                u32::from_be_bytes(c)
                            } else {
                                u32::from_le_bytes(c)
                            }
                        })
                        .take_while(|&cp| cp != 0)
                        .map(|cp| char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER))
                        .collect(),
                ),
                StringKind::Bytes => {
                    let end = item.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    NpyString(String::from_utf8_lossy(&item[..end]).into_owned())
                }
            })
            .collect())
    }
}

/// One array of a penetration archive, widened to a small set of element kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum NpzArray {
    Int(ArrayD<i64>),
    Float(ArrayD<f64>),
    Str(ArrayD<String>),
    /// an array whose dtype is not supported, with its numpy descriptor
    Unsupported(String),
}
impl NpzArray {
    pub fn kind(&self) -> &'static str {
        match self {
            NpzArray::Int(_) => "integer",
            NpzArray::Float(_) => "float",
            NpzArray::Str(_) => "string",
            NpzArray::Unsupported(_) => "unsupported",
        }
    }
    pub fn describe(&self) -> String {
        match self {
            NpzArray::Unsupported(descr) => format!("unsupported dtype {descr}"),
            other => other.kind().to_string(),
        }
    }
    pub fn shape(&self) -> &[usize] {
        match self {
            NpzArray::Int(a) => a.shape(),
            NpzArray::Float(a) => a.shape(),
            NpzArray::Str(a) => a.shape(),
            NpzArray::Unsupported(_) => &[],
        }
    }
    pub fn is_numeric(&self) -> bool { matches!(self, NpzArray::Int(_) | NpzArray::Float(_)) }
    pub fn to_f64(&self) -> Option<ArrayD<f64>> {
        match self {
            NpzArray::Int(a) => Some(a.mapv(|v| v as f64)),
            NpzArray::Float(a) => Some(a.clone()),
            _ => None,
        }
    }
}

macro_rules! try_dtype {
    ($npz:expr, $name:expr, $t:ty, $last:ident, $wrap:expr) => {
        match $npz.by_name::<OwnedRepr<$t>, IxDyn>($name) {
            Ok(array) => return Ok($wrap(array)),
            Err(ReadNpzError::Npy(ReadNpyError::WrongDescriptor(descr))) => $last = descr.to_string(),
            Err(e) => return Err(e),
        }
    };
}

fn read_entry<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> Result<NpzArray, ReadNpzError> {
    let mut last = String::new();
    try_dtype!(npz, name, i64, last, NpzArray::Int);
    try_dtype!(npz, name, i32, last, |a: ArrayD<i32>| NpzArray::Int(a.mapv(i64::from)));
    try_dtype!(npz, name, i16, last, |a: ArrayD<i16>| NpzArray::Int(a.mapv(i64::from)));
    try_dtype!(npz, name, i8, last, |a: ArrayD<i8>| NpzArray::Int(a.mapv(i64::from)));
    try_dtype!(npz, name, u32, last, |a: ArrayD<u32>| NpzArray::Int(a.mapv(i64::from)));
    try_dtype!(npz, name, u16, last, |a: ArrayD<u16>| NpzArray::Int(a.mapv(i64::from)));
    try_dtype!(npz, name, u8, last, |a: ArrayD<u8>| NpzArray::Int(a.mapv(i64::from)));
    try_dtype!(npz, name, u64, last, |a: ArrayD<u64>| {
        if a.iter().all(|&v| i64::try_from(v).is_ok()) {
            NpzArray::Int(a.mapv(|v| v as i64))
        } else {
            NpzArray::Unsupported("u64 with values beyond the i64 range".into())
        }
    });
    try_dtype!(npz, name, f64, last, NpzArray::Float);
    try_dtype!(npz, name, f32, last, |a: ArrayD<f32>| NpzArray::Float(a.mapv(f64::from)));
    try_dtype!(npz, name, NpyString, last, |a: ArrayD<NpyString>| NpzArray::Str(
        a.mapv(|s| s.0)
    ));
    Ok(NpzArray::Unsupported(last))
}

#[derive(Debug, thiserror::Error)]
pub enum NpzError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Npz(#[from] ReadNpzError),
}

/// Reads every array of an `.npz` archive, keyed by its name without the `.npy` suffix.
pub fn read_npz(path: &Path) -> Result<BTreeMap<String, NpzArray>, NpzError> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let mut arrays = BTreeMap::new();
    for name in npz.names()? {
        let array = read_entry(&mut npz, &name)?;
        let key = name.strip_suffix(".npy").unwrap_or(&name).to_string();
        arrays.insert(key, array);
    }
    Ok(arrays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{npy_bytes, npy_strings, write_npz};
    use ndarray::{arr1, arr2};

    #[test]
    fn reads_integers_floats_and_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_npz(
            dir.path(),
            "mixed.npz",
            vec![
                ("ints".to_string(), npy_bytes(&arr1(&[1i32, 2, 3]))),
                ("floats".to_string(), npy_bytes(&arr2(&[[1.5f32, 2.5], [3.5, 4.5]]))),
                ("names".to_string(), npy_strings(&["spikes", "lfp"])),
                ("bytes".to_string(), npy_bytes(&arr1(&[7u8]))),
            ],
        );
        let arrays = read_npz(&path).unwrap();
        assert_eq!(arrays["ints"], NpzArray::Int(arr1(&[1i64, 2, 3]).into_dyn()));
        assert_eq!(arrays["floats"].shape(), &[2, 2]);
        assert!(arrays["floats"].is_numeric());
        assert_eq!(
            arrays["names"],
            NpzArray::Str(arr1(&["spikes".to_string(), "lfp".to_string()]).into_dyn())
        );
        assert_eq!(arrays["bytes"].kind(), "integer");
    }

    #[test]
    fn decodes_ucs4_with_padding() {
        let descr = PyValue::String("<U4".into());
        let mut raw = Vec::new();
        for s in ["ab", "éΩ✓x"] {
            let mut cps: Vec<u32> = s.chars().map(|c| c as u32).collect();
            cps.resize(4, 0);
            cps.iter().for_each(|cp| raw.extend_from_slice(&cp.to_le_bytes()));
        }
        let strings = NpyString::read_to_end_exact_vec(&raw[..], &descr, 2).unwrap();
        assert_eq!(strings, vec![NpyString("ab".into()), NpyString("éΩ✓x".into())]);

        assert!(matches!(
            NpyString::read_to_end_exact_vec(&raw[..10], &descr, 2),
            Err(ReadDataError::MissingData)
        ));
        assert!(matches!(
            NpyString::read_to_end_exact_vec(&raw[..], &descr, 1),
            Err(ReadDataError::ExtraBytes(16))
        ));
        assert!(matches!(
            NpyString::read_to_end_exact_vec(&raw[..], &PyValue::String("<f8".into()), 4),
            Err(ReadDataError::WrongDescriptor(_))
        ));
    }

    #[test]
    fn unreadable_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.npz");
        std::fs::write(&path, b"definitely not a zip archive").unwrap();
        assert!(read_npz(&path).is_err());
        assert!(matches!(read_npz(&dir.path().join("missing.npz")), Err(NpzError::Io(_))));
    }
}
