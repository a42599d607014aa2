//! Host arrays and tensor persistence.
//!
//! # `.mtt` Tensor File Format
//!
//! A `.mtt` file stores one or more tensors in the following layout:
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────────┐
//! │ Header     │ Tensor N   │ Tensor N+1 …        │
//! ├────────────┼────────────┼─────────────────────┤
//! │ "mttz"[4]  │ u64: ndim  │ u64: ndim           │
//! │ u32: count │ [u64; ndim] shape                │
//! │            │ [f64; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian; data is row-major. Only values
//! and shapes are stored, so loaded tensors are constants without history.
//!
//! # Example
//!
//! ```rust,no_run
//! use minitorch::backend::Backend;
//! use minitorch::modelio::{load_tensors, save_tensors};
//! use minitorch::tensors::Tensor;
//!
//! let weights = Tensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0], Backend::Fast);
//! save_tensors("weights.mtt", &[weights])?;
//! let restored = load_tensors("weights.mtt", Backend::Fast)?;
//! assert_eq!(restored[0].to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
//! # Ok::<(), minitorch::Error>(())
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::*;
use tracing::instrument;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::tensors::Tensor;

const MTT_MAGIC: &[u8; 4] = b"mttz";

/// A plain row-major array detached from any backend or graph.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Validate for HostArray {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        let expected = self
            .shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(ValidationError)?;
        if self.data.len() != expected {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl Tensor {
    /// Copies values and shape out to a host array.
    pub fn to_host(&self) -> HostArray {
        HostArray {
            shape: self.shape().to_vec(),
            data: self.to_vec(),
        }
    }

    /// Builds a constant tensor from a host array.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the data does not fill the shape.
    pub fn from_host(host: HostArray, backend: Backend) -> Result<Tensor> {
        Tensor::try_new(host.shape, host.data, backend)
    }
}

/// Save tensors to a `.mtt` file.
///
/// # Errors
/// [`Error::Io`] on write failure.
#[instrument(skip_all, fields(path = %path.as_ref().display(), count = tensors.len()))]
pub fn save_tensors(path: impl AsRef<Path>, tensors: &[Tensor]) -> Result<()> {
    let count = u32::try_from(tensors.len()).map_err(|_| Error::InvalidArgument {
        arg: "tensors",
        reason: format!("{} tensors exceed the u32 record count", tensors.len()),
    })?;
    let mut file = BufWriter::new(File::create(path.as_ref())?);

    file.write_all(MTT_MAGIC)?;
    file.write_all(&count.to_le_bytes())?;

    for tensor in tensors {
        file.write_all(&(tensor.dims() as u64).to_le_bytes())?;
        for &dim in tensor.shape() {
            file.write_all(&(dim as u64).to_le_bytes())?;
        }
        for val in tensor.to_vec() {
            file.write_all(&val.to_le_bytes())?;
        }
    }
    file.flush()?;
    Ok(())
}

fn read_u64(file: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Load every tensor of a `.mtt` file onto `backend`.
///
/// # Errors
/// [`Error::Corrupt`] for a bad header or a record whose data does not fill
/// its shape (including truncated data), and [`Error::Io`] for other read
/// failures such as a truncated header.
#[instrument(skip_all, fields(path = %path.as_ref().display(), %backend))]
pub fn load_tensors(path: impl AsRef<Path>, backend: Backend) -> Result<Vec<Tensor>> {
    let mut file = BufReader::new(File::open(path.as_ref())?);

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic != MTT_MAGIC {
        return Err(Error::Corrupt("invalid magic header"));
    }

    let mut count = [0u8; 4];
    file.read_exact(&mut count)?;
    let count = u32::from_le_bytes(count) as usize;

    let mut tensors = Vec::new();
    for _ in 0..count {
        let ndim = usize::try_from(read_u64(&mut file)?).map_err(|_| Error::Corrupt("dimension count overflows"))?;
        let shape = (0..ndim)
            .map(|_| {
                let dim = read_u64(&mut file)?;
                usize::try_from(dim).map_err(|_| Error::Corrupt("dimension overflows"))
            })
            .collect::<Result<Vec<usize>>>()?;

        let size = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(Error::Corrupt("shape size overflows"))?;
        let mut raw = Vec::new();
        file.by_ref().take((size as u64).saturating_mul(8)).read_to_end(&mut raw)?;
        let data = raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();

        let host = TrustedData::new(HostArray { shape, data })
            .map_err(|_| Error::Corrupt("tensor data does not fill its shape"))?
            .into_inner();
        tensors.push(Tensor::from_host(host, backend)?);
    }
    tracing::debug!(count = tensors.len(), "loaded tensors");
    Ok(tensors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("minitorch-{}-{name}.mtt", std::process::id()))
    }

    #[test]
    fn host_round_trip_keeps_permuted_order() {
        let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Backend::Simple);
        let host = t.permute(&[1, 0]).unwrap().to_host();
        assert_eq!(host.shape, vec![3, 2]);
        assert_eq!(host.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let back = Tensor::from_host(host, Backend::Fast).unwrap();
        assert_eq!(back.backend(), Backend::Fast);
    }

    #[test]
    fn from_host_rejects_short_data() {
        let host = HostArray {
            shape: vec![2, 2],
            data: vec![1.0],
        };
        assert!(matches!(Tensor::from_host(host, Backend::Simple), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn save_then_load() {
        let path = temp_path("roundtrip");
        let a = Tensor::new(vec![2, 2], vec![1.0, -2.5, 3.0, 4.0], Backend::Simple);
        let b = Tensor::scalar(7.0, Backend::Simple);
        save_tensors(&path, &[a.clone(), b]).unwrap();

        let loaded = load_tensors(&path, Backend::Fast).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].shape(), &[2, 2]);
        assert_eq!(loaded[0].to_vec(), a.to_vec());
        assert_eq!(loaded[1].to_vec(), vec![7.0]);
        assert!(loaded[0].is_leaf());
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let path = temp_path("magic");
        std::fs::write(&path, b"nope\0\0\0\0").unwrap();
        let result = load_tensors(&path, Backend::Simple);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(Error::Corrupt(_))));
    }

    #[test]
    fn truncated_data_is_rejected() {
        let path = temp_path("truncated");
        let t = Tensor::new(vec![3], vec![1.0, 2.0, 3.0], Backend::Simple);
        save_tensors(&path, &[t]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        let result = load_tensors(&path, Backend::Simple);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(Error::Corrupt(_))));
    }
}
