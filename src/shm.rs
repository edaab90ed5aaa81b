//! Shared memory channels
//!
//! A channel is a memory mapped file `<name><suffix>.im.shm` in the shared memory
//! directory (`$MILK_SHM_DIR`, `/dev/shm` by default).
//! The file starts with a 64 bytes header followed by the row-major array:
//!
//! | bytes | content |
//! |---|---|
//! | 0..8 | magic `SCAOSHM1` |
//! | 8 | element type code |
//! | 9 | rank |
//! | 16..48 | dimensions, 4 little endian `u64` |
//! | 48..56 | write counter, little endian `u64` |
//!
//! Writers overwrite the array and increment the counter, readers get the last value.

use memmap2::MmapMut;
use std::{
    env,
    fs::{self, OpenOptions},
    marker::PhantomData,
    path::{Path, PathBuf},
};
use strum_macros::{Display, EnumIter};

const MAGIC: &[u8; 8] = b"SCAOSHM1";
const HEADER_SIZE: usize = 64;
const MAX_RANK: usize = 4;
const DIMS_OFFSET: usize = 16;
const COUNTER_OFFSET: usize = 48;

#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("shared memory i/o failed for {1:?}")]
    Io(#[source] std::io::Error, PathBuf),
    #[error("{0:?} is not a shared memory array")]
    Magic(PathBuf),
    #[error("element type mismatch in {path:?}: expected code {expected}, found {found}")]
    ElementType {
        path: PathBuf,
        expected: u8,
        found: u8,
    },
    #[error("array rank must be in 1..=4, found {0}")]
    Rank(usize),
    #[error("expected {expected} elements, found {found}")]
    Shape { expected: usize, found: usize },
}
type Result<T> = std::result::Result<T, ShmError>;

/// Simulation channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    /// turbulent phase in the pupil, µm
    Turb,
    /// slope vector of the valid subapertures, arcsec
    Slopes,
    /// valid subapertures mask
    ValidSubaps,
    /// wavefront sensor detector image
    WfsImg,
    /// reconstructed phase, µm
    Recon,
}
impl Channel {
    /// Channel name with the given suffix
    pub fn name(&self, suffix: &str) -> String {
        format!("{self}{suffix}")
    }
}

/// Shared memory directory
pub fn shm_dir() -> PathBuf {
    env::var_os("MILK_SHM_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/dev/shm"))
}

/// Path of the shared memory file of array `name` in `dir`
pub fn shm_path<P: AsRef<Path>>(dir: P, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.im.shm"))
}

/// Shared memory array element
pub trait Element: Copy + Default {
    /// element type code in the header
    const CODE: u8;
    /// size in bytes
    const SIZE: usize;
    fn write_le(self, bytes: &mut [u8]);
    fn read_le(bytes: &[u8]) -> Self;
}
impl Element for f32 {
    const CODE: u8 = 9;
    const SIZE: usize = 4;
    fn write_le(self, bytes: &mut [u8]) {
        bytes.copy_from_slice(&self.to_le_bytes());
    }
    fn read_le(bytes: &[u8]) -> Self {
        let mut b = [0u8; 4];
        b.copy_from_slice(bytes);
        f32::from_le_bytes(b)
    }
}
impl Element for u8 {
    const CODE: u8 = 1;
    const SIZE: usize = 1;
    fn write_le(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }
    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

/// Memory mapped array shared between processes
pub struct SharedArray<T: Element> {
    path: PathBuf,
    shape: Vec<usize>,
    mmap: MmapMut,
    element: PhantomData<T>,
}
impl<T: Element> std::fmt::Debug for SharedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedArray")
            .field("path", &self.path)
            .field("shape", &self.shape)
            .field("counter", &self.counter())
            .finish()
    }
}
impl<T: Element> SharedArray<T> {
    /// Creates or overwrites the array `name` in the shared memory directory
    pub fn create(name: &str, shape: &[usize]) -> Result<Self> {
        Self::create_in(shm_dir(), name, shape)
    }
    /// Creates or overwrites the array `name` in `dir`
    pub fn create_in<P: AsRef<Path>>(dir: P, name: &str, shape: &[usize]) -> Result<Self> {
        if shape.is_empty() || shape.len() > MAX_RANK {
            return Err(ShmError::Rank(shape.len()));
        }
        let path = shm_path(dir, name);
        let io_err = |e: std::io::Error| ShmError::Io(e, path.clone());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(io_err)?;
        let n: usize = shape.iter().product();
        file.set_len((HEADER_SIZE + n * T::SIZE) as u64)
            .map_err(io_err)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(io_err)?;
        mmap[..8].copy_from_slice(MAGIC);
        mmap[8] = T::CODE;
        mmap[9] = shape.len() as u8;
        for (i, &d) in shape.iter().enumerate() {
            let o = DIMS_OFFSET + 8 * i;
            mmap[o..o + 8].copy_from_slice(&(d as u64).to_le_bytes());
        }
        log::debug!("created {:?} {:?}", path, shape);
        Ok(Self {
            path,
            shape: shape.to_vec(),
            mmap,
            element: PhantomData,
        })
    }
    /// Opens the existing array `name` in the shared memory directory
    pub fn open(name: &str) -> Result<Self> {
        Self::open_in(shm_dir(), name)
    }
    /// Opens the existing array `name` in `dir`
    pub fn open_in<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let path = shm_path(dir, name);
        let io_err = |e: std::io::Error| ShmError::Io(e, path.clone());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(io_err)?;
        if mmap.len() < HEADER_SIZE || &mmap[..8] != MAGIC {
            return Err(ShmError::Magic(path));
        }
        if mmap[8] != T::CODE {
            return Err(ShmError::ElementType {
                path,
                expected: T::CODE,
                found: mmap[8],
            });
        }
        let rank = mmap[9] as usize;
        if rank == 0 || rank > MAX_RANK {
            return Err(ShmError::Rank(rank));
        }
        let shape: Vec<usize> = (0..rank)
            .map(|i| {
                let o = DIMS_OFFSET + 8 * i;
                read_u64(&mmap[o..o + 8]) as usize
            })
            .collect();
        let expected = HEADER_SIZE + shape.iter().product::<usize>() * T::SIZE;
        if mmap.len() != expected {
            return Err(ShmError::Shape {
                expected,
                found: mmap.len(),
            });
        }
        Ok(Self {
            path,
            shape,
            mmap,
            element: PhantomData,
        })
    }
    /// Removes the array `name` from `dir`, returns `false` if there was none
    pub fn remove_in<P: AsRef<Path>>(dir: P, name: &str) -> Result<bool> {
        let path = shm_path(dir, name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ShmError::Io(e, path)),
        }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    /// Number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Number of writes since creation
    pub fn counter(&self) -> u64 {
        read_u64(&self.mmap[COUNTER_OFFSET..COUNTER_OFFSET + 8])
    }
    /// Overwrites the array with `data` in row-major order
    pub fn write(&mut self, data: &[T]) -> Result<()> {
        if data.len() != self.len() {
            return Err(ShmError::Shape {
                expected: self.len(),
                found: data.len(),
            });
        }
        self.mmap[HEADER_SIZE..]
            .chunks_exact_mut(T::SIZE)
            .zip(data)
            .for_each(|(bytes, &value)| value.write_le(bytes));
        let counter = self.counter().wrapping_add(1);
        self.mmap[COUNTER_OFFSET..COUNTER_OFFSET + 8].copy_from_slice(&counter.to_le_bytes());
        Ok(())
    }
    /// Reads the array in row-major order
    pub fn read(&self) -> Vec<T> {
        self.mmap[HEADER_SIZE..]
            .chunks_exact(T::SIZE)
            .map(T::read_le)
            .collect()
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(bytes);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn test_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("scaosim-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn channel_names() {
        let names: Vec<_> = Channel::iter().map(|c| c.name("-test")).collect();
        assert_eq!(
            names,
            vec![
                "turb-test",
                "slopes-test",
                "validsubaps-test",
                "wfsimg-test",
                "recon-test"
            ]
        );
    }

    #[test]
    fn write_read() {
        let dir = test_dir("write_read");
        let mut writer = SharedArray::<f32>::create_in(&dir, "turb", &[3, 2]).unwrap();
        assert_eq!(writer.counter(), 0);
        writer.write(&[1., 2., 3., 4., 5., 6.]).unwrap();
        let reader = SharedArray::<f32>::open_in(&dir, "turb").unwrap();
        assert_eq!(reader.shape(), &[3, 2]);
        assert_eq!(reader.read(), vec![1., 2., 3., 4., 5., 6.]);
        assert_eq!(reader.counter(), 1);
        writer.write(&[0.; 6]).unwrap();
        assert_eq!(reader.read(), vec![0.; 6]);
        assert_eq!(reader.counter(), 2);
        assert!(matches!(
            writer.write(&[0.; 4]),
            Err(ShmError::Shape {
                expected: 6,
                found: 4
            })
        ));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn element_types() {
        let dir = test_dir("element_types");
        let mut mask = SharedArray::<u8>::create_in(&dir, "mask", &[4]).unwrap();
        mask.write(&[0, 1, 1, 0]).unwrap();
        assert_eq!(
            SharedArray::<u8>::open_in(&dir, "mask").unwrap().read(),
            vec![0, 1, 1, 0]
        );
        assert!(matches!(
            SharedArray::<f32>::open_in(&dir, "mask"),
            Err(ShmError::ElementType { .. })
        ));
        assert!(matches!(
            SharedArray::<u8>::open_in(&dir, "missing"),
            Err(ShmError::Io(..))
        ));
        assert!(SharedArray::<u8>::remove_in(&dir, "mask").unwrap());
        assert!(!SharedArray::<u8>::remove_in(&dir, "mask").unwrap());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn invalid_rank() {
        let dir = test_dir("invalid_rank");
        assert!(matches!(
            SharedArray::<f32>::create_in(&dir, "scalar", &[]),
            Err(ShmError::Rank(0))
        ));
        fs::write(shm_path(&dir, "junk"), [0u8; 80]).unwrap();
        assert!(matches!(
            SharedArray::<f32>::open_in(&dir, "junk"),
            Err(ShmError::Magic(..))
        ));
        fs::remove_dir_all(dir).unwrap();
    }
}
