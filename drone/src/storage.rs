//! Non-volatile storage primitives.
//!
//! The flight core only sees the [`Storage`] trait. The host build keeps an
//! EEPROM-like image in a file; erased bytes read as `0xff`.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

pub const STORAGE_SIZE: usize = 512;
const ERASED: u8 = 0xff;

pub trait Storage {
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<()>;

    /// Not atomic: an interrupted write may leave any prefix of `data` written
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;
}

fn check_range(offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= STORAGE_SIZE => Ok(()),
        _ => bail!("Access of {} bytes at {} is outside the storage", len, offset),
    }
}

/// Storage image persisted in a file
pub struct FileStorage {
    path: PathBuf,
    image: Vec<u8>,
}

impl FileStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut image = match std::fs::read(&path) {
            Ok(image) => image,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Creating storage image {}", path.display());
                Vec::new()
            },
            Err(e) => return Err(e).with_context(|| format!("Cannot read storage image {}", path.display())),
        };
        image.resize(STORAGE_SIZE, ERASED);
        Ok(Self {
            path,
            image,
        })
    }

    /// Write `data` in place. Bytes outside `offset..offset + data.len()`
    /// are never rewritten once the file has its full size.
    fn persist(&self, offset: usize, data: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create(true).open(&self.path)?;
        let len = file.metadata()?.len() as usize;
        if len < STORAGE_SIZE {
            file.seek(SeekFrom::Start(len as u64))?;
            file.write_all(&self.image[len..])?;
        }
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        file.sync_data()
    }
}

impl Storage for FileStorage {
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        check_range(offset, buffer.len())?;
        buffer.copy_from_slice(&self.image[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len())?;
        let range = offset..offset + data.len();
        // Only touch the medium when something changes
        if self.image[range.clone()] == *data {
            return Ok(());
        }
        self.persist(offset, data)
            .with_context(|| format!("Cannot write storage image {}", self.path.display()))?;
        self.image[range].copy_from_slice(data);
        Ok(())
    }
}

/// In-memory storage that can simulate a write interrupted after a number of bytes
#[cfg(test)]
pub struct MemoryStorage {
    pub image: Vec<u8>,
    pub write_budget: Option<usize>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            image: vec![ERASED; STORAGE_SIZE],
            write_budget: None,
        }
    }
}

#[cfg(test)]
impl Storage for MemoryStorage {
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        check_range(offset, buffer.len())?;
        buffer.copy_from_slice(&self.image[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_range(offset, data.len())?;
        for (i, byte) in data.iter().enumerate() {
            match self.write_budget {
                Some(0) => bail!("Power lost"),
                Some(ref mut budget) => *budget -= 1,
                None => (),
            }
            self.image[offset + i] = *byte;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("quadpilot-{}-{}.bin", name, std::process::id()))
    }

    #[test]
    fn new_image_reads_erased() {
        let path = scratch("erased");
        let mut storage = FileStorage::open(&path).unwrap();
        let mut buffer = [0; 4];
        storage.read(10, &mut buffer).unwrap();
        assert_eq!(buffer, [ERASED; 4]);
        assert!(!path.exists());
    }

    #[test]
    fn writes_survive_reopening() {
        let path = scratch("reopen");
        let mut storage = FileStorage::open(&path).unwrap();
        storage.write(3, &[1, 2, 3]).unwrap();

        let mut reopened = FileStorage::open(&path).unwrap();
        let mut buffer = [0; 5];
        reopened.read(2, &mut buffer).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(buffer, [ERASED, 1, 2, 3, ERASED]);
    }

    #[test]
    fn write_only_touches_its_range() {
        let path = scratch("in-place");
        let original: Vec<u8> = (0..STORAGE_SIZE).map(|i| i as u8).collect();
        std::fs::write(&path, &original).unwrap();

        let mut storage = FileStorage::open(&path).unwrap();
        storage.write(10, &[0xaa, 0xbb]).unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let mut expected = original;
        expected[10] = 0xaa;
        expected[11] = 0xbb;
        assert_eq!(on_disk, expected);
    }

    #[test]
    fn short_image_is_completed_with_erased_bytes() {
        let path = scratch("short");
        std::fs::write(&path, [0x42, 1, 2]).unwrap();

        let mut storage = FileStorage::open(&path).unwrap();
        storage.write(100, &[7]).unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(on_disk.len(), STORAGE_SIZE);
        assert_eq!(&on_disk[..3], &[0x42, 1, 2]);
        assert_eq!(on_disk[100], 7);
        assert!(on_disk[3..100].iter().chain(&on_disk[101..]).all(|b| *b == ERASED));
    }

    #[test]
    fn failed_write_keeps_previous_bytes() {
        let path = scratch("failed");
        let mut storage = FileStorage::open(&path).unwrap();
        storage.write(0, &[0x42]).unwrap();

        // The image can no longer be opened for writing
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        let result = storage.write(0, &[0x43]);
        std::fs::remove_dir(&path).unwrap();

        assert!(result.is_err());
        let mut marker = [0];
        storage.read(0, &mut marker).unwrap();
        assert_eq!(marker, [0x42]);
    }

    #[test]
    fn out_of_range_access_fails() {
        let mut storage = MemoryStorage::new();
        let mut buffer = [0; 2];
        assert!(storage.read(STORAGE_SIZE - 1, &mut buffer).is_err());
        assert!(storage.write(usize::MAX, &[0]).is_err());
        assert!(storage.write(STORAGE_SIZE - 2, &[0, 0]).is_ok());
    }

    #[test]
    fn interrupted_write_keeps_prefix() {
        let mut storage = MemoryStorage::new();
        storage.write_budget = Some(2);
        assert!(storage.write(0, &[1, 2, 3, 4]).is_err());
        assert_eq!(&storage.image[..4], &[1, 2, ERASED, ERASED]);
    }
}
