use std::{path::Path, sync::OnceLock};

use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use strum::{Display, EnumIter};

use crate::{handle::HandleGuard, memory::MappedMemoryRegion, platform::PlatformRef, Result};

/// Hash algorithms available as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum HashAlgorithm {
    /// SHA-1, 20 bytes
    #[strum(to_string = "SHA1")]
    Sha1,
    /// MD5, 16 bytes
    #[strum(to_string = "MD5")]
    Md5,
    /// SHA-256, 32 bytes
    #[strum(to_string = "SHA256")]
    Sha256,
}

impl HashAlgorithm {
    /// Digest length in bytes
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Hashes `data` in one pass
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Md5 => Md5::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

#[derive(Debug)]
enum ImageData {
    Mapped(MappedMemoryRegion),
    Owned(Vec<u8>),
}

/// Hash evidence for a module image.
///
/// The image is mapped once; each digest is computed on first request and cached.
///
/// # Examples
///
/// ```rust,no_run
/// use dotinterop::{Hash, HandleGuard, HandleKind, Platform, SystemPlatform};
/// use dotinterop::evidence::HashAlgorithm;
/// use std::path::Path;
///
/// let platform = SystemPlatform::shared();
/// let raw = platform.open_file_for_read(Path::new("System.Runtime.dll"))?;
/// let image = HandleGuard::acquire(platform.clone(), raw, HandleKind::Image)?;
///
/// let hash = Hash::from_image(platform, &image)?;
/// println!("{:02x?}", hash.generate(HashAlgorithm::Sha256)?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct Hash {
    data: ImageData,
    sha1: OnceLock<Vec<u8>>,
    md5: OnceLock<Vec<u8>>,
    sha256: OnceLock<Vec<u8>>,
}

impl Hash {
    /// Creates evidence for the image behind `image`, which stays owned by the caller.
    ///
    /// # Errors
    /// Returns the errors of [`MappedMemoryRegion::from_file_handle`].
    pub fn from_image(platform: PlatformRef, image: &HandleGuard) -> Result<Self> {
        let region = MappedMemoryRegion::from_file_handle(platform, image)?;
        Ok(Self::with_data(ImageData::Mapped(region)))
    }

    /// Creates evidence for the image file at `path`.
    ///
    /// # Errors
    /// Returns the errors of [`MappedMemoryRegion::open`].
    pub fn from_path(platform: PlatformRef, path: impl AsRef<Path>) -> Result<Self> {
        let region = MappedMemoryRegion::open(platform, path)?;
        Ok(Self::with_data(ImageData::Mapped(region)))
    }

    /// Creates evidence for an image already in memory.
    #[must_use]
    pub fn from_raw_data(data: Vec<u8>) -> Self {
        Self::with_data(ImageData::Owned(data))
    }

    fn with_data(data: ImageData) -> Self {
        Hash {
            data,
            sha1: OnceLock::new(),
            md5: OnceLock::new(),
            sha256: OnceLock::new(),
        }
    }

    fn image(&self) -> Result<&[u8]> {
        match &self.data {
            ImageData::Mapped(region) => region.as_slice(),
            ImageData::Owned(data) => Ok(data),
        }
    }

    fn cell(&self, algorithm: HashAlgorithm) -> &OnceLock<Vec<u8>> {
        match algorithm {
            HashAlgorithm::Sha1 => &self.sha1,
            HashAlgorithm::Md5 => &self.md5,
            HashAlgorithm::Sha256 => &self.sha256,
        }
    }

    /// Size of the hashed image in bytes
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the image mapping is gone.
    pub fn image_len(&self) -> Result<usize> {
        Ok(self.image()?.len())
    }

    /// Digest of the image with `algorithm`, computed once and cached.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the image mapping is gone.
    pub fn digest(&self, algorithm: HashAlgorithm) -> Result<&[u8]> {
        let cell = self.cell(algorithm);
        if let Some(digest) = cell.get() {
            return Ok(digest);
        }

        let digest = algorithm.digest(self.image()?);
        Ok(cell.get_or_init(|| digest))
    }

    /// Owned copy of the digest for `algorithm`.
    ///
    /// # Errors
    /// Same as [`Hash::digest`].
    pub fn generate(&self, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
        self.digest(algorithm).map(<[u8]>::to_vec)
    }

    /// SHA-1 digest of the image
    ///
    /// # Errors
    /// Same as [`Hash::digest`].
    pub fn sha1(&self) -> Result<&[u8]> {
        self.digest(HashAlgorithm::Sha1)
    }

    /// MD5 digest of the image
    ///
    /// # Errors
    /// Same as [`Hash::digest`].
    pub fn md5(&self) -> Result<&[u8]> {
        self.digest(HashAlgorithm::Md5)
    }

    /// SHA-256 digest of the image
    ///
    /// # Errors
    /// Same as [`Hash::digest`].
    pub fn sha256(&self) -> Result<&[u8]> {
        self.digest(HashAlgorithm::Sha256)
    }

    /// Computes every digest that is not cached yet, in parallel.
    ///
    /// # Errors
    /// Same as [`Hash::digest`].
    pub fn compute_all(&self) -> Result<()> {
        let (sha1, (md5, sha256)) = rayon::join(
            || self.sha1().map(drop),
            || rayon::join(|| self.md5().map(drop), || self.sha256().map(drop)),
        );

        sha1?;
        md5?;
        sha256
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        handle::HandleKind,
        platform::{Instrumented, Platform, Primitive, SystemPlatform},
        test::TempFile,
    };
    use strum::IntoEnumIterator;

    const ABC_SHA1: [u8; 20] = [
        0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78, 0x50,
        0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d,
    ];
    const ABC_MD5: [u8; 16] = [
        0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0, 0xd6, 0x96, 0x3f, 0x7d, 0x28, 0xe1,
        0x7f, 0x72,
    ];

    #[test]
    fn known_digests() {
        let hash = Hash::from_raw_data(b"abc".to_vec());
        assert_eq!(hash.sha1().unwrap(), &ABC_SHA1);
        assert_eq!(hash.md5().unwrap(), &ABC_MD5);
        assert_eq!(hash.sha256().unwrap()[..4], [0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn image_handle_is_hashed_through_a_view() {
        let file = TempFile::with_contents(b"abc");
        let platform = Arc::new(Instrumented::new(SystemPlatform::new()));
        let raw = platform.open_file_for_read(file.path()).unwrap();
        let image = HandleGuard::acquire(platform.clone(), raw, HandleKind::Image).unwrap();

        let hash = Hash::from_image(platform.clone(), &image).unwrap();
        assert_eq!(hash.generate(HashAlgorithm::Sha1).unwrap(), ABC_SHA1);
        assert_eq!(platform.calls(Primitive::MapView), 1);
        assert!(image.is_valid());

        drop(hash);
        assert_eq!(platform.calls(Primitive::UnmapView), 1);
    }

    #[test]
    fn compute_all_fills_every_cache() {
        let hash = Hash::from_raw_data(vec![0x5A; 4096]);
        hash.compute_all().unwrap();

        for algorithm in HashAlgorithm::iter() {
            assert_eq!(hash.cell(algorithm).get().unwrap().len(), algorithm.digest_len());
        }
    }

    #[test]
    fn empty_image_hashes_as_empty_input() {
        let file = TempFile::with_contents(b"");
        let hash = Hash::from_path(Arc::new(SystemPlatform::new()), file.path()).unwrap();
        assert_eq!(hash.image_len().unwrap(), 0);
        assert_eq!(hash.md5().unwrap(), HashAlgorithm::Md5.digest(&[]).as_slice());
    }
}
