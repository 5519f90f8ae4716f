//! Shared helpers for unit tests.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

static NEXT_FILE: AtomicUsize = AtomicUsize::new(0);

/// Routes `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A file in the system temp directory, removed on drop.
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    /// Creates a uniquely named file holding `contents`.
    pub fn with_contents(contents: &[u8]) -> Self {
        init_logging();

        let path = std::env::temp_dir().join(format!(
            "dotinterop-unit-{}-{}.bin",
            std::process::id(),
            NEXT_FILE.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&path, contents).unwrap();
        TempFile { path }
    }

    /// Location of the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
