//! The output byte sink: a single zero-initialized buffer sized after layout,
//! handed out as bounds-checked regions. Only the sync phase and backend
//! post-processing write to it.

use crate::error::Context;
use crate::error::Result;
use std::path::PathBuf;

pub struct Output {
    buffer: Vec<u8>,
    path: Option<PathBuf>,
}

impl Output {
    pub fn new() -> Output {
        Output {
            buffer: Vec::new(),
            path: None,
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Output {
        Output {
            buffer: Vec::new(),
            path: Some(path.into()),
        }
    }

    /// Sizes the buffer. Existing content is kept; growth is zero-filled.
    pub fn set_size(&mut self, size: u64) {
        self.buffer.resize(size as usize, 0);
    }

    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Borrows a mutable region of the image. The borrow scopes the
    /// acquisition: release is the end of the borrow, nothing to free.
    pub fn request_region(&mut self, offset: u64, length: u64) -> Result<&mut [u8]> {
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .filter(|&end| end <= self.buffer.len());
        match end {
            Some(end) => Ok(&mut self.buffer[start..end]),
            None => Err(crate::error!(
                "Requested region {offset}+{length} exceeds output size {}",
                self.buffer.len()
            )),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Writes the image to the path given at construction.
    pub fn persist(&self, executable: bool) -> Result {
        let path = self
            .path
            .as_ref()
            .context("Output::persist called without an output path")?;
        std::fs::write(path, &self.buffer)
            .with_context(|| format!("Failed to write output file `{}`", path.display()))?;
        if executable {
            make_executable(path)?;
        }
        Ok(())
    }
}

impl Default for Output {
    fn default() -> Self {
        Output::new()
    }
}

#[cfg(not(target_os = "windows"))]
fn make_executable(path: &std::path::Path) -> Result {
    use std::os::unix::prelude::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    let mut mode = PermissionsExt::mode(&permissions);
    // Set execute permission wherever we currently have read permission.
    mode |= (mode & 0o444) >> 2;
    PermissionsExt::set_mode(&mut permissions, mode);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(target_os = "windows")]
#[allow(clippy::unnecessary_wraps)]
fn make_executable(_path: &std::path::Path) -> Result {
    // There are no executable permissions on Windows.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_requests_are_bounds_checked() {
        let mut output = Output::new();
        output.set_size(16);
        assert!(output.request_region(0, 16).is_ok());
        assert!(output.request_region(8, 8).is_ok());
        assert!(output.request_region(8, 9).is_err());
        assert!(output.request_region(u64::MAX, 1).is_err());
    }

    #[test]
    fn growth_is_zero_filled() {
        let mut output = Output::new();
        output.set_size(4);
        output.request_region(0, 4).unwrap().fill(0xff);
        output.set_size(8);
        assert_eq!(output.bytes(), &[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
    }
}
