//! Per-task scratch files.
//!
//! Every task gets the full set on creation: the output image, the
//! optional init/mask inputs, and the print-format output. They are
//! named temp files so the external generator can address them by
//! path, and deleting them is tied to dropping the set, which the
//! scheduler does exactly once, when the task leaves the queue.

use std::path::Path;

use tempfile::NamedTempFile;

/// The scratch file set owned by one task.
#[derive(Debug)]
pub struct ScratchSet {
    image: NamedTempFile,
    input_image: NamedTempFile,
    mask_image: NamedTempFile,
    print: NamedTempFile,
}

impl ScratchSet {
    /// Allocate all four scratch files.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            image: named("easel_", ".jpg")?,
            input_image: named("easel_input_", ".png")?,
            mask_image: named("easel_mask_", ".png")?,
            print: named("easel_print_", ".tiff")?,
        })
    }

    /// Where the generator writes the result image.
    pub fn image_path(&self) -> &Path {
        self.image.path()
    }

    /// Where a downloaded init image lands.
    pub fn input_path(&self) -> &Path {
        self.input_image.path()
    }

    /// Where a downloaded mask image lands.
    pub fn mask_path(&self) -> &Path {
        self.mask_image.path()
    }

    /// Where the print-format output lands.
    pub fn print_path(&self) -> &Path {
        self.print.path()
    }
}

fn named(prefix: &str, suffix: &str) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_files_exist_while_held() {
        let scratch = ScratchSet::new().unwrap();
        assert!(scratch.image_path().exists());
        assert!(scratch.input_path().exists());
        assert!(scratch.mask_path().exists());
        assert!(scratch.print_path().exists());
    }

    #[test]
    fn dropping_the_set_releases_the_files() {
        let scratch = ScratchSet::new().unwrap();
        let image = scratch.image_path().to_path_buf();
        let print = scratch.print_path().to_path_buf();
        drop(scratch);
        assert!(!image.exists());
        assert!(!print.exists());
    }
}
