use std::fmt;
use std::path::{Path, PathBuf};

/// 缩放结果的缓存键：`{stem}_{width}x{height}{ext}`。
///
/// 宽高只含数字，且后缀从最后一个 `_` 处切分，不同的 (文件名, 宽, 高) 得到不同的键。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivativeKey {
    file_name: String,
    width: u32,
    height: u32,
}

impl DerivativeKey {
    pub fn derive(filename: &str, width: u32, height: u32) -> Self {
        let path = Path::new(filename);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        Self {
            file_name: format!("{stem}_{width}x{height}{ext}"),
            width,
            height,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 缓存目录下的目标路径
    pub fn path_in(&self, derivative_root: &Path) -> PathBuf {
        derivative_root.join(&self.file_name)
    }
}

impl fmt::Display for DerivativeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name)
    }
}
