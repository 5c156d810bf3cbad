//! 原图路径解析：把不可信的文件名映射为原图目录内的安全路径。

use std::path::{Component, Path, PathBuf};

use crate::error::PipelineError;

use super::types::ImageKind;

/// 校验通过的原图文件名（单段、无路径分隔符、扩展名在白名单内）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    name: String,
    kind: ImageKind,
}

impl ImageName {
    /// 纯语法校验，不访问文件系统。
    pub fn parse(raw: Option<&str>) -> Result<Self, PipelineError> {
        let name = match raw {
            Some(v) if !v.is_empty() => v,
            _ => return Err(PipelineError::InvalidFormat("Filename is required")),
        };

        if name.contains(['/', '\\', '\0']) || !is_single_normal_component(name) {
            return Err(PipelineError::InvalidFormat("Invalid filename"));
        }

        let path = Path::new(name);
        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageKind::from_extension)
            .ok_or(PipelineError::InvalidFormat("Invalid image format"))?;
        if path.file_stem().is_none_or(|s| s.is_empty()) {
            return Err(PipelineError::InvalidFormat("Invalid filename"));
        }

        Ok(Self {
            name: name.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }
}

fn is_single_normal_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

/// 解析结果：原图目录内、已确认存在的普通文件。
///
/// 只能由 [`PathResolver`] 构造。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePath {
    path: PathBuf,
    name: ImageName,
}

impl SourcePath {
    /// 规范化后的绝对路径
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &ImageName {
        &self.name
    }

    pub fn kind(&self) -> ImageKind {
        self.name.kind
    }
}

/// 原图目录解析器
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `resolve(filename)`：语法校验 + 存在性探测。
    pub async fn resolve_str(&self, filename: Option<&str>) -> Result<SourcePath, PipelineError> {
        let name = ImageName::parse(filename)?;
        self.resolve(&name).await
    }

    /// 探测 `root/name` 是否为存在的普通文件，且规范化后仍位于 root 之内（防符号链接逃逸）。
    pub async fn resolve(&self, name: &ImageName) -> Result<SourcePath, PipelineError> {
        let candidate = self.root.join(name.as_str());

        let meta = match tokio::fs::metadata(&candidate).await {
            Ok(m) => m,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("原图探测失败 {:?}: {}", candidate, e);
                }
                return Err(PipelineError::NotFound);
            }
        };
        if !meta.is_file() {
            return Err(PipelineError::NotFound);
        }

        let (root, resolved) = match (
            tokio::fs::canonicalize(&self.root).await,
            tokio::fs::canonicalize(&candidate).await,
        ) {
            (Ok(r), Ok(p)) => (r, p),
            _ => return Err(PipelineError::NotFound),
        };
        if !resolved.starts_with(&root) {
            tracing::warn!(filename = name.as_str(), "原图路径逃逸出原图目录，已拒绝");
            return Err(PipelineError::InvalidFormat("Invalid filename"));
        }

        Ok(SourcePath {
            path: resolved,
            name: name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(raw: &str) -> PipelineError {
        ImageName::parse(Some(raw)).expect_err(raw)
    }

    #[test]
    fn accepts_allowed_extensions_any_case() {
        for ok in ["photo.png", "a.JPG", "b.jpeg", "c.Gif", "archive.tar.png", "with space.png"] {
            let name = ImageName::parse(Some(ok)).expect(ok);
            assert_eq!(name.as_str(), ok);
        }
        assert_eq!(
            ImageName::parse(Some("x.JPEG")).map(|n| n.kind()),
            Ok(ImageKind::Jpeg)
        );
    }

    #[test]
    fn missing_filename_is_invalid_format() {
        assert_eq!(
            ImageName::parse(None),
            Err(PipelineError::InvalidFormat("Filename is required"))
        );
        assert_eq!(
            ImageName::parse(Some("")),
            Err(PipelineError::InvalidFormat("Filename is required"))
        );
    }

    #[test]
    fn rejects_disallowed_extensions() {
        for bad in ["photo.bmp", "photo", ".png", "photo.png.exe", "photo.webp"] {
            assert!(matches!(invalid(bad), PipelineError::InvalidFormat(_)), "{bad}");
        }
        assert_eq!(invalid("photo.bmp"), PipelineError::InvalidFormat("Invalid image format"));
    }

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        for bad in [
            "../../etc/passwd",
            "../secret.png",
            "/etc/shadow.png",
            "sub/photo.png",
            "..\\photo.png",
            "..",
            ".",
            "nul\0.png",
        ] {
            assert_eq!(
                invalid(bad),
                PipelineError::InvalidFormat("Invalid filename"),
                "{bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn traversal_is_rejected_without_touching_disk() {
        // root 不存在：若发生了文件访问，会得到 NotFound 而非 InvalidFormat
        let resolver = PathResolver::new("/definitely/not/here");
        let err = resolver
            .resolve_str(Some("../../etc/passwd"))
            .await
            .expect_err("traversal must fail");
        assert!(matches!(err, PipelineError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn resolves_existing_file_and_reports_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("photo.png"), b"not really a png").expect("write");
        std::fs::create_dir(dir.path().join("folder.png")).expect("mkdir");

        let resolver = PathResolver::new(dir.path());
        let source = resolver.resolve_str(Some("photo.png")).await.expect("resolve");
        assert!(source.as_path().is_absolute());
        assert!(source.as_path().ends_with("photo.png"));
        assert_eq!(source.kind(), ImageKind::Png);

        assert_eq!(
            resolver.resolve_str(Some("missing.png")).await,
            Err(PipelineError::NotFound)
        );
        assert_eq!(
            resolver.resolve_str(Some("folder.png")).await,
            Err(PipelineError::NotFound)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escaping_root_is_rejected() {
        let outside = tempfile::tempdir().expect("outside");
        let target = outside.path().join("secret.png");
        std::fs::write(&target, b"secret").expect("write");

        let root = tempfile::tempdir().expect("root");
        std::os::unix::fs::symlink(&target, root.path().join("link.png")).expect("symlink");

        let resolver = PathResolver::new(root.path());
        assert_eq!(
            resolver.resolve_str(Some("link.png")).await,
            Err(PipelineError::InvalidFormat("Invalid filename"))
        );
    }
}
