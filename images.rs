use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Content type from the file extension; unknown extensions are served as
/// opaque bytes.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn resolve(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute()
        || candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::Validation(format!("Invalid image path: {relative}")));
    }
    Ok(root.join(candidate))
}

/// Reads raw image bytes from under the configured root, with a bounded
/// read time so one slow file cannot wedge a request.
pub async fn read_image(
    root: &Path,
    relative: &str,
    timeout: Duration,
) -> Result<(Vec<u8>, &'static str)> {
    let full = resolve(root, relative)?;
    match tokio::time::timeout(timeout, tokio::fs::read(&full)).await {
        Err(_) => Err(Error::Timeout(relative.to_string())),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(
            format!("Image not found or cannot be read: {relative}"),
        )),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(bytes)) => Ok((bytes, content_type_for(relative))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_bytes_with_content_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("site_a")).unwrap();
        std::fs::write(dir.path().join("site_a/img001.jpg"), b"jpegbytes").unwrap();

        let (bytes, content_type) =
            read_image(dir.path(), "site_a/img001.jpg", Duration::from_secs(1))
                .await
                .unwrap();
        assert_eq!(bytes, b"jpegbytes");
        assert_eq!(content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn missing_image_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_image(dir.path(), "nope.png", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_image(dir.path(), "../secret.jpg", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("a/b/c.PNG"), "image/png");
        assert_eq!(content_type_for("shot.webp"), "image/webp");
        assert_eq!(content_type_for("mystery.bin"), "application/octet-stream");
    }
}
