use std::path::Path;

#[cfg(unix)]
pub fn secure_file<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    use std::os::unix::prelude::PermissionsExt;
    std::fs::set_permissions(path.as_ref(), std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
pub fn secure_file<P: AsRef<Path>>(_path: P) -> std::io::Result<()> {
    Ok(())
}
