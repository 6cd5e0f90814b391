#[cfg(any(test, feature = "test-utils"))]
pub mod tmp_dir {
    use std::{
        path::PathBuf,
        time::{SystemTime, UNIX_EPOCH},
    };

    /// Create a fresh, empty directory under the system temp dir.
    pub fn try_new(prefix: &str) -> std::io::Result<PathBuf> {
        let base = std::env::temp_dir();
        let pid = std::process::id();

        for attempt in 0..1000u32 {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();

            let dir = base.join(format!("{prefix}_{pid}_{nanos}_{attempt}"));
            match std::fs::create_dir_all(base.as_path()).and_then(|_| std::fs::create_dir(&dir)) {
                Ok(()) => return Ok(dir),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err),
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique temp dir",
        ))
    }
}
