//! Fake yt-dlp executables for subprocess tests.
//!
//! Each [`FakeTool`] is a `/bin/sh` script in its own temp directory; the
//! directory (and script) is removed when the value drops.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct FakeTool {
    dir: TempDir,
    path: PathBuf,
}

impl FakeTool {
    /// Writes `body` after a `#!/bin/sh` line and marks it executable.
    pub fn new(body: &str) -> Self {
        Self::build(|_| body.to_string())
    }

    /// Like [`new`](Self::new), for scripts that need their own directory.
    pub fn build(body: impl FnOnce(&Path) -> String) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("yt-dlp");
        let body = body(dir.path());

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        file.sync_all().unwrap();
        drop(file);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    pub fn bin(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Scratch path inside the tool's directory (pid files, markers).
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// True once `pid` has exited (reaped or zombie).
#[cfg(target_os = "linux")]
pub fn process_is_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Err(_) => true,
        // state is the first field after the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
    }
}

/// Polls `path` until it holds a pid, for scripts that `echo $$ > path`.
pub async fn read_pid(path: &Path) -> u32 {
    for _ in 0..100 {
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("pid file {} never appeared", path.display());
}
