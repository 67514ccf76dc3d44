//! Executable script fixtures.
//!
//! Helpers panic on IO failure; they are meant for tests only.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::Layout;
use crate::server::Role;

/// Server that logs a line and keeps running until signalled.
pub const FAKE_SERVER_STAYS_UP: &str = "echo fake server up\nwhile true; do sleep 1; done";

/// Server that ignores SIGTERM, so only SIGKILL stops it.
pub const FAKE_SERVER_IGNORES_TERM: &str =
    "trap '' TERM\necho fake server up\nwhile true; do sleep 1; done";

/// Server that exits right away with a configuration error.
pub const FAKE_SERVER_EXITS: &str = "echo 'bad config: no such file' >&2\nexit 3";

/// Comparison driver that prints results and its own timing line.
///
/// The benchmark file is the last argument. Definitions whose name contains
/// `broken` make the driver fail with a stack trace and no timing line.
pub const FAKE_DRIVER: &str = r#"for last; do :; done
name=$(basename "$last" .xml)
case "$name" in
  *broken*) echo "Traceback: $name failed" >&2; exit 1 ;;
esac
printf 'query\t0\t%s\n' "$*"
printf '%s\t0.50\t0.25\t0.05\n' "$name" >&2"#;

/// Marks `path` executable.
pub fn make_executable(path: &Path) {
    let mut perms = std::fs::metadata(path)
        .unwrap_or_else(|e| panic!("stat {}: {e}", path.display()))
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)
        .unwrap_or_else(|e| panic!("chmod {}: {e}", path.display()));
}

/// Writes an executable `sh` script named `name` into `dir` and returns its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap_or_else(|e| panic!("mkdir {}: {e}", dir.display()));
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n"))
        .unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
    make_executable(&path);
    path
}

/// Installs a fake server executable in the instance root of `role`.
pub fn install_fake_server(layout: &Layout, role: Role, body: &str) -> PathBuf {
    write_script(&layout.instance_root(role), "clickhouse-server", body)
}
