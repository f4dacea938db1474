//! Derivation of real socket paths from logical ones
//!
//! A peer names a socket by a path that only means something on its own
//! host. The coordinator binds the listener at
//! `<socket_dir>/<login>/<short session id>/<basename>.sock` instead, so two
//! sessions forwarding the same name never collide.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use burrow_core::SessionId;

use super::ForwardError;

/// Usable bytes of `sockaddr_un.sun_path`, excluding the trailing NUL
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
pub const MAX_SOCKET_PATH_LEN: usize = 103;

/// Usable bytes of `sockaddr_un.sun_path`, excluding the trailing NUL
#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
pub const MAX_SOCKET_PATH_LEN: usize = 107;

/// Service name of a logical socket path: its final component
pub fn service_name(logical_path: &str) -> Result<String, ForwardError> {
    let trimmed = logical_path.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);

    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(ForwardError::InvalidSocketPath(logical_path.to_string()));
    }
    Ok(base.to_string())
}

/// Real socket path for `service` forwarded by `login` on `session`
pub fn derive_socket_path(
    socket_dir: &Path,
    login: &str,
    session: &SessionId,
    service: &str,
) -> Result<PathBuf, ForwardError> {
    // Directory logins are plain names, but a static config could say otherwise
    if login.is_empty() || login == "." || login == ".." || login.contains(['/', '\0']) {
        return Err(ForwardError::InvalidSocketPath(login.to_string()));
    }

    let path = socket_dir
        .join(login)
        .join(session.short())
        .join(format!("{}.sock", service));

    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH_LEN {
        return Err(ForwardError::PathTooLong {
            path,
            len,
            max: MAX_SOCKET_PATH_LEN,
        });
    }
    Ok(path)
}

/// Remove a socket file, treating an already-missing file as success
pub fn remove_socket_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove the per-session directory holding `socket_path` if it is empty
pub fn remove_empty_parent(socket_path: &Path) {
    if let Some(parent) = socket_path.parent() {
        // Fails harmlessly while other forwards of the session still live there
        let _ = fs::remove_dir(parent);
    }
}

/// Delete stale sockets left under `socket_dir` by a previous process
///
/// Only socket files and the directories that become empty are removed;
/// anything else an operator put there is left alone. Returns the number
/// of sockets removed.
pub fn sweep_socket_dir(socket_dir: &Path) -> io::Result<usize> {
    if !socket_dir.exists() {
        return Ok(0);
    }
    sweep(socket_dir)
}

fn sweep(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            removed += sweep(&path)?;
            let _ = fs::remove_dir(&path);
        } else if file_type.is_socket() {
            remove_socket_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionId {
        SessionId::new(id)
    }

    #[test]
    fn test_service_name_is_basename() {
        assert_eq!(service_name("/run/user/1000/docker.sock").unwrap(), "docker.sock");
        assert_eq!(service_name("buildkitd").unwrap(), "buildkitd");
        assert_eq!(service_name("/tmp/svc/").unwrap(), "svc");
    }

    #[test]
    fn test_service_name_rejects_traversal_and_empty() {
        for bad in ["", "/", "///", ".", "..", "/tmp/..", "a/."] {
            assert!(
                matches!(service_name(bad), Err(ForwardError::InvalidSocketPath(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_realistic_paths_fit() {
        let sid = SessionId::generate();
        let path = derive_socket_path(
            Path::new("/home/runner/.local/state/burrow/svc"),
            "some-long-github-login",
            &sid,
            "buildkitd.sock",
        )
        .unwrap();

        assert!(path.as_os_str().len() <= MAX_SOCKET_PATH_LEN);
        assert!(path.ends_with(format!("{}/buildkitd.sock.sock", sid.short())));
    }

    #[test]
    fn test_sessions_get_distinct_paths() {
        let base = Path::new("/tmp/svc");
        let a = derive_socket_path(base, "alice", &session("aaaaaaaaaaaaaaaa1111"), "docker").unwrap();
        let b = derive_socket_path(base, "alice", &session("bbbbbbbbbbbbbbbb1111"), "docker").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, PathBuf::from("/tmp/svc/alice/aaaaaaaaaaaaaaaa/docker.sock"));
    }

    #[test]
    fn test_overlong_path_rejected() {
        let name = "x".repeat(MAX_SOCKET_PATH_LEN);
        let err = derive_socket_path(Path::new("/tmp/svc"), "alice", &SessionId::generate(), &name)
            .unwrap_err();
        assert!(matches!(err, ForwardError::PathTooLong { max: MAX_SOCKET_PATH_LEN, .. }));
    }

    #[test]
    fn test_login_cannot_escape_socket_dir() {
        for login in ["", "..", "a/b"] {
            assert!(derive_socket_path(Path::new("/tmp/svc"), login, &SessionId::generate(), "x")
                .is_err());
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_only_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("alice").join("0123456789abcdef");
        fs::create_dir_all(&session_dir).unwrap();

        let socket = session_dir.join("docker.sock");
        let listener = tokio::net::UnixListener::bind(&socket).unwrap();
        drop(listener);
        let keep = dir.path().join("README");
        fs::write(&keep, "operator notes").unwrap();

        assert_eq!(sweep_socket_dir(dir.path()).unwrap(), 1);
        assert!(!socket.exists());
        assert!(!dir.path().join("alice").exists());
        assert!(keep.exists());
    }

    #[test]
    fn test_sweep_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(sweep_socket_dir(&dir.path().join("absent")).unwrap(), 0);
    }

    #[test]
    fn test_remove_socket_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_socket_file(&dir.path().join("gone.sock")).is_ok());
    }
}
