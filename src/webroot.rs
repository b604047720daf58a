//! HTTP-01 challenge provisioning for per-domain document roots.
//!
//! Every virtual host gets a directory named after its FQDN under the shared
//! docroots directory. Challenge files are only ever written below the default
//! virtual host's `.well-known`, so each per-domain docroot merely needs a
//! `.well-known` symlink pointing there for the web server to serve the
//! challenge for any domain.

use anyhow::Context;
use nix::sys::stat::{Mode, umask};
use parking_lot::Mutex;
use std::fs;
use std::os::unix::fs::{DirBuilderExt, symlink};
use std::path::Path;
use tracing::debug;

const WELL_KNOWN: &str = ".well-known";

/// The umask is process-global state. Concurrent signing pipelines must not
/// interleave inside the save/clear/restore window, so the whole window is
/// serialized behind this lock.
static UMASK_LOCK: Mutex<()> = Mutex::new(());

/// Clears the process umask and restores the previous value on drop, on every
/// exit path including panics inside the critical section.
struct UmaskGuard {
    previous: Mode,
}

impl UmaskGuard {
    fn clear() -> Self {
        Self {
            previous: umask(Mode::empty()),
        }
    }
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        umask(self.previous);
    }
}

/// Ensure `<docroots_dir>/<domain>/` exists (mode 0755) and contains a
/// `.well-known` symlink to `<default_docroot>/.well-known`.
///
/// Idempotent: an existing entry at the `.well-known` path, whether a real
/// directory, a symlink, or even a dangling symlink, is left untouched.
/// Callable concurrently for any mix of domains.
///
/// Blocking filesystem work; callers on the async runtime should wrap this in
/// `tokio::task::spawn_blocking`.
pub fn provision(docroots_dir: &Path, domain: &str, default_docroot: &Path) -> anyhow::Result<()> {
    let domain_docroot = docroots_dir.join(domain);
    let well_known = domain_docroot.join(WELL_KNOWN);
    let target = default_docroot.join(WELL_KNOWN);

    let _serial = UMASK_LOCK.lock();
    let _umask = UmaskGuard::clear();
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(&domain_docroot)
        .with_context(|| format!("Failed to create docroot {}", domain_docroot.display()))?;
    // symlink_metadata gives lexists semantics: a dangling symlink also counts
    // as present and must not be replaced.
    if fs::symlink_metadata(&well_known).is_err() {
        if let Err(err) = symlink(&target, &well_known) {
            // Benign race with a concurrent call for the same domain.
            if fs::symlink_metadata(&well_known).is_err() {
                return Err(err).with_context(|| {
                    format!("Failed to link {} to {}", well_known.display(), target.display())
                });
            }
        } else {
            debug!(
                "Linked {} to {}",
                well_known.display(),
                target.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{WELL_KNOWN, provision};
    use nix::sys::stat::{Mode, umask};
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use tempfile::TempDir;

    // Every test here drives the process-global umask, directly or through
    // provision(); they must not run interleaved.
    static TEST_UMASK: Mutex<()> = Mutex::new(());

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let docroots = root.path().join("docroots");
        let default_docroot = root.path().join("default");
        std::fs::create_dir_all(default_docroot.join(WELL_KNOWN)).unwrap();
        (root, docroots, default_docroot)
    }

    #[test]
    fn test_creates_docroot_and_symlink() {
        let _lock = TEST_UMASK.lock();
        let (_root, docroots, default_docroot) = setup();

        provision(&docroots, "example.test", &default_docroot).unwrap();

        let well_known = docroots.join("example.test").join(WELL_KNOWN);
        let metadata = std::fs::symlink_metadata(&well_known).unwrap();
        assert!(metadata.file_type().is_symlink());
        assert_eq!(
            std::fs::read_link(&well_known).unwrap(),
            default_docroot.join(WELL_KNOWN)
        );
    }

    #[test]
    fn test_second_invocation_is_a_noop() {
        let _lock = TEST_UMASK.lock();
        let (_root, docroots, default_docroot) = setup();

        provision(&docroots, "example.test", &default_docroot).unwrap();
        provision(&docroots, "example.test", &default_docroot).unwrap();

        let well_known = docroots.join("example.test").join(WELL_KNOWN);
        assert!(std::fs::symlink_metadata(&well_known).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_existing_real_directory_is_preserved() {
        let _lock = TEST_UMASK.lock();
        let (_root, docroots, default_docroot) = setup();
        let well_known = docroots.join("example.test").join(WELL_KNOWN);
        std::fs::create_dir_all(&well_known).unwrap();

        provision(&docroots, "example.test", &default_docroot).unwrap();

        let metadata = std::fs::symlink_metadata(&well_known).unwrap();
        assert!(metadata.file_type().is_dir());
    }

    #[test]
    fn test_umask_is_restored() {
        let _lock = TEST_UMASK.lock();
        let (_root, docroots, default_docroot) = setup();
        let entry_umask = umask(Mode::from_bits_truncate(0o027));

        provision(&docroots, "example.test", &default_docroot).unwrap();

        let observed = umask(entry_umask);
        assert_eq!(observed, Mode::from_bits_truncate(0o027));
    }

    #[test]
    fn test_concurrent_provisioning_for_different_domains() {
        let _lock = TEST_UMASK.lock();
        let (_root, docroots, default_docroot) = setup();
        let entry_umask = umask(Mode::from_bits_truncate(0o022));

        std::thread::scope(|scope| {
            for domain in ["a.example.test", "b.example.test", "c.example.test"] {
                let docroots = &docroots;
                let default_docroot = &default_docroot;
                scope.spawn(move || provision(docroots, domain, default_docroot).unwrap());
            }
        });

        for domain in ["a.example.test", "b.example.test", "c.example.test"] {
            let well_known = docroots.join(domain).join(WELL_KNOWN);
            assert!(std::fs::symlink_metadata(&well_known).unwrap().file_type().is_symlink());
        }
        let observed = umask(entry_umask);
        assert_eq!(observed, Mode::from_bits_truncate(0o022));
    }
}
