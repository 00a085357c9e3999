//! JWT subject registry
//!
//! Persists the mapping subject -> public certificate: a TOML registry file
//! plus a directory of per-subject PEM files. A subject exists only when
//! both its registry entry and its certificate file do; writes keep that
//! invariant by rolling back the certificate when the registry update fails.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthError;

/// Registry entry for one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectEntry {
    /// Path of the public certificate PEM
    pub certificate: PathBuf,
    pub created: DateTime<Utc>,
}

/// A subject identity as handed back to the admin tool
#[derive(Debug, Clone)]
pub struct JwtSubject {
    pub subject: String,
    pub certificate: PathBuf,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    modified: Option<SystemTime>,
    subjects: HashMap<String, SubjectEntry>,
}

/// On-disk subject registry with mtime-based hot reload
pub struct SubjectRegistry {
    path: PathBuf,
    cert_dir: PathBuf,
    inner: RwLock<Inner>,
}

impl SubjectRegistry {
    /// Open the registry file, creating it (and its directory) when absent.
    /// Certificates live next to the registry file.
    pub fn open(path: &Path) -> Result<Self, AuthError> {
        let cert_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        fs::create_dir_all(&cert_dir)?;
        if !path.exists() {
            fs::write(path, "")?;
            restrict_permissions(path);
        }

        let registry = Self {
            path: path.to_path_buf(),
            cert_dir,
            inner: RwLock::new(Inner::default()),
        };
        registry.load()?;
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path a subject's certificate is stored at
    pub fn certificate_path(&self, subject: &str) -> PathBuf {
        self.cert_dir.join(format!("{subject}.crt"))
    }

    /// Register a new subject for the given public-key PEM. The certificate
    /// is written first; when the registry update fails it is unlinked so
    /// the subject never half-exists.
    pub fn add_subject(&self, certificate_pem: &str) -> Result<JwtSubject, AuthError> {
        if certificate_pem.trim().is_empty() {
            return Err(AuthError::Format("certificate cannot be empty".into()));
        }

        self.reload_if_stale();

        let subject = Uuid::new_v4().to_string();
        let cert_path = self.certificate_path(&subject);
        fs::write(&cert_path, certificate_pem)?;
        restrict_permissions(&cert_path);

        let entry = SubjectEntry {
            certificate: cert_path.clone(),
            created: Utc::now(),
        };

        let result = {
            let mut inner = self.inner.write().unwrap();
            inner.subjects.insert(subject.clone(), entry.clone());
            match self.save(&inner.subjects) {
                Ok(modified) => {
                    inner.modified = modified;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            // keep the invariant: no certificate without a registry entry
            let mut inner = self.inner.write().unwrap();
            inner.subjects.remove(&subject);
            if let Err(unlink) = fs::remove_file(&cert_path) {
                warn!("failed to unlink orphaned certificate {:?}: {}", cert_path, unlink);
            }
            return Err(e);
        }

        Ok(JwtSubject {
            subject,
            certificate: entry.certificate,
            created: entry.created,
        })
    }

    /// Remove a subject: registry entry first, then the certificate file
    pub fn remove_subject(&self, subject: &str) -> Result<(), AuthError> {
        self.reload_if_stale();

        let cert_path = {
            let mut inner = self.inner.write().unwrap();
            let entry = inner
                .subjects
                .remove(subject)
                .ok_or(AuthError::InvalidSubject)?;
            match self.save(&inner.subjects) {
                Ok(modified) => inner.modified = modified,
                Err(e) => {
                    inner.subjects.insert(subject.to_string(), entry);
                    return Err(e);
                }
            }
            entry.certificate
        };

        if let Err(e) = fs::remove_file(&cert_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to unlink certificate {:?}: {}", cert_path, e);
            }
        }
        Ok(())
    }

    /// Fetch a subject's metadata and certificate bytes
    pub fn get_subject(&self, subject: &str) -> Result<(SubjectEntry, Vec<u8>), AuthError> {
        self.reload_if_stale();

        let entry = {
            let inner = self.inner.read().unwrap();
            inner
                .subjects
                .get(subject)
                .cloned()
                .ok_or(AuthError::InvalidSubject)?
        };

        let certificate = fs::read(&entry.certificate)
            .map_err(|_| AuthError::CertificateMissing(subject.to_string()))?;
        Ok((entry, certificate))
    }

    pub fn subject_exists(&self, subject: &str) -> bool {
        self.reload_if_stale();
        self.inner.read().unwrap().subjects.contains_key(subject)
    }

    /// All subjects, sorted by id
    pub fn list(&self) -> Vec<(String, SubjectEntry)> {
        self.reload_if_stale();
        let inner = self.inner.read().unwrap();
        let mut subjects: Vec<_> = inner
            .subjects
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        subjects.sort_by(|a, b| a.0.cmp(&b.0));
        subjects
    }

    fn load(&self) -> Result<(), AuthError> {
        let content = fs::read_to_string(&self.path)?;
        let subjects: HashMap<String, SubjectEntry> = if content.trim().is_empty() {
            HashMap::new()
        } else {
            toml::from_str(&content).map_err(|e| AuthError::Format(e.to_string()))?
        };

        let mut inner = self.inner.write().unwrap();
        inner.subjects = subjects;
        inner.modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        Ok(())
    }

    /// Re-read the file when its mtime has advanced. A reader holding a
    /// stale view may authenticate a just-removed subject for one poll
    /// interval; acceptable at this scale.
    fn reload_if_stale(&self) {
        let on_disk = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        let loaded = self.inner.read().unwrap().modified;
        if on_disk != loaded {
            debug!("subject registry changed on disk, reloading");
            if let Err(e) = self.load() {
                warn!("failed to reload subject registry: {}", e);
            }
        }
    }

    /// Write the registry file; callers holding the lock record the returned
    /// mtime themselves.
    fn save(
        &self,
        subjects: &HashMap<String, SubjectEntry>,
    ) -> Result<Option<SystemTime>, AuthError> {
        let content =
            toml::to_string_pretty(subjects).map_err(|e| AuthError::Format(e.to_string()))?;
        fs::write(&self.path, content)?;
        restrict_permissions(&self.path);
        Ok(fs::metadata(&self.path).and_then(|m| m.modified()).ok())
    }
}

/// Registry and certificate files are not world-readable
fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o640)) {
            warn!("failed to set permissions on {:?}: {}", path, e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEST_PEM: &str = "-----BEGIN PUBLIC KEY-----\ntest\n-----END PUBLIC KEY-----\n";

    fn open_registry(dir: &Path) -> SubjectRegistry {
        SubjectRegistry::open(&dir.join("jwt_subjects.toml")).unwrap()
    }

    #[test]
    fn test_open_creates_registry_file() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        assert!(registry.path().exists());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_add_subject_writes_both_files() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());

        let subject = registry.add_subject(TEST_PEM).unwrap();
        assert!(subject.certificate.exists());
        assert!(registry.subject_exists(&subject.subject));

        let (entry, pem) = registry.get_subject(&subject.subject).unwrap();
        assert_eq!(entry.certificate, subject.certificate);
        assert_eq!(String::from_utf8(pem).unwrap(), TEST_PEM);
    }

    #[test]
    fn test_add_empty_certificate_rejected() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        assert!(matches!(
            registry.add_subject("  "),
            Err(AuthError::Format(_))
        ));
    }

    #[test]
    fn test_remove_subject_unlinks_certificate() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());

        let subject = registry.add_subject(TEST_PEM).unwrap();
        registry.remove_subject(&subject.subject).unwrap();

        assert!(!registry.subject_exists(&subject.subject));
        assert!(!subject.certificate.exists());
    }

    #[test]
    fn test_remove_unknown_subject_fails() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        assert!(matches!(
            registry.remove_subject("no-such-subject"),
            Err(AuthError::InvalidSubject)
        ));
    }

    #[test]
    fn test_get_subject_with_missing_certificate() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());

        let subject = registry.add_subject(TEST_PEM).unwrap();
        fs::remove_file(&subject.certificate).unwrap();

        assert!(matches!(
            registry.get_subject(&subject.subject),
            Err(AuthError::CertificateMissing(_))
        ));
    }

    #[test]
    fn test_registry_survives_reopen() {
        let dir = tempdir().unwrap();
        let subject = {
            let registry = open_registry(dir.path());
            registry.add_subject(TEST_PEM).unwrap()
        };

        let registry = open_registry(dir.path());
        assert!(registry.subject_exists(&subject.subject));
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_external_edit_is_picked_up() {
        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        let subject = registry.add_subject(TEST_PEM).unwrap();

        // a second handle on the same file, as the admin tool would be
        let admin = open_registry(dir.path());
        admin.remove_subject(&subject.subject).unwrap();

        assert!(!registry.subject_exists(&subject.subject));
    }

    #[cfg(unix)]
    #[test]
    fn test_registry_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let registry = open_registry(dir.path());
        let subject = registry.add_subject(TEST_PEM).unwrap();

        let registry_mode =
            fs::metadata(registry.path()).unwrap().permissions().mode() & 0o777;
        let cert_mode =
            fs::metadata(&subject.certificate).unwrap().permissions().mode() & 0o777;
        assert_eq!(registry_mode, 0o640);
        assert_eq!(cert_mode, 0o640);
    }
}
