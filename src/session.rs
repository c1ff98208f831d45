use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::guard::Role;

/// Dashboard whose page position is remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalView {
    Doctor,
    Institute,
}

impl PortalView {
    pub fn label(self) -> &'static str {
        match self {
            PortalView::Doctor => "Doctor",
            PortalView::Institute => "Institute",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub token: Option<String>,
    pub role: Option<String>,
    pub doctor_current_page: Option<usize>,
    pub institute_current_page: Option<usize>,
    pub current_patient_id: Option<i64>,
}

/// Session-scoped key/value state, mirrored to a file in the runtime
/// directory so a restarted client resumes where it left off.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    path: Option<PathBuf>,
    state: SessionState,
}

impl SessionStore {
    pub fn open_default() -> Self {
        Self::open(session_file_path())
    }

    pub fn open(path: PathBuf) -> Self {
        let state = match load_session_state(&path) {
            Ok(state) => state,
            Err(err) => {
                log::warn!("Ignoring session file {}: {err:#}", path.display());
                SessionState::default()
            }
        };
        Self {
            path: Some(path),
            state,
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.state.token.as_deref().filter(|token| !token.is_empty())
    }

    pub fn page(&self, view: PortalView) -> Option<usize> {
        let page = match view {
            PortalView::Doctor => self.state.doctor_current_page,
            PortalView::Institute => self.state.institute_current_page,
        };
        page.filter(|page| *page >= 1)
    }

    /// Starts a new sign-in: page positions from an earlier session are dropped.
    pub fn begin(&mut self, token: &str) {
        self.state.token = Some(token.to_string());
        self.state.role = None;
        self.state.doctor_current_page = None;
        self.state.institute_current_page = None;
        self.state.current_patient_id = None;
        self.persist();
    }

    pub fn set_role(&mut self, role: &Role) {
        let value = role.as_str().to_string();
        if self.state.role.as_deref() != Some(value.as_str()) {
            self.state.role = Some(value);
            self.persist();
        }
    }

    pub fn set_page(&mut self, view: PortalView, page: usize) {
        let slot = match view {
            PortalView::Doctor => &mut self.state.doctor_current_page,
            PortalView::Institute => &mut self.state.institute_current_page,
        };
        if *slot != Some(page) {
            *slot = Some(page);
            self.persist();
        }
    }

    pub fn set_current_patient_id(&mut self, id: i64) {
        self.state.current_patient_id = Some(id);
        self.persist();
    }

    /// Forgets credentials and page positions.
    pub fn clear(&mut self) {
        self.state = SessionState::default();
        if let Some(path) = self.path.as_ref() {
            if path.exists() {
                if let Err(err) = fs::remove_file(path) {
                    log::warn!("Could not remove session file {}: {err}", path.display());
                }
            }
        }
    }

    fn persist(&self) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        if let Err(err) = store_session_state(path, &self.state) {
            log::warn!("Could not write session file {}: {err:#}", path.display());
        }
    }
}

fn session_file_path() -> PathBuf {
    env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .filter(|dir| dir.is_dir())
        .unwrap_or_else(env::temp_dir)
        .join("perspecta-portal")
        .join("session.toml")
}

fn load_session_state(path: &Path) -> Result<SessionState> {
    if !path.exists() {
        return Ok(SessionState::default());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Could not parse {}", path.display()))
}

/// The file holds the API token, so it is private to the current user.
fn store_session_state(path: &Path, state: &SessionState) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_private_dir(parent)
            .with_context(|| format!("Could not create directory {}", parent.display()))?;
    }
    let text = toml::to_string(state).context("Could not encode session state")?;
    let mut file =
        open_private_file(path).with_context(|| format!("Could not open {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("Could not write {}", path.display()))
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    if dir.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_private_file(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies when the file is created.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private_file(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_session_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "perspecta-portal-session-{tag}-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    #[test]
    fn page_survives_reopening_the_store() {
        let path = temp_session_path("reopen");
        let mut store = SessionStore::open(path.clone());
        store.begin("abc123");
        store.set_page(PortalView::Doctor, 4);
        store.set_page(PortalView::Institute, 2);

        let reopened = SessionStore::open(path.clone());
        assert_eq!(reopened.token(), Some("abc123"));
        assert_eq!(reopened.page(PortalView::Doctor), Some(4));
        assert_eq!(reopened.page(PortalView::Institute), Some(2));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn fresh_sign_in_forgets_pages() {
        let path = temp_session_path("signin");
        let mut store = SessionStore::open(path.clone());
        store.begin("first");
        store.set_page(PortalView::Doctor, 3);
        store.begin("second");
        assert_eq!(store.page(PortalView::Doctor), None);
        assert_eq!(store.token(), Some("second"));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn clear_removes_the_file() {
        let path = temp_session_path("clear");
        let mut store = SessionStore::open(path.clone());
        store.begin("token");
        store.set_role(&Role::Doctor);
        assert!(path.exists());
        store.clear();
        assert!(!path.exists());
        assert_eq!(store.state(), &SessionState::default());
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_private_to_the_user() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_session_path("private-dir");
        let path = dir.join("session.toml");
        let mut store = SessionStore::open(path.clone());
        store.begin("secret-token");

        let file_mode = fs::metadata(&path).expect("session file").permissions().mode();
        let dir_mode = fs::metadata(&dir).expect("session dir").permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        assert_eq!(dir_mode & 0o777, 0o700);

        fs::write(&path, "").expect("should reset file");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("should loosen mode");
        store.set_page(PortalView::Doctor, 2);
        let file_mode = fs::metadata(&path).expect("session file").permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unreadable_file_starts_empty() {
        let path = temp_session_path("garbage");
        fs::write(&path, "token = [").expect("should write temp session");
        let store = SessionStore::open(path.clone());
        assert_eq!(store.token(), None);
        let _ = fs::remove_file(path);
    }
}
