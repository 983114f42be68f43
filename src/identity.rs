// Peer and room identities, plus the locally persisted user profile
// Profiles survive reloads so a returning player keeps their name and colors

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Opaque peer identity, stable for the lifetime of a session.
/// Travels as the `actor` on every action and as a connection-routing key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a short, human-friendly peer id (8 uppercase letters).
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let id: String = (0..8)
            .map(|_| {
                let idx = rng.gen_range(0..26);
                (b'A' + idx) as char
            })
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Room identifier, the well-known name a host listens under and
/// clients dial.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Persisted user profile: how a player appears to the rest of the room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: PeerId,
    pub name: String,
    pub color: String,
    pub emoji: String,
}

impl Profile {
    /// Fresh profile with a newly generated id.
    pub fn generate(name: &str) -> Self {
        Self {
            id: PeerId::generate(),
            name: name.to_string(),
            color: "#e91e63".to_string(),
            emoji: "\u{1f600}".to_string(),
        }
    }
}

/// Everything this crate persists between sessions: the username, the
/// serialized profile, and which rooms this player originally created
/// (deciding host role on reload).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedIdentity {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub host_rooms: BTreeSet<String>,
}

/// File-backed identity store under the platform config directory.
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    /// Store at the default location (`<config dir>/p2party/identity.toml`).
    pub fn open() -> Self {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("p2party");
        fs::create_dir_all(&path).ok();
        path.push("identity.toml");
        Self { path }
    }

    /// Store at an explicit path (used by tests).
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load the persisted identity. A missing or unparsable file yields the
    /// default; parse failures are logged, not fatal.
    pub fn load(&self) -> PersistedIdentity {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return PersistedIdentity::default();
        };
        match toml::from_str(&contents) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("failed to parse identity file, starting fresh: {e}");
                PersistedIdentity::default()
            }
        }
    }

    pub fn save(&self, identity: &PersistedIdentity) -> io::Result<()> {
        let contents = toml::to_string_pretty(identity)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, contents)
    }

    /// The persisted profile, creating and saving a fresh one on first use.
    pub fn profile(&self) -> Profile {
        let mut identity = self.load();
        if let Some(profile) = identity.profile.clone() {
            return profile;
        }
        let name = identity.username.clone().unwrap_or_else(|| "player".into());
        let profile = Profile::generate(&name);
        identity.profile = Some(profile.clone());
        if let Err(e) = self.save(&identity) {
            warn!("failed to persist profile: {e}");
        }
        profile
    }

    pub fn set_username(&self, username: &str) -> io::Result<()> {
        let mut identity = self.load();
        identity.username = Some(username.to_string());
        if let Some(profile) = identity.profile.as_mut() {
            profile.name = username.to_string();
        }
        self.save(&identity)
    }

    /// Record that this player created `room` and should come back as host.
    pub fn mark_host(&self, room: &RoomId) -> io::Result<()> {
        let mut identity = self.load();
        identity.host_rooms.insert(room.as_str().to_string());
        self.save(&identity)
    }

    /// Whether this player originally created `room`.
    pub fn is_host(&self, room: &RoomId) -> bool {
        self.load().host_rooms.contains(room.as_str())
    }

    pub fn clear_host(&self, room: &RoomId) -> io::Result<()> {
        let mut identity = self.load();
        identity.host_rooms.remove(room.as_str());
        self.save(&identity)
    }
}
