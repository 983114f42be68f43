// Session bootstrap
// Resolves how a page should come up from its query string: which room,
// which game, and whether a bare game page must bounce through the shell

use crate::identity::RoomId;

/// Query keys that may carry the room identifier, in lookup order.
const ROOM_KEYS: &[&str] = &["lobbyId", "party", "p"];
const GAME_KEY: &str = "game";

/// How the party shell should come up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellBootstrap {
    /// A room id was present; start the protocol.
    Join {
        room: RoomId,
        game: Option<String>,
    },
    /// No room id; ask the user to create or join one before any
    /// protocol traffic starts.
    NeedsRoom,
}

/// How a game page should come up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameBootstrap {
    /// Running inside the shell; attach to the relay.
    Embedded,
    /// Loaded bare; the page must be reached through the relay, so send
    /// the player to the shell with this game preselected.
    RedirectToShell { url: String },
}

/// Split a query string (with or without the leading `?`) into decoded
/// key/value pairs.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn query_get<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Resolve the shell's startup from its query string.
pub fn resolve_shell(query: &str) -> ShellBootstrap {
    let pairs = parse_query(query);
    let room = ROOM_KEYS
        .iter()
        .find_map(|key| query_get(&pairs, key))
        .filter(|v| !v.is_empty());
    match room {
        Some(room) => ShellBootstrap::Join {
            room: RoomId::from(room),
            game: query_get(&pairs, GAME_KEY)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        },
        None => ShellBootstrap::NeedsRoom,
    }
}

/// Resolve a game page's startup. `embedded` is whether the page is
/// running inside the shell's frame.
pub fn resolve_game(embedded: bool, query: &str, shell_url: &str, game_path: &str) -> GameBootstrap {
    if embedded {
        return GameBootstrap::Embedded;
    }
    let pairs = parse_query(query);
    let mut url = format!(
        "{}?{}={}",
        shell_url,
        GAME_KEY,
        encode_component(game_path)
    );
    // Keep the room id, if the bare link carried one.
    if let Some(room) = ROOM_KEYS
        .iter()
        .find_map(|key| query_get(&pairs, key))
        .filter(|v| !v.is_empty())
    {
        url.push_str("&lobbyId=");
        url.push_str(&encode_component(room));
    }
    GameBootstrap::RedirectToShell { url }
}

fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi * 16 + lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char);
            }
            b => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
