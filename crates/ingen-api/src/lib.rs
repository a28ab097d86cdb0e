//! Ingen API - shared vocabulary for the modular audio graph server
//!
//! This crate defines the types spoken on both sides of the engine
//! boundary:
//!
//! - [`Path`] and [`Symbol`] for hierarchical entity identity
//! - [`Atom`] and [`Properties`] for typed property bags
//! - [`ClientMessage`] and [`Status`] for the message-oriented client
//!   interface
//!
//! No engine logic lives here; the realtime graph engine is in
//! `ingen-engine`.

pub mod atom;
pub mod message;
pub mod path;

// Re-export main types at crate root
pub use atom::{keys, uris, Atom, Properties};
pub use message::{ClientMessage, Status};
pub use path::{Path, PathError, Symbol};

/// URI base prefixed to entity paths (`<base>/<path>`, trailing slash
/// normalized).
pub const URI_BASE: &str = "ingen:/main";

/// Returns the URI of the entity at `path`.
pub fn path_to_uri(path: &Path) -> String {
    if path.is_root() {
        format!("{}/", URI_BASE)
    } else {
        format!("{}{}", URI_BASE, path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_of_root_has_trailing_slash() {
        assert_eq!(path_to_uri(&Path::root()), "ingen:/main/");
    }

    #[test]
    fn uri_of_nested_path() {
        let path = Path::parse("/synth/osc").unwrap();
        assert_eq!(path_to_uri(&path), "ingen:/main/synth/osc");
    }
}
