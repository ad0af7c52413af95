//! Join token parsing and inbound path rules.

/// Credential used to authenticate against and locate the state node.
///
/// The wire form is `secret@uri`, split once on the first `@`. A token
/// without `@` is an address with an empty secret (open cluster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinToken {
    pub secret: String,
    pub uri: String,
}

impl JoinToken {
    pub fn parse(token: &str) -> Self {
        match token.find('@') {
            None => Self {
                secret: String::new(),
                uri: token.to_string(),
            },
            Some(at) => Self {
                secret: token[..at].to_string(),
                uri: token[at + 1..].to_string(),
            },
        }
    }
}

/// Normalize an inbound base path.
///
/// `""` and `"/"` collapse to `""`; anything else gains a leading `/`
/// unless already prefixed, so downstream URL concatenation never
/// produces double or missing slashes.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        String::new()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
