use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two fixed chat participants. The set is closed by design:
/// this client is a private two-person channel, not a general chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    He,
    She,
}

impl Identity {
    pub const ALL: [Identity; 2] = [Identity::He, Identity::She];

    pub fn label(&self) -> &'static str {
        match self {
            Identity::He => "He",
            Identity::She => "She",
        }
    }

    pub fn from_label(label: &str) -> Option<Identity> {
        Identity::ALL
            .into_iter()
            .find(|identity| identity.label().eq_ignore_ascii_case(label))
    }

    pub fn initial(&self) -> char {
        match self {
            Identity::He => 'H',
            Identity::She => 'S',
        }
    }

    /// Presentation hint only; never inspected by the core.
    pub fn accent(&self) -> &'static str {
        match self {
            Identity::He => "blue",
            Identity::She => "pink",
        }
    }

    pub fn peer(&self) -> Identity {
        match self {
            Identity::He => Identity::She,
            Identity::She => Identity::He,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque document id assigned by the remote store on first durable write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Plain,
    Gif,
    Image,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_round_trips_case_insensitively() {
        assert_eq!(Identity::from_label("He"), Some(Identity::He));
        assert_eq!(Identity::from_label("she"), Some(Identity::She));
        assert_eq!(Identity::from_label("SHE"), Some(Identity::She));
        assert_eq!(Identity::from_label("They"), None);
    }

    #[test]
    fn peer_is_the_other_participant() {
        assert_eq!(Identity::He.peer(), Identity::She);
        assert_eq!(Identity::She.peer(), Identity::He);
    }
}
