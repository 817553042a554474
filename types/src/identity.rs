use serde::{Deserialize, Serialize};

use crate::player::{DEFAULT_FIRST_NAME, DEFAULT_USERNAME};

/// Caller identity extracted from a verified launch credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable numeric identity, normalized to its decimal string.
    pub id: String,
    pub first_name: Option<String>,
    pub username: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            first_name: None,
            username: None,
        }
    }

    pub fn with_names(mut self, username: Option<&str>, first_name: Option<&str>) -> Self {
        self.username = username.map(str::to_string);
        self.first_name = first_name.map(str::to_string);
        self
    }

    pub fn username_or_default(&self) -> &str {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_USERNAME)
    }

    pub fn first_name_or_default(&self) -> &str {
        self.first_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FIRST_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_names_fall_back_to_defaults() {
        let identity = Identity::new("7").with_names(Some(""), None);
        assert_eq!(identity.username_or_default(), DEFAULT_USERNAME);
        assert_eq!(identity.first_name_or_default(), DEFAULT_FIRST_NAME);

        let identity = Identity::new("7").with_names(Some("ann"), Some("Ann"));
        assert_eq!(identity.username_or_default(), "ann");
        assert_eq!(identity.first_name_or_default(), "Ann");
    }
}
