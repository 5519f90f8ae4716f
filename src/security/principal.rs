use std::fmt;

/// The security principal a token represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    name: String,
    authentication_type: String,
}

impl Principal {
    /// Creates a principal authenticated through `Negotiate`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_authentication(name, "Negotiate")
    }

    /// Creates a principal with an explicit authentication type (`NTLM`, `Kerberos`, ...).
    pub fn with_authentication(name: impl Into<String>, authentication_type: impl Into<String>) -> Self {
        Principal {
            name: name.into(),
            authentication_type: authentication_type.into(),
        }
    }

    /// Account name, e.g. `CONTOSO\alice`
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the principal was authenticated
    #[must_use]
    pub fn authentication_type(&self) -> &str {
        &self.authentication_type
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
