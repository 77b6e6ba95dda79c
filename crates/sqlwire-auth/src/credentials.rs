//! Authentication methods.

use std::fmt;

use crate::error::AuthError;

/// How a connection authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// SQL Server login with user name and password.
    SqlServer {
        /// Login name.
        user: String,
        /// Password, scrambled only when LOGIN7 is built.
        password: String,
    },

    /// Windows login with explicit domain credentials.
    Windows {
        /// Domain, possibly empty.
        domain: String,
        /// User name.
        user: String,
        /// Password.
        password: String,
    },

    /// The current process's Windows or Kerberos identity.
    WindowsIntegrated,
}

impl AuthMethod {
    /// SQL Server login.
    pub fn sql_server(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::SqlServer {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Windows login with explicit credentials.
    pub fn windows(
        domain: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::Windows {
            domain: domain.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Split a `DOMAIN\user` login into a Windows method, or `None` if the
    /// name has no domain part.
    pub fn windows_from_login(login: &str, password: impl Into<String>) -> Option<Self> {
        let (domain, user) = login.split_once('\\')?;
        Some(Self::windows(domain, user, password))
    }

    /// Whether login carries an SSPI token instead of a password.
    #[must_use]
    pub fn uses_sspi(&self) -> bool {
        !matches!(self, Self::SqlServer { .. })
    }

    /// Human-readable method name.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::SqlServer { .. } => "SQL Server",
            Self::Windows { .. } => "Windows",
            Self::WindowsIntegrated => "Windows integrated",
        }
    }

    /// Fail early when the method cannot run here.
    ///
    /// Windows methods need a security context provider: either one supplied
    /// by the caller (`has_custom_context`), or for `WindowsIntegrated` the
    /// built-in GSSAPI provider from the `integrated-auth` feature.
    pub fn check_platform_support(&self, has_custom_context: bool) -> Result<(), AuthError> {
        let supported = match self {
            Self::SqlServer { .. } => true,
            Self::Windows { .. } => has_custom_context,
            Self::WindowsIntegrated => has_custom_context || cfg!(feature = "integrated-auth"),
        };
        if supported {
            Ok(())
        } else {
            Err(AuthError::UnsupportedPlatform {
                method: self.method_name(),
            })
        }
    }
}

impl Default for AuthMethod {
    fn default() -> Self {
        Self::sql_server("", "")
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never expose passwords in debug output
        match self {
            Self::SqlServer { user, .. } => f
                .debug_struct("SqlServer")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Windows { domain, user, .. } => f
                .debug_struct("Windows")
                .field("domain", domain)
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::WindowsIntegrated => f.write_str("WindowsIntegrated"),
        }
    }
}
