//! Security context derived from the `Authorization` header.
//!
//! Only HTTP Basic credentials are understood. Anything else, including a
//! Basic header that does not decode, leaves the request anonymous: the
//! bridge extracts credentials, it does not authenticate them.

use std::fmt;
use std::net::SocketAddr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Authentication scheme of a parsed `Authorization` header.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AuthScheme {
    Basic,
}

impl AuthScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
        }
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

/// Scheme, user and password taken from an `Authorization` header.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    scheme: AuthScheme,
    user: String,
    password: String,
}

impl Credentials {
    /// Parses an `Authorization` header value.
    ///
    /// The value must be exactly `<scheme> <token>`. For `Basic` the token is
    /// base64 of `user:password`; the password may itself contain `:`.
    /// Mail-style user names sent as `%40` are decoded to `@`.
    pub fn from_authorization(value: &str) -> Option<Self> {
        let mut parts = value.split(' ');
        let (scheme, token) = (parts.next()?, parts.next()?);
        if parts.next().is_some() || !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }

        let decoded = STANDARD.decode(token).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;

        Some(Self {
            scheme: AuthScheme::Basic,
            user: user.replace("%40", "@"),
            password: password.to_owned(),
        })
    }

    pub fn scheme(&self) -> AuthScheme { self.scheme }
    pub fn user(&self) -> &str { &self.user }
    pub fn password(&self) -> &str { &self.password }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("scheme", &self.scheme)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ── SecurityContext ───────────────────────────────────────────────────────────

/// Who sent the request and over what kind of channel.
#[derive(Clone, Debug, Default)]
pub struct SecurityContext {
    credentials: Option<Credentials>,
    secure: bool,
    remote_addr: Option<SocketAddr>,
}

impl SecurityContext {
    pub fn new(
        credentials: Option<Credentials>,
        secure: bool,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self { credentials, secure, remote_addr }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.credentials.is_none()
    }

    /// Name of the authenticated user, if any.
    pub fn user_principal(&self) -> Option<&str> {
        self.credentials.as_ref().map(Credentials::user)
    }

    pub fn auth_scheme(&self) -> Option<AuthScheme> {
        self.credentials.as_ref().map(Credentials::scheme)
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Whether the resolved request URI uses `https`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Builds the [`SecurityContext`] for each dispatched request.
///
/// Plug in a custom factory to map credentials onto application principals;
/// [`DefaultSecurityContextFactory`] stores them as-is.
pub trait SecurityContextFactory: Send + Sync + 'static {
    fn create(
        &self,
        credentials: Option<Credentials>,
        secure: bool,
        remote_addr: Option<SocketAddr>,
    ) -> SecurityContext;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSecurityContextFactory;

impl SecurityContextFactory for DefaultSecurityContextFactory {
    fn create(
        &self,
        credentials: Option<Credentials>,
        secure: bool,
        remote_addr: Option<SocketAddr>,
    ) -> SecurityContext {
        SecurityContext::new(credentials, secure, remote_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(raw: &str) -> String {
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[test]
    fn parses_basic_credentials() {
        let creds = Credentials::from_authorization(&basic("alice:s3cret")).unwrap();
        assert_eq!(creds.scheme(), AuthScheme::Basic);
        assert_eq!(creds.user(), "alice");
        assert_eq!(creds.password(), "s3cret");
    }

    #[test]
    fn decodes_at_sign_in_user() {
        let creds = Credentials::from_authorization(&basic("alice%40example.com:pw")).unwrap();
        assert_eq!(creds.user(), "alice@example.com");
    }

    #[test]
    fn password_may_contain_colons() {
        let creds = Credentials::from_authorization(&basic("bob:a:b:c")).unwrap();
        assert_eq!(creds.password(), "a:b:c");
    }

    #[test]
    fn other_schemes_are_anonymous() {
        assert!(Credentials::from_authorization("Bearer abc.def.ghi").is_none());
        assert!(Credentials::from_authorization("Basic").is_none());
        assert!(Credentials::from_authorization("Basic !!!notbase64").is_none());
        assert!(Credentials::from_authorization(&basic("no-colon")).is_none());
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::from_authorization(&basic("alice:s3cret")).unwrap();
        assert!(!format!("{creds:?}").contains("s3cret"));
    }
}
