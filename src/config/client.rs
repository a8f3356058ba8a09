use secrecy::SecretString;
use std::{fmt, sync::Arc};

use crate::{errors::ConfigError, supervisor::PoolHint, transport::tls};

/// Produces the password when the server asks for one. Called at most once
/// per authentication exchange; `None` ends the attempt.
pub type PasswordSupplier = Arc<dyn Fn() -> Option<SecretString> + Send + Sync>;

/// Decides whether a server that refuses SSL may be used in plaintext.
pub type SslFallback = Arc<dyn Fn(PoolHint, &ClientConfig) -> bool + Send + Sync>;

/// Policy used when none is configured: never fall back.
pub fn deny_fallback() -> SslFallback {
    Arc::new(|_, _| false)
}

// -----------------------------------------------------------------------------
// ----- TlsOptions ------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM encoded CA bundle the server certificate must chain to.
    pub ca_pem: Vec<u8>,
    /// Name checked against the certificate. Defaults to the target host.
    pub server_name: Option<String>,
}

impl TlsOptions {
    pub fn new(ca_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            ca_pem: ca_pem.into(),
            server_name: None,
        }
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("ca_pem", &format_args!("<{} bytes>", self.ca_pem.len()))
            .field("server_name", &self.server_name)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- ClientConfig ----------------------------------------------------------

/// Per-attempt connection settings. Immutable once handed to the engine.
#[derive(Clone, Default)]
pub struct ClientConfig {
    pub user: String,
    pub database: Option<String>,
    pub replication: bool,
    pub password: Option<PasswordSupplier>,
    pub tls: Option<TlsOptions>,
    pub params: Vec<(String, String)>,
}

// -----------------------------------------------------------------------------
// ----- ClientConfig: Builder -------------------------------------------------

impl ClientConfig {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn replication(mut self, on: bool) -> Self {
        self.replication = on;
        self
    }

    /// Fixed password, handed out every time the server asks.
    pub fn password(mut self, password: SecretString) -> Self {
        self.password = Some(Arc::new(move || Some(password.clone())));
        self
    }

    pub fn password_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> Option<SecretString> + Send + Sync + 'static,
    {
        self.password = Some(Arc::new(supplier));
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Extra startup parameter, e.g. `application_name`.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

// -----------------------------------------------------------------------------
// ----- ClientConfig: Public --------------------------------------------------

impl ClientConfig {
    pub fn database_or_user(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.user)
    }

    pub fn wants_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn supply_password(&self) -> Option<SecretString> {
        self.password.as_ref().and_then(|supplier| supplier())
    }

    /// Everything that can be rejected without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user.trim().is_empty() {
            return Err(ConfigError::MissingUser);
        }
        if self.user.contains('\0') {
            return Err(ConfigError::InteriorNul { field: "user" });
        }
        if self.database.as_deref().is_some_and(|db| db.contains('\0')) {
            return Err(ConfigError::InteriorNul { field: "database" });
        }
        if self
            .params
            .iter()
            .any(|(k, v)| k.contains('\0') || v.contains('\0'))
        {
            return Err(ConfigError::InteriorNul {
                field: "startup parameter",
            });
        }

        if let Some(opts) = &self.tls {
            if opts.ca_pem.iter().all(u8::is_ascii_whitespace) {
                return Err(ConfigError::MissingCa);
            }
            tls::root_store(&opts.ca_pem)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("user", &self.user)
            .field("database", &self.database)
            .field("replication", &self.replication)
            .field("password", &self.password.as_ref().map(|_| "<supplier>"))
            .field("tls", &self.tls)
            .field("params", &self.params)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- ConfigSource ----------------------------------------------------------

/// Hands out the configuration for a new connection in a given pool.
pub trait ConfigSource: Send + Sync {
    fn config_for(&self, hint: PoolHint) -> Arc<ClientConfig>;
}

impl ConfigSource for ClientConfig {
    fn config_for(&self, _hint: PoolHint) -> Arc<ClientConfig> {
        Arc::new(self.clone())
    }
}

impl<F> ConfigSource for F
where
    F: Fn(PoolHint) -> ClientConfig + Send + Sync,
{
    fn config_for(&self, hint: PoolHint) -> Arc<ClientConfig> {
        Arc::new(self(hint))
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn database_defaults_to_user() {
        let cfg = ClientConfig::new("alice");
        assert_eq!(cfg.database_or_user(), "alice");

        let cfg = cfg.database("app");
        assert_eq!(cfg.database_or_user(), "app");
    }

    #[test]
    fn empty_user_is_rejected() {
        assert_eq!(ClientConfig::new("").validate(), Err(ConfigError::MissingUser));
        assert_eq!(ClientConfig::new("  ").validate(), Err(ConfigError::MissingUser));
    }

    #[test]
    fn tls_without_ca_is_rejected() {
        let cfg = ClientConfig::new("alice").tls(TlsOptions::new(Vec::new()));
        assert_eq!(cfg.validate(), Err(ConfigError::MissingCa));
    }

    #[test]
    fn tls_with_garbage_ca_is_rejected() {
        let cfg = ClientConfig::new("alice").tls(TlsOptions::new(b"not a certificate".to_vec()));
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCa(_))));
    }

    #[test]
    fn interior_nul_is_rejected() {
        let cfg = ClientConfig::new("alice").database("a\0b");
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InteriorNul { field: "database" })
        );
    }

    #[test]
    fn supplier_is_consulted_on_demand() {
        let cfg = ClientConfig::new("alice").password(SecretString::from("pw"));
        let pw = cfg.supply_password().unwrap();
        assert_eq!(pw.expose_secret(), "pw");

        let cfg = ClientConfig::new("alice").password_supplier(|| None);
        assert!(cfg.supply_password().is_none());
        assert!(ClientConfig::new("alice").supply_password().is_none());
    }

    #[test]
    fn debug_hides_password_supplier() {
        let cfg = ClientConfig::new("alice").password(SecretString::from("hunter2"));
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<supplier>"));
    }

    #[test]
    fn closures_act_as_config_sources() {
        let source = |hint: PoolHint| match hint {
            PoolHint::Reserved => ClientConfig::new("reserved"),
            PoolHint::Idle => ClientConfig::new("idle"),
        };
        assert_eq!(source.config_for(PoolHint::Reserved).user, "reserved");
        assert_eq!(source.config_for(PoolHint::Idle).user, "idle");
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
