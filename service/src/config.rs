use std::env;

/// Process-level settings: the ambient `DATABASE_URL`/`HOST`/`PORT`
/// `main.rs` reads, plus the `CoreConfig` values the core itself
/// parameterizes idempotency and the fee engine with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub payment_provider_base_url: String,
    pub core: txn_core::config::CoreConfig,
}

impl Settings {
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);
        let payment_provider_base_url = env::var("PAYMENT_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());

        Self {
            database_url,
            host,
            port,
            payment_provider_base_url,
            core: txn_core::config::CoreConfig::from_env(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
