use std::env;
use std::str::FromStr;
use tracing::warn;

/// Where per-doctor token counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterBackend {
    Supabase,
    Redis,
    Memory,
}

impl FromStr for CounterBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(CounterBackend::Supabase),
            "redis" => Ok(CounterBackend::Redis),
            "memory" | "in-memory" => Ok(CounterBackend::Memory),
            other => Err(format!("Unknown token counter backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_key: Option<String>,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    pub counter_backend: CounterBackend,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok(),
            counter_backend: env::var("TOKEN_COUNTER_BACKEND")
                .ok()
                .map(|raw| Self::parse_backend(&raw))
                .unwrap_or(CounterBackend::Supabase),
            port: env::var("PORT")
                .ok()
                .and_then(|raw| {
                    raw.parse::<u16>().map_err(|_| warn!("PORT is not a valid port number: {}", raw)).ok()
                })
                .unwrap_or(3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.counter_backend == CounterBackend::Redis && config.redis_url.is_none() {
            warn!("TOKEN_COUNTER_BACKEND is redis but REDIS_URL is not set, using default");
        }

        config
    }

    fn parse_backend(raw: &str) -> CounterBackend {
        raw.parse().unwrap_or_else(|e: String| {
            warn!("{}, falling back to supabase", e);
            CounterBackend::Supabase
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn redis_url_or_default(&self) -> String {
        self.redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string())
    }
}
