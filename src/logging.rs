use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type InitError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_FILTER: &str = "info,sqlx=warn";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Loki push endpoint; console-only when unset
    pub loki_url: Option<String>,
    pub service_name: String,
    pub environment: String,
    pub filter: String,
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `LOKI_URL` is only honoured when `LOKI_ENABLED` is true. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let loki_enabled = match get("LOKI_ENABLED") {
            Some(v) => v.parse::<bool>().map_err(|_| format!("LOKI_ENABLED must be true or false, got {}", v))?,
            None => false,
        };
        let loki_url = match (loki_enabled, get("LOKI_URL")) {
            (true, None) => return Err("LOKI_ENABLED is true but LOKI_URL is not set".to_string()),
            (true, url) => url,
            (false, _) => None,
        };

        Ok(Self {
            loki_url,
            service_name: get("SERVICE_NAME").unwrap_or_else(|| "chatmeter".to_string()),
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            filter: get("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        })
    }
}

/// Install the global subscriber: env filter plus console output, and a Loki
/// layer when configured. Must be called from inside the tokio runtime.
pub fn init_logging(config: &LoggingConfig) -> Result<(), InitError> {
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.filter)?)
        .with(fmt::layer().with_target(false));

    #[cfg(feature = "loki")]
    {
        if let Some(loki_url) = &config.loki_url {
            let (loki, shipper) = tracing_loki::builder()
                .label("service", &config.service_name)?
                .label("environment", &config.environment)?
                .build_url(url::Url::parse(loki_url)?)?;

            subscriber.with(loki).try_init()?;
            tokio::spawn(shipper);
            tracing::info!("✅ Logging to console and Loki at {} ({})", loki_url, config.environment);
            return Ok(());
        }
    }

    subscriber.try_init()?;
    tracing::info!("📊 Logging to console ({}, filter {})", config.environment, config.filter);
    Ok(())
}
