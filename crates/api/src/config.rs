//! Server configuration loaded from environment variables.

/// All fields have defaults suitable for local development; override via
/// environment variables in production.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// Reasoning service settings.
    pub reasoning: ReasoningConfig,
    /// Generation target API settings.
    pub targets: TargetsConfig,
    /// Running-job TTL in seconds (default: `600`).
    pub job_ttl_secs: u64,
}

/// Reasoning service connection settings.
#[derive(Debug, Clone)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

/// Generation target connection settings.
#[derive(Debug, Clone)]
pub struct TargetsConfig {
    pub base_url: String,
    pub api_key: String,
    pub veo_model: String,
    pub imagen_model: String,
    pub lyria_model: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var           | Default                                        |
    /// |-------------------|------------------------------------------------|
    /// | `HOST`            | `0.0.0.0`                                      |
    /// | `PORT`            | `3000`                                         |
    /// | `CORS_ORIGINS`    | `http://localhost:5173`                        |
    /// | `GEMINI_BASE_URL` | `https://generativelanguage.googleapis.com`    |
    /// | `GEMINI_MODEL`    | `gemini-2.0-flash`                             |
    /// | `GEMINI_API_KEY`  | (required)                                     |
    /// | `VEO_MODEL`       | `veo-3.0-generate-001`                         |
    /// | `IMAGEN_MODEL`    | `imagen-4.0-generate-001`                      |
    /// | `LYRIA_MODEL`     | `lyria-002`                                    |
    /// | `JOB_TTL_SECS`    | `600`                                          |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let job_ttl_secs: u64 = std::env::var("JOB_TTL_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("JOB_TTL_SECS must be a valid u64");

        let api_base = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into());
        let api_key = std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY must be set");

        Self {
            host,
            port,
            cors_origins,
            reasoning: ReasoningConfig {
                base_url: api_base.clone(),
                model: std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into()),
                api_key: api_key.clone(),
            },
            targets: TargetsConfig {
                base_url: api_base,
                api_key,
                veo_model: std::env::var("VEO_MODEL")
                    .unwrap_or_else(|_| "veo-3.0-generate-001".into()),
                imagen_model: std::env::var("IMAGEN_MODEL")
                    .unwrap_or_else(|_| "imagen-4.0-generate-001".into()),
                lyria_model: std::env::var("LYRIA_MODEL").unwrap_or_else(|_| "lyria-002".into()),
            },
            job_ttl_secs,
        }
    }
}
