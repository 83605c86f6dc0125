/// Collaboration server configuration, loaded from environment variables.
/// Everything has a development default; nothing is required.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the server binds to.
    pub port: u16,
    /// Exact origin allowed by CORS; `None` allows any origin (dev mode).
    pub allowed_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            port: std::env::var("COLLAB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            allowed_origin: std::env::var("COLLAB_ALLOWED_ORIGIN").ok(),
        }
    }
}
