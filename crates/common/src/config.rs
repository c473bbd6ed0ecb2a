use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Anything other than `production`/`prod` (any case) is development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }
}
