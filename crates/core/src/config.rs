use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `LOYALTY_EXPRESS__` and TOML config files.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

/// Catalog extensions layered on top of the built-in enumerations, so
/// tenants can introduce new earning domains or conflict groups without a
/// code change.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub extra_earning_domains: Vec<String>,
    #[serde(default)]
    pub extra_conflict_groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_rules_enabled")]
    pub enabled: bool,
    /// Upper bound on table-formula rows accepted at authoring time.
    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,
    /// Upper bound on hybrid bonus entries accepted at authoring time.
    #[serde(default = "default_max_hybrid_bonuses")]
    pub max_hybrid_bonuses: usize,
}

fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_rules_enabled() -> bool {
    true
}
fn default_max_table_rows() -> usize {
    50
}
fn default_max_hybrid_bonuses() -> usize {
    16
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            extra_earning_domains: Vec::new(),
            extra_conflict_groups: Vec::new(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            enabled: default_rules_enabled(),
            max_table_rows: default_max_table_rows(),
            max_hybrid_bonuses: default_max_hybrid_bonuses(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            catalog: CatalogConfig::default(),
            rules: RulesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("LOYALTY_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
