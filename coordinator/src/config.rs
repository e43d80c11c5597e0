use envconfig::Envconfig;

/// Process-wide configuration, loaded once from the environment at startup.
///
/// Every value the original tool hard-coded (SSH target ports, analytics
/// credentials, the broker/database pod names the reset orchestrator execs
/// into) is surfaced here instead.
#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8090")]
    pub port: u16,

    #[envconfig(from = "REGISTRY_PATH", default = "./data/nodes.yaml")]
    pub registry_path: String,

    #[envconfig(from = "SWITCHBOARD_PATH", default = "./data/o11y/switchboard.yaml")]
    pub switchboard_path: String,

    #[envconfig(from = "SOURCES_DIR", default = "./data/o11y/sources")]
    pub sources_dir: String,

    #[envconfig(from = "MAX_EPS_PATH", default = "./data/o11y/max_eps.yaml")]
    pub max_eps_path: String,

    #[envconfig(from = "TOPICS_TABLES_PATH", default = "./data/o11y/topics_tables.yaml")]
    pub topics_tables_path: String,

    #[envconfig(from = "SSH_PORT", default = "22")]
    pub ssh_port: u16,

    #[envconfig(from = "SSH_CONNECT_TIMEOUT_SECS", default = "10")]
    pub ssh_connect_timeout_secs: u64,

    #[envconfig(from = "SSH_RETRIES", default = "3")]
    pub ssh_retries: u32,

    #[envconfig(from = "ANALYTICS_HOST", default = "")]
    pub analytics_host: String,

    #[envconfig(from = "ANALYTICS_HTTP_PORT", default = "8123")]
    pub analytics_http_port: u16,

    #[envconfig(from = "ANALYTICS_DATABASE", default = "default")]
    pub analytics_database: String,

    #[envconfig(from = "ANALYTICS_USER", default = "default")]
    pub analytics_user: String,

    #[envconfig(from = "ANALYTICS_PASSWORD", default = "")]
    pub analytics_password: String,

    #[envconfig(from = "ANALYTICS_CACHE_TTL_SECS", default = "30")]
    pub analytics_cache_ttl_secs: u64,

    #[envconfig(from = "ANALYTICS_QUERY_TIMEOUT_SECS", default = "60")]
    pub analytics_query_timeout_secs: u64,

    #[envconfig(from = "KAFKA_BROKER_POD", default = "kafka-broker-0")]
    pub kafka_broker_pod: String,

    #[envconfig(from = "KAFKA_NAMESPACE", default = "default")]
    pub kafka_namespace: String,

    #[envconfig(from = "ANALYTICS_DB_POD", default = "clickhouse-0")]
    pub analytics_db_pod: String,

    #[envconfig(from = "ANALYTICS_DB_NAMESPACE", default = "default")]
    pub analytics_db_namespace: String,

    #[envconfig(from = "ANALYTICS_CLUSTER_NAME", default = "cluster")]
    pub analytics_cluster_name: String,

    #[envconfig(from = "METRICS_POLL_INTERVAL_SECS", default = "5")]
    pub metrics_poll_interval_secs: u64,

    #[envconfig(from = "METRICS_POLL_TIMEOUT_SECS", default = "2")]
    pub metrics_poll_timeout_secs: u64,

    /// Unit is fixed as minutes, not seconds, regardless of what a stale
    /// comment elsewhere in the fleet might claim.
    #[envconfig(from = "GENERATOR_TIMEOUT_MINUTES", default = "0")]
    pub generator_timeout_minutes: u64,

    #[envconfig(from = "ANALYTICS_K8S_NODE_LIST", default = "")]
    pub analytics_k8s_node_list: String,

    #[envconfig(from = "ANALYTICS_POD_LIST", default = "")]
    pub analytics_pod_list: String,

    #[envconfig(from = "ANALYTICS_TOPIC_LIST", default = "")]
    pub analytics_topic_list: String,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn analytics_configured(&self) -> bool {
        !self.analytics_host.is_empty()
    }

    fn split_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn analytics_k8s_nodes(&self) -> Vec<String> {
        Self::split_list(&self.analytics_k8s_node_list)
    }

    pub fn analytics_pods(&self) -> Vec<String> {
        Self::split_list(&self.analytics_pod_list)
    }

    pub fn analytics_topics(&self) -> Vec<String> {
        Self::split_list(&self.analytics_topic_list)
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config::init_from_env().unwrap_or_else(|_| {
            std::env::set_var("BIND_HOST", "0.0.0.0");
            Config::init_from_env().expect("default config must init")
        })
    }
}
