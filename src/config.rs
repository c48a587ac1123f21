use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Process-wide tunables, read once from the environment at startup.
///
/// This is a localhost development aid: there is no config file and no hot
/// reload. A malformed value is a startup-time panic, not a request-path
/// error — bootstrap is allowed to fail loudly.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,

    pub default_action_timeout: Duration,
    pub dom_snapshot_timeout: Duration,
    pub accessibility_tree_timeout: Duration,
    pub min_action_timeout: Duration,
    pub max_action_timeout: Duration,

    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub health_failure_threshold: u32,
    pub stale_session_threshold: Duration,
    pub sweep_interval: Duration,
    pub write_queue_depth: usize,
    pub write_timeout: Duration,

    pub cursor_ttl: Duration,

    pub max_html_bytes: usize,
    pub max_text_chars: usize,
    pub max_dom_nodes_default: usize,
    pub max_dom_nodes_ceiling: usize,
    pub dom_max_depth_default: usize,
    pub dom_max_depth_ceiling: usize,
    pub max_request_body_bytes: usize,
    pub max_response_body_bytes: usize,
    pub console_ring_buffer_limit: usize,
    pub debug_ring_buffer_limit: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8808".parse().expect("static default bind addr"),
            default_action_timeout: Duration::from_secs(10),
            dom_snapshot_timeout: Duration::from_secs(20),
            accessibility_tree_timeout: Duration::from_secs(30),
            min_action_timeout: Duration::from_secs(5),
            max_action_timeout: Duration::from_secs(120),
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            health_failure_threshold: 3,
            stale_session_threshold: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
            write_queue_depth: 32,
            write_timeout: Duration::from_secs(5),
            cursor_ttl: Duration::from_secs(5 * 60),
            max_html_bytes: 50_000,
            max_text_chars: 30_000,
            max_dom_nodes_default: 500,
            max_dom_nodes_ceiling: 2_000,
            dom_max_depth_default: 5,
            dom_max_depth_ceiling: 15,
            max_request_body_bytes: 10_000,
            max_response_body_bytes: 10_000,
            console_ring_buffer_limit: 100,
            debug_ring_buffer_limit: 100,
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .unwrap_or_else(|_| panic!("{key} must be an integer number of seconds, got {raw:?}"));
            Duration::from_secs(secs)
        }
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a non-negative integer, got {raw:?}")),
        Err(_) => default,
    }
}

impl Config {
    /// Build a `Config` from the environment, falling back to the defaults
    /// documented in the tool schemas. Panics on a malformed (present but
    /// unparseable) value — bootstrap failure is intentional here.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let bind_addr = match env::var("BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .unwrap_or_else(|_| panic!("BIND_ADDR must be a socket address, got {raw:?}")),
            Err(_) => defaults.bind_addr,
        };
        Self {
            bind_addr,
            default_action_timeout: env_duration_secs(
                "DEFAULT_ACTION_TIMEOUT_SECS",
                defaults.default_action_timeout,
            ),
            dom_snapshot_timeout: env_duration_secs(
                "DOM_SNAPSHOT_TIMEOUT_SECS",
                defaults.dom_snapshot_timeout,
            ),
            accessibility_tree_timeout: env_duration_secs(
                "ACCESSIBILITY_TREE_TIMEOUT_SECS",
                defaults.accessibility_tree_timeout,
            ),
            min_action_timeout: env_duration_secs(
                "MIN_ACTION_TIMEOUT_SECS",
                defaults.min_action_timeout,
            ),
            max_action_timeout: env_duration_secs(
                "MAX_ACTION_TIMEOUT_SECS",
                defaults.max_action_timeout,
            ),
            ping_interval: env_duration_secs("PING_INTERVAL_SECS", defaults.ping_interval),
            ping_timeout: env_duration_secs("PING_TIMEOUT_SECS", defaults.ping_timeout),
            health_failure_threshold: env_usize(
                "HEALTH_FAILURE_THRESHOLD",
                defaults.health_failure_threshold as usize,
            ) as u32,
            stale_session_threshold: env_duration_secs(
                "STALE_SESSION_THRESHOLD_SECS",
                defaults.stale_session_threshold,
            ),
            sweep_interval: env_duration_secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            write_queue_depth: env_usize("WRITE_QUEUE_DEPTH", defaults.write_queue_depth),
            write_timeout: env_duration_secs("WRITE_TIMEOUT_SECS", defaults.write_timeout),
            cursor_ttl: env_duration_secs("CURSOR_TTL_SECS", defaults.cursor_ttl),
            max_html_bytes: env_usize("MAX_HTML", defaults.max_html_bytes),
            max_text_chars: env_usize("MAX_TEXT", defaults.max_text_chars),
            max_dom_nodes_default: env_usize("MAX_DOM_NODES", defaults.max_dom_nodes_default),
            max_dom_nodes_ceiling: defaults.max_dom_nodes_ceiling,
            dom_max_depth_default: defaults.dom_max_depth_default,
            dom_max_depth_ceiling: defaults.dom_max_depth_ceiling,
            max_request_body_bytes: env_usize(
                "MAX_REQUEST_BODY",
                defaults.max_request_body_bytes,
            ),
            max_response_body_bytes: env_usize(
                "MAX_RESPONSE_BODY",
                defaults.max_response_body_bytes,
            ),
            console_ring_buffer_limit: defaults.console_ring_buffer_limit,
            debug_ring_buffer_limit: defaults.debug_ring_buffer_limit,
            default_page_size: defaults.default_page_size,
            max_page_size: defaults.max_page_size,
        }
    }

    /// Resolve the deadline duration for an action, honoring a caller-supplied
    /// override clamped to `[min_action_timeout, max_action_timeout]`.
    pub fn action_timeout(&self, action: &str, override_ms: Option<u64>) -> Duration {
        if let Some(ms) = override_ms {
            return Duration::from_millis(ms).clamp(self.min_action_timeout, self.max_action_timeout);
        }
        match action {
            bridge_protocol::actions::GET_ACCESSIBILITY_TREE => self.accessibility_tree_timeout,
            bridge_protocol::actions::GET_DOM_SNAPSHOT => self.dom_snapshot_timeout,
            _ => self.default_action_timeout,
        }
    }
}
