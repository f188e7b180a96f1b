use serde::{Deserialize, Serialize};

/// Top-level configuration for the agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub ice: IceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the embedded HTTP signaling server.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Default capture frame rate offered to new sessions.
    #[serde(default = "default_fps")]
    pub default_fps: u32,
    /// Default screen index offered to new sessions.
    #[serde(default)]
    pub default_screen: u32,
    /// Force a codec preference ("h264" or "vp8"); absent uses registry preference order.
    pub encoder: Option<String>,
}

/// STUN server configuration for WebRTC NAT traversal. No TURN support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    #[serde(default = "default_stun_url")]
    pub stun_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            video: VideoConfig::default(),
            ice: IceConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            default_fps: default_fps(),
            default_screen: 0,
            encoder: None,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_url: default_stun_url(),
        }
    }
}

impl AgentConfig {
    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal, process should not start) or
    /// "WARNING:" (advisory). Returns `Ok(())` if no issues.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push("ERROR: server.port must be between 1 and 65535, got 0.".to_string());
        }

        if self.video.default_fps == 0 || self.video.default_fps > 240 {
            issues.push(format!(
                "ERROR: video.default_fps must be between 1 and 240, got {}.",
                self.video.default_fps
            ));
        }

        if let Some(encoder) = &self.video.encoder
            && encoder != "h264"
            && encoder != "vp8"
        {
            issues.push(format!(
                "ERROR: video.encoder must be 'h264' or 'vp8', got '{encoder}'."
            ));
        }

        if !self.ice.stun_url.starts_with("stun:") && !self.ice.stun_url.starts_with("stuns:") {
            issues.push(format!(
                "ERROR: ice.stun_url '{}' must start with 'stun:' or 'stuns:'. \
                 Example: stun:stun.l.google.com:19302",
                self.ice.stun_url
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8443
}
fn default_fps() -> u32 {
    20
}
fn default_stun_url() -> String {
    "stun:stun.l.google.com:19302".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_from_empty_string() {
        let config: AgentConfig =
            toml::from_str("").expect("empty string should deserialize to default config");

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.video.default_fps, 20);
        assert_eq!(config.video.default_screen, 0);
        assert!(config.video.encoder.is_none());
        assert_eq!(config.ice.stun_url, "stun:stun.l.google.com:19302");
    }

    #[test]
    fn partial_config_only_video_section() {
        let toml_str = r#"
[video]
default_fps = 30
"#;
        let config: AgentConfig =
            toml::from_str(toml_str).expect("partial config should deserialize");
        assert_eq!(config.video.default_fps, 30);
        assert_eq!(config.video.default_screen, 0);
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.ice.stun_url, "stun:stun.l.google.com:19302");
    }

    #[test]
    fn custom_values_override_defaults() {
        let toml_str = r#"
[server]
bind = "127.0.0.1"
port = 9443

[video]
default_fps = 60
default_screen = 1
encoder = "vp8"

[ice]
stun_url = "stun:custom.example.com:3478"
"#;
        let config: AgentConfig =
            toml::from_str(toml_str).expect("full custom config should deserialize");
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.video.default_fps, 60);
        assert_eq!(config.video.default_screen, 1);
        assert_eq!(config.video.encoder.as_deref(), Some("vp8"));
        assert_eq!(config.ice.stun_url, "stun:custom.example.com:3478");
    }

    fn valid_config() -> AgentConfig {
        toml::from_str("").expect("default config")
    }

    fn validate_issues(config: &AgentConfig) -> Vec<String> {
        match config.validate() {
            Ok(()) => vec![],
            Err(issues) => issues,
        }
    }

    fn has_error(issues: &[String], substring: &str) -> bool {
        issues
            .iter()
            .any(|i| i.starts_with("ERROR:") && i.contains(substring))
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_port_zero_is_error() {
        let mut config = valid_config();
        config.server.port = 0;
        let issues = validate_issues(&config);
        assert!(has_error(&issues, "port"));
    }

    #[test]
    fn validate_fps_zero_is_error() {
        let mut config = valid_config();
        config.video.default_fps = 0;
        let issues = validate_issues(&config);
        assert!(has_error(&issues, "default_fps"));
    }

    #[test]
    fn validate_fps_241_is_error() {
        let mut config = valid_config();
        config.video.default_fps = 241;
        let issues = validate_issues(&config);
        assert!(has_error(&issues, "default_fps"));
    }

    #[test]
    fn validate_fps_240_is_ok() {
        let mut config = valid_config();
        config.video.default_fps = 240;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_unknown_encoder_is_error() {
        let mut config = valid_config();
        config.video.encoder = Some("av1".to_string());
        let issues = validate_issues(&config);
        assert!(has_error(&issues, "video.encoder"));
    }

    #[test]
    fn validate_stun_url_bad_prefix_is_error() {
        let mut config = valid_config();
        config.ice.stun_url = "http://stun.example.com:3478".to_string();
        let issues = validate_issues(&config);
        assert!(has_error(&issues, "stun_url"));
    }

    #[test]
    fn validate_stun_url_stuns_prefix_is_ok() {
        let mut config = valid_config();
        config.ice.stun_url = "stuns:stun.example.com:5349".to_string();
        assert!(config.validate().is_ok());
    }
}
