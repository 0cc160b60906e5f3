//! Config file parsing and credential resolution.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use imagecast::config::{Config, DEFAULT_TIMEOUT_SECS, builtin_providers};
use imagecast::dispatch::registry::{AsyncPollProviderType, ProtocolMode};
use imagecast::error::ImagecastError;
use tokio_test::{assert_err, assert_ok};

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name: &str| map.get(name).cloned()
}

#[test]
fn empty_file_uses_builtin_defaults() {
    let config = assert_ok!(Config::from_toml_str("", env_from(&[("HOME", "/home/ada")])));

    assert_eq!(config.output_dir, PathBuf::from("/home/ada/generated_images"));
    assert_eq!(config.default_size.width, 1024);
    assert_eq!(config.default_size.height, 2048);
    assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));

    let keys: Vec<&str> = config.providers.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys, vec!["siliconflow", "openai", "aliyun", "modelscope"]);
    assert!(config.providers.iter().all(|p| !p.is_enabled()));
    assert!(config.publish_registry().is_empty());
}

#[test]
fn default_deadline_leaves_room_for_every_poll_budget() {
    let config = Config::from_toml_str("", env_from(&[])).unwrap();
    for provider in &config.providers {
        if let ProtocolMode::AsyncPoll { poll, .. } = &provider.protocol {
            let budget = poll.interval * poll.max_attempts;
            assert!(
                config.timeout >= budget + Duration::from_secs(30),
                "{} polls for {budget:?}, deadline {:?}",
                provider.key,
                config.timeout
            );
        }
    }
}

#[test]
fn builtin_credentials_come_from_env() {
    let config = Config::from_toml_str(
        "",
        env_from(&[("SILICONFLOW_API_KEY", "sf"), ("DASHSCOPE_API_KEY", "ds")]),
    )
    .unwrap();
    let registry = config.provider_registry();

    let enabled: Vec<&str> = registry.enabled().into_iter().map(|p| p.key.as_str()).collect();
    assert_eq!(enabled, vec!["siliconflow", "aliyun"]);

    let aliyun = registry.get("aliyun").unwrap();
    match &aliyun.protocol {
        ProtocolMode::AsyncPoll { api, poll } => {
            assert_eq!(*api, AsyncPollProviderType::DashScope);
            assert_eq!(poll.interval, Duration::from_secs(2));
            assert_eq!(poll.max_attempts, 30);
        }
        other => panic!("expected async poll, got {other:?}"),
    }
    assert_eq!(builtin_providers().len(), registry.len());
}

#[test]
fn file_providers_replace_builtins_and_keep_order() {
    let toml = r#"
output_dir = "/srv/images"
width = 768
height = 1024
timeout_secs = 90

[[providers]]
key = "zeta"
env_key = "ZETA_KEY"
url = "https://zeta.example/v1"
model = "z-1"
protocol = "sync"

[[providers]]
key = "alpha"
api_key = "literal"
model = "Qwen/Qwen-Image"
protocol = "modelscope"
poll_interval_ms = 500
max_poll_attempts = 4
"#;
    let config = Config::from_toml_str(toml, env_from(&[("ZETA_KEY", "zk")])).unwrap();

    assert_eq!(config.output_dir, PathBuf::from("/srv/images"));
    assert_eq!(config.default_size.to_string(), "768x1024");
    assert_eq!(config.timeout, Duration::from_secs(90));

    let registry = config.provider_registry();
    let keys: Vec<&str> = registry.list().into_iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys, vec!["zeta", "alpha"]);

    let alpha = registry.get("alpha").unwrap();
    assert!(alpha.is_enabled());
    assert_eq!(alpha.name, "alpha");
    assert_eq!(alpha.base_url, "https://api-inference.modelscope.cn");
    match &alpha.protocol {
        ProtocolMode::AsyncPoll { api, poll } => {
            assert_eq!(*api, AsyncPollProviderType::ModelScope);
            assert_eq!(poll.interval, Duration::from_millis(500));
            assert_eq!(poll.max_attempts, 4);
        }
        other => panic!("expected async poll, got {other:?}"),
    }
}

#[test]
fn env_credential_wins_over_literal_and_disabled_flag_wins_over_both() {
    let toml = r#"
[[providers]]
key = "a"
env_key = "A_KEY"
api_key = "from-file"
url = "https://a.example"
model = "m"
protocol = "sync"

[[providers]]
key = "b"
api_key = "present"
url = "https://b.example"
model = "m"
protocol = "sync"
enabled = false
"#;
    let config = Config::from_toml_str(toml, env_from(&[("A_KEY", "from-env")])).unwrap();
    assert_eq!(config.providers[0].api_key, "from-env");
    assert!(!config.providers[1].is_enabled());
    // Listed but not invocable
    assert_eq!(config.provider_registry().list().len(), 2);
}

#[test]
fn sync_provider_without_url_is_rejected() {
    let toml = r#"
[[providers]]
key = "a"
model = "m"
protocol = "sync"
"#;
    let err = assert_err!(Config::from_toml_str(toml, env_from(&[])));
    assert!(matches!(err, ImagecastError::Config(_)), "got {err:?}");
}

#[test]
fn zero_poll_budget_is_rejected() {
    let toml = r#"
[[providers]]
key = "a"
model = "m"
protocol = "dashscope"
max_poll_attempts = 0
"#;
    assert_err!(Config::from_toml_str(toml, env_from(&[])));
}

#[test]
fn invalid_default_size_is_rejected() {
    assert_err!(Config::from_toml_str("width = 0", env_from(&[])));
    assert_err!(Config::from_toml_str("height = 100000", env_from(&[])));
}

#[test]
fn unknown_protocol_is_a_parse_error() {
    let toml = r#"
[[providers]]
key = "a"
model = "m"
protocol = "carrier-pigeon"
"#;
    let err = Config::from_toml_str(toml, env_from(&[])).unwrap_err();
    assert!(matches!(err, ImagecastError::Config(_)));
}

#[test]
fn aliyun_is_an_alias_for_dashscope() {
    let toml = r#"
[[providers]]
key = "bailian"
model = "wanx-v1"
protocol = "aliyun"
"#;
    let config = Config::from_toml_str(toml, env_from(&[])).unwrap();
    assert_eq!(config.providers[0].protocol.name(), "async_poll");
    assert_eq!(
        config.providers[0].base_url,
        "https://dashscope.aliyuncs.com/api/v1"
    );
}

#[test]
fn publish_sections_build_targets() {
    let toml = r#"
[publish.xiaohongshu]
enabled = true
cookies = "web_session=1"

[publish.douyin]
enabled = true

[publish.bilibili]
enabled = false

[[publish.custom]]
key = "blog"
name = "My Blog"
url = "https://blog.example/upload"
auth_header = "Bearer t"
"#;
    let config = Config::from_toml_str(toml, env_from(&[])).unwrap();
    let registry = config.publish_registry();

    assert_eq!(registry.platforms(), vec!["xiaohongshu", "douyin", "blog"]);
    let list = registry.list();
    assert!(list[0].capability.has_credentials);
    assert!(!list[1].capability.implemented);
    assert_eq!(list[2].name, "My Blog");
}

#[test]
fn missing_file_falls_back_to_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.providers.len(), builtin_providers().len());
}

#[test]
fn load_from_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("imagecast.toml");
    std::fs::write(
        &path,
        "output_dir = \"/tmp/out\"\n[[providers]]\nkey = \"x\"\nurl = \"https://x\"\nmodel = \"m\"\nprotocol = \"sync\"\n",
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
    assert_eq!(config.providers.len(), 1);
    assert_eq!(config.providers[0].key, "x");

    std::fs::write(&path, "providers = 3").unwrap();
    assert!(matches!(
        Config::load_from(&path),
        Err(ImagecastError::Config(_))
    ));
}
