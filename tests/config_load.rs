// tests/config_load.rs
use std::{env, fs};

use feed_courier::config::{Config, DeclaredCategory, SourceKind, ENV_CONFIG_PATH, ENV_TELEGRAM_CHAT_ID, ENV_TELEGRAM_TOKEN};
use feed_courier::error::ConfigError;
use feed_courier::Category;

const SAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/courier.toml");

#[serial_test::serial]
#[test]
fn shipped_sample_loads_with_env_credentials() {
    env::set_var(ENV_TELEGRAM_TOKEN, "42:secret");
    env::set_var(ENV_TELEGRAM_CHAT_ID, "@neuro");
    env::set_var(ENV_CONFIG_PATH, SAMPLE);

    let cfg = Config::load_default().expect("sample config loads");

    assert_eq!(cfg.telegram.token, "42:secret");
    assert_eq!(cfg.telegram.chat_id, "@neuro");
    assert!(!format!("{:?}", cfg.telegram).contains("42:secret"), "token never printed");
    assert_eq!(cfg.sources.len(), 3);
    assert_eq!(cfg.sources[0].category, DeclaredCategory::Fixed(Category::News));
    assert_eq!(cfg.sources[1].kind, SourceKind::Api);
    assert_eq!(cfg.sources[1].placeholder_credentials(), vec!["api_key"]);
    assert_eq!(cfg.sources[2].category, DeclaredCategory::Mixed);

    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_TELEGRAM_TOKEN);
    env::remove_var(ENV_TELEGRAM_CHAT_ID);
}

#[serial_test::serial]
#[test]
fn env_token_missing_is_invalid() {
    env::remove_var(ENV_TELEGRAM_TOKEN);
    let toml = r#"
        [telegram]
        token = "ENV"
        chat_id = "@c"
    "#;
    let err = Config::from_toml_str(toml).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(m) if m.contains(ENV_TELEGRAM_TOKEN)));
}

#[serial_test::serial]
#[test]
fn explicit_path_read_errors_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    env::set_var(ENV_CONFIG_PATH, &missing);

    let err = Config::load_default().unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));

    env::remove_var(ENV_CONFIG_PATH);
}

#[test]
fn invalid_values_are_rejected_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let cases = [
        ("[settings]\nrun_interval_minutes = 0\n[delivery]\ndry_run = true\n", "run_interval"),
        ("[settings]\nmax_stored_urls = 0\n[delivery]\ndry_run = true\n", "max_stored_urls"),
        (
            "[delivery]\ndry_run = true\n[[sources]]\nname = \"X\"\nkind = \"website\"\nurl = \"not a url\"\n",
            "bad url",
        ),
        (
            "[delivery]\ndry_run = true\n[[sources]]\nname = \"X\"\nkind = \"website\"\nurl = \"https://x.org\"\nmax_pages = 0\n",
            "max_pages",
        ),
    ];
    for (i, (toml, needle)) in cases.iter().enumerate() {
        let p = dir.path().join(format!("c{i}.toml"));
        fs::write(&p, toml).unwrap();
        match Config::load_from(&p) {
            Err(ConfigError::Invalid(m)) => assert!(m.contains(needle), "{m} should mention {needle}"),
            other => panic!("case {i}: expected Invalid, got {other:?}"),
        }
    }
}

#[test]
fn unknown_kind_is_a_parse_error() {
    let toml = "[delivery]\ndry_run = true\n[[sources]]\nname = \"X\"\nkind = \"rss\"\nurl = \"https://x.org\"\n";
    assert!(matches!(Config::from_toml_str(toml), Err(ConfigError::Parse(_))));
}
