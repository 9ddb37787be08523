use std::fs;

use dllcall::config::{Config, ConfigError, OutputKind, CONFIG_FILE};
use dllcall::LogFormat;
use tempfile::TempDir;

#[test]
fn test_from_file_reads_both_sections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE);
    fs::write(
        &path,
        r#"
[logging]
level = "trace"
format = "pretty"
output = "stdout"
filter = "dllcall_runtime=trace"

[loader]
default_libraries = ["libc.so.6"]
"#,
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert_eq!(config.logging.output, OutputKind::Stdout);
    assert_eq!(config.loader.default_libraries, vec!["libc.so.6".to_string()]);

    let loader = config.loader.to_loader_config();
    assert_eq!(loader.default_libraries, vec!["libc.so.6".to_string()]);
    assert!(config.logging.to_log_config().is_ok());
}

#[test]
fn test_find_walks_up_to_parent() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();
    fs::write(dir.path().join(CONFIG_FILE), "[loader]\nsearch_process = false\n").unwrap();

    let found = Config::find(&nested).unwrap();
    assert_eq!(found, dir.path().join(CONFIG_FILE));
    assert!(!Config::from_file(&found).unwrap().loader.search_process);
}

#[test]
fn test_missing_and_malformed_files() {
    let dir = TempDir::new().unwrap();

    let missing = Config::from_file(&dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(ConfigError::Io { .. })));

    let path = dir.path().join(CONFIG_FILE);
    fs::write(&path, "[logging\nlevel = ").unwrap();
    match Config::from_file(&path) {
        Err(ConfigError::Parse { path: Some(reported), .. }) => assert_eq!(reported, path),
        other => panic!("expected parse error, got {:?}", other),
    }
}
