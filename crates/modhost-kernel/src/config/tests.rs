use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_detect_format() {
    assert_eq!(detect_format(Path::new("modhost.yaml")).unwrap(), FileFormat::Yaml);
    assert_eq!(detect_format(Path::new("modhost.yml")).unwrap(), FileFormat::Yaml);
    assert_eq!(detect_format(Path::new("modhost.toml")).unwrap(), FileFormat::Toml);
    assert_eq!(detect_format(Path::new("modhost.json")).unwrap(), FileFormat::Json);
    assert!(detect_format(Path::new("modhost.txt")).is_err());
    assert!(detect_format(Path::new("modhost")).is_err());
}

#[test]
fn test_defaults() {
    let config = RuntimeConfig::default();
    assert_eq!(config.extensions, vec!["mpk".to_string()]);
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert!(config.skip_prefixes.iter().any(|p| p == "std."));
}

#[test]
fn test_partial_file_keeps_defaults() {
    let config: RuntimeConfig = from_str(
        r#"
watch_dir = "/srv/modules"
poll_interval_ms = 250
"#,
        FileFormat::Toml,
    )
    .unwrap();

    assert_eq!(config.watch_dir, PathBuf::from("/srv/modules"));
    assert_eq!(config.poll_interval_ms, 250);
    assert_eq!(config.extensions, RuntimeConfig::default().extensions);
    assert_eq!(config.event_capacity, 1024);
}

#[test]
fn test_load_yaml_file_with_substitution() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("modhost.yaml");
    fs::write(
        &path,
        "watch_dir: ${MODHOST_TEST_CONFIG_ROOT}/packages\nextensions: [mpk, zip]\n",
    )
    .unwrap();

    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("MODHOST_TEST_CONFIG_ROOT", "/opt/host") };
    let config = RuntimeConfig::load(Some(&path)).unwrap();
    unsafe { std::env::remove_var("MODHOST_TEST_CONFIG_ROOT") };

    assert_eq!(config.watch_dir, PathBuf::from("/opt/host/packages"));
    assert_eq!(config.extensions, vec!["mpk".to_string(), "zip".to_string()]);
}

#[test]
fn test_substitute_env_vars() {
    unsafe { std::env::set_var("MODHOST_TEST_SUBST", "value") };
    assert_eq!(substitute_env_vars("a=${MODHOST_TEST_SUBST}"), "a=value");
    assert_eq!(substitute_env_vars("a=$MODHOST_TEST_SUBST"), "a=value");
    assert_eq!(
        substitute_env_vars("a=${MODHOST_TEST_UNSET_VARIABLE}"),
        "a=${MODHOST_TEST_UNSET_VARIABLE}"
    );
    unsafe { std::env::remove_var("MODHOST_TEST_SUBST") };
}

#[test]
fn test_env_overrides_are_listed() {
    unsafe { std::env::set_var("MODHOST_TEST_OVERRIDE_LISTED", "1") };
    let names = env_overrides();
    unsafe { std::env::remove_var("MODHOST_TEST_OVERRIDE_LISTED") };

    assert!(names.iter().any(|n| n == "MODHOST_TEST_OVERRIDE_LISTED"));
    assert!(names.iter().all(|n| n.starts_with("MODHOST_")));
    assert!(names.windows(2).all(|w| w[0] <= w[1]));
}
