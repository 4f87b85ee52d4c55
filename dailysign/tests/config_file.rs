use dailysign::{tasks, AutomationError, EngineConfig};

#[test]
fn test_load_yaml_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dailysign.yaml");
    std::fs::write(
        &path,
        r#"
device:
  width: 720
  height: 1600
debugging: true
timings:
  fallback_delay_secs: 120
tasks:
  - taskCode: DingDong
    subtasks:
      - code: creditSign
        displayName: 积分签到
      - code: fishpond
        displayName: 鱼塘签到
        enabled: false
"#,
    )?;

    let config = EngineConfig::load(&path)?;
    assert_eq!(config.device.width, 720);
    assert!(config.debugging);
    assert_eq!(config.timings.fallback_delay_secs, 120);
    assert_eq!(config.timings.ocr_retries, 3);

    let task = tasks::build("DingDong", &config).expect("DingDong is built in");
    assert_eq!(task.subtasks().len(), 2);
    assert!(!task.subtasks()[1].enabled);
    Ok(())
}

#[test]
fn test_load_json_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dailysign.json");
    std::fs::write(&path, r#"{"ocr_enabled": false, "tasks": [{"taskCode": "Taobao"}]}"#)?;

    let config = EngineConfig::load(&path)?;
    assert!(!config.ocr_enabled);
    assert!(config.task("Taobao").is_some());
    Ok(())
}

#[test]
fn test_missing_file_is_a_config_error() {
    let err = EngineConfig::load("/nonexistent/dailysign.json").unwrap_err();
    assert!(matches!(err, AutomationError::Config(_)));
}
