use super::*;

#[test]
fn precedence_global_file_env() {
    let global = GlobalSettings::default();
    let mut file = SettingsFile::default();
    file.sheets_dir = Some(PathBuf::from("/srv/sheets"));
    file.drive_api_base = Some("http://file-drive/".into());
    file.groups_sheet = Some("Groepen".into());
    file.request_timeout_ms = Some(5_000);
    file.access_token = Some("from-file".into());

    let env = EnvOverrides {
        drive_api_base: Some("http://env-drive/".into()),
        access_token: Some("from-env".into()),
        ..Default::default()
    };

    let eff = EffectiveSettings::from_layers(&global, Some(&file), &env);
    assert_eq!(eff.sheets_dir, PathBuf::from("/srv/sheets"));
    assert_eq!(eff.drive_api_base, "http://env-drive/");
    assert_eq!(eff.sheets_api_base, global.sheets_api_base);
    assert_eq!(eff.groups_sheet, "Groepen");
    assert_eq!(eff.config_sheet, "Config");
    assert_eq!(eff.request_timeout_ms, 5_000);
    assert_eq!(eff.access_token.as_deref(), Some("from-env"));
}

#[test]
fn debug_redacts_token() {
    let env = EnvOverrides { access_token: Some("secret-token".into()), ..Default::default() };
    let eff = EffectiveSettings::from_layers(&GlobalSettings::default(), None, &env);
    let dbg = format!("{:?}", eff);
    assert!(!dbg.contains("secret-token"));
    assert!(dbg.contains("<redacted>"));
}

#[test]
fn settings_file_load_and_reject() {
    let tmp = tempfile::tempdir().unwrap();
    let good = tmp.path().join("good.json");
    std::fs::write(&good, r#"{"sheets_dir": "exports", "request_timeout_ms": 1000}"#).unwrap();
    let f = SettingsFile::load(&good).unwrap();
    assert_eq!(f.sheets_dir, Some(PathBuf::from("exports")));
    assert_eq!(f.request_timeout_ms, Some(1000));

    let bad = tmp.path().join("bad.json");
    std::fs::write(&bad, "{not json").unwrap();
    assert!(SettingsFile::load(&bad).unwrap_err().is_config());

    let missing = tmp.path().join("missing.json");
    assert!(matches!(SettingsFile::load(&missing), Err(AppError::Io { .. })));
}

#[test]
fn sheet_names_follow_settings() {
    let file = SettingsFile { templates_sheet: Some("Sjablonen".into()), ..Default::default() };
    let eff = EffectiveSettings::from_layers(&GlobalSettings::default(), Some(&file), &EnvOverrides::default());
    let names = eff.sheet_names();
    assert_eq!(names.config, "Config");
    assert_eq!(names.templates, "Sjablonen");
}
