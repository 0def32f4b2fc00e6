use super::*;

fn rows(data: &[&[&str]]) -> Rows {
    data.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect()
}

#[test]
fn config_lookup_and_missing_key() {
    let t = ConfigTable::from_rows(&rows(&[
        &["Key", "Value"],
        &["Data root folder", "ROOT1"],
        &["", "ignored"],
        &["Expiry Datetime", "2025-01-01T00:00:00Z"],
    ]))
    .unwrap();
    assert_eq!(t.len(), 2);
    assert_eq!(t.get(KEY_ROOT_FOLDER).unwrap(), "ROOT1");
    let err = t.get(KEY_GROUP_FOLDER_TEMPLATE).unwrap_err();
    assert!(err.is_config());
    assert_eq!(err.code_str(), "config_missing_key");
}

#[test]
fn config_duplicate_key_rejected() {
    let err = ConfigTable::from_rows(&rows(&[&["Key", "Value"], &["A", "1"], &["A", "2"]])).unwrap_err();
    assert_eq!(err.code_str(), "config_duplicate_key");
}

#[test]
fn districts_and_groups_skip_header_and_blank_rows() {
    let d = parse_districts(&rows(&[
        &["Name", "Number", "Email"],
        &["North", "1", "north@woodcraft.org.uk"],
        &["", "", ""],
        &[" South ", "2", "south@woodcraft.org.uk"],
    ]))
    .unwrap();
    assert_eq!(d.len(), 2);
    assert_eq!(d[1].name, "South");

    let g = parse_groups(&rows(&[
        &["Name", "Number", "District", "Email"],
        &["Elfins", "12", "North", "elfins@woodcraft.org.uk"],
    ]))
    .unwrap();
    assert_eq!(g[0].district_name, "North");
    assert_eq!(g[0].number, "12");
}

#[test]
fn district_without_owner_is_config_error() {
    let err = parse_districts(&rows(&[&["Name", "Number", "Email"], &["North", "1"]])).unwrap_err();
    assert_eq!(err.code_str(), "sheet_cell_missing");
    assert!(err.message().contains("row 2"));
}

#[test]
fn templates_parse_scope_action_flags() {
    let t = parse_templates(&rows(&[
        &["Source", "Scope", "Action", "Name", "Flags"],
        &["https://docs.google.com/spreadsheets/d/S1/edit", "group", "copy", "%G Accounts %Y", ""],
        &["F1", "Group", "COPY", "%G Form", "1"],
        &["R1", "group", "copy", "%G Register", "2.0"],
        &["H1", "district", "shortcut", "", ""],
    ]))
    .unwrap();
    assert_eq!(t.len(), 4);
    assert_eq!(t[0].scope, Scope::Group);
    assert!(t[0].flags.is_empty());
    assert_eq!(t[1].flags, PostProcessFlags(1));
    assert_eq!(t[2].flags, PostProcessFlags(2));
    assert_eq!(t[3].action, RuleAction::Shortcut);
    assert_eq!(t[3].scope, Scope::District);
}

#[test]
fn templates_reject_unknown_scope() {
    let err = parse_templates(&rows(&[&["h"], &["X", "region", "copy", "", ""]])).unwrap_err();
    assert_eq!(err.code_str(), "template_bad_scope");
    let err = parse_templates(&rows(&[&["h"], &["X", "group", "move", "", ""]])).unwrap_err();
    assert_eq!(err.code_str(), "template_bad_action");
    let err = parse_templates(&rows(&[&["h"], &["X", "group", "copy", "", "-1"]])).unwrap_err();
    assert_eq!(err.code_str(), "template_bad_flags");
}

#[test]
fn csv_dir_source_reads_exports() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("Districts.csv"),
        "Name,Number,Email\nNorth,1,north@woodcraft.org.uk\n,,\n\"West, Upper\",3,west@woodcraft.org.uk\n",
    )
    .unwrap();
    let src = CsvDirSource::new(tmp.path());
    let d = parse_districts(&src.rows("Districts").unwrap()).unwrap();
    assert_eq!(d.len(), 2);
    assert_eq!(d[1].name, "West, Upper");

    let err = src.rows("Groups").unwrap_err();
    assert!(matches!(err, AppError::Io { .. }));
}

#[test]
fn memory_sheets_missing_sheet() {
    let src = MemorySheets::new().with("Config", &[&["Key", "Value"]]);
    assert!(src.rows("Config").is_ok());
    assert_eq!(src.rows("Groups").unwrap_err().code_str(), "sheet_missing");
}
