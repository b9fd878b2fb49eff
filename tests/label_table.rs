use std::io::Write;

use tempfile::NamedTempFile;

use smart_verifier::{LabelTable, MAX_LABELS, MAX_LABEL_LEN};

fn label_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp label file");
    file.write_all(contents.as_bytes()).expect("write labels");
    file
}

#[test]
fn loads_labels_in_file_order() {
    let file = label_file("box_small\nbox_medium\nbox_large\n");
    let table = LabelTable::load(file.path()).expect("load labels");
    assert_eq!(
        table.iter().collect::<Vec<_>>(),
        ["box_small", "box_medium", "box_large"]
    );
    assert_eq!(table.get(1), Some("box_medium"));
    assert_eq!(table.get(3), None);
}

#[test]
fn final_line_without_newline_is_kept() {
    let file = label_file("box_small\nbox_large");
    let table = LabelTable::load(file.path()).expect("load labels");
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(1), Some("box_large"));
}

#[test]
fn empty_file_yields_empty_table() {
    let file = label_file("");
    let table = LabelTable::load(file.path()).expect("load labels");
    assert!(table.is_empty());
}

#[test]
fn missing_file_is_an_error() {
    let file = label_file("box_small\n");
    let missing = file.path().with_extension("gone");
    let err = LabelTable::load(&missing).expect_err("missing file");
    assert!(format!("{err:#}").contains("could not open label file"));
}

#[test]
fn table_stops_at_capacity() {
    let contents: String = (0..MAX_LABELS + 20).map(|i| format!("label_{i}\n")).collect();
    let file = label_file(&contents);
    let table = LabelTable::load(file.path()).expect("load labels");
    assert_eq!(table.len(), MAX_LABELS);
    assert_eq!(table.get(MAX_LABELS - 1), Some("label_99"));
    assert!(!table.contains("label_100"));
}

#[test]
fn overlong_labels_are_truncated() {
    let long = "x".repeat(MAX_LABEL_LEN * 2);
    let file = label_file(&format!("{long}\nshort\n"));
    let table = LabelTable::load(file.path()).expect("load labels");
    assert_eq!(table.get(0).map(str::len), Some(MAX_LABEL_LEN - 1));
    assert_eq!(table.get(1), Some("short"));
}
