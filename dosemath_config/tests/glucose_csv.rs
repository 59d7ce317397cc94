use dosemath_config::load_glucose_csv;
use rstest::rstest;
use std::fs;
use tempfile::tempdir;

fn write_csv(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("glucose.csv");
    fs::write(&path, contents).unwrap();
    (dir, path)
}

#[test]
fn loads_sorted_rows() {
    let (_dir, path) = write_csv(
        "date,glucose\n2015-07-13T12:00:00Z,143\n2015-07-13T12:05:00Z,146.5\n2015-07-13T12:10:00+00:00,150\n",
    );
    let rows = load_glucose_csv(&path).expect("load");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1].glucose, 146.5);
    assert_eq!((rows[2].date - rows[0].date).num_minutes(), 10);
}

#[test]
fn empty_body_is_ok() {
    let (_dir, path) = write_csv("date,glucose\n");
    assert!(load_glucose_csv(&path).expect("load").is_empty());
}

#[rstest]
#[case("time,glucose\n2015-07-13T12:00:00Z,143\n", "must have headers 'date,glucose'")]
#[case("glucose,date\n143,2015-07-13T12:00:00Z\n", "must have headers 'date,glucose'")]
#[case("date,glucose\nyesterday,143\n", "invalid CSV row 2")]
#[case("date,glucose\n2015-07-13T12:00:00Z,abc\n", "invalid CSV row 2")]
#[case("date,glucose\n2015-07-13T12:00:00Z,-5\n", "glucose must be > 0")]
#[case(
    "date,glucose\n2015-07-13T12:05:00Z,143\n2015-07-13T12:00:00Z,140\n",
    "must be sorted by date"
)]
fn rejects_bad_csv(#[case] contents: &str, #[case] needle: &str) {
    let (_dir, path) = write_csv(contents);
    let err = load_glucose_csv(&path).expect_err("should fail");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    let err = load_glucose_csv(&path).expect_err("should fail");
    assert!(format!("{err}").contains("open glucose CSV"));
}
