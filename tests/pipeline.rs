use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use ungraded::{extract_course, Config, UngradedError};

const HEADER: &str = "\tmodule_id\tstudent_id\tstate\tcreated\tmodified\tdone\tstudent_answers";
const ROCK_ID: &str = "i4x://BerkeleyX/GG101x/problem/db71da27320a44bdb45df31d0d801e20";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn fixture_config(out: &Path) -> Config {
    let mut config = Config::default();
    config.decrypt.enabled = false;
    config.input.structure_file = Some(fixture("course_structure.json"));
    config.input.student_module_file = Some(fixture("studentmodule.sql"));
    config.output.base_directory = out.to_path_buf();
    config
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn answers_are_joined_to_ungraded_problems() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("answers");

    let report = extract_course("BerkeleyX-GG101x-1T2014", fixture_config(&out))
        .await
        .unwrap();

    assert_eq!(report.extraction_summary.sections, 2);
    assert_eq!(report.extraction_summary.problems, 5);
    assert_eq!(report.extraction_summary.rows_written, 5);
    assert_eq!(report.extraction_summary.empty_problems, 1);
    assert_eq!(report.extraction_summary.graded_containers, 1);
    assert_eq!(report.inputs.table_rows, 8);

    let rock = read_lines(&out.join("Warm Up").join("Rock Types.tsv"));
    assert_eq!(rock.len(), 3);
    assert_eq!(rock[0], HEADER);
    assert!(rock[1].starts_with(&format!("0\t{}\t101\t", ROCK_ID)));
    assert!(rock[1].ends_with(
        "\t2014-02-03 10:00:00\t2014-02-03 10:05:00\t\t\
         \"{\"\"i4x-BerkeleyX-GG101x-problem-db71da27320a44bdb45df31d0d801e20_2_1\"\":\"\"igneous\"\"}\""
    ));

    // escaped quotes and unicode escapes from the dump come out decoded
    assert!(rock[2].starts_with(&format!("1\t{}\t102\t", ROCK_ID)));
    assert!(rock[2].contains("The following is \\\"\"Quoted\\\"\" r\u{e9}ponse"));

    // null markers ("na" in `done`) are written as empty fields; a null state has no answers
    let plate = read_lines(&out.join("Warm Up").join("Plate Boundaries_.tsv"));
    assert_eq!(plate.len(), 2);
    assert!(plate[1].starts_with("4\t"));
    assert!(plate[1].ends_with("\t2014-02-06 12:00:00\t\t{}"));

    // list answers are kept as JSON
    let self_two = read_lines(
        &out.join("Quick Check")
            .join("Self Test_e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0.tsv"),
    );
    assert_eq!(self_two.len(), 2);
    assert!(self_two[1].contains("[\"\"choice_0\"\",\"\"choice_2\"\"]"));

    // problems without a display name fall back to their block id
    let unnamed = read_lines(&out.join("Quick Check").join("91c0d7e6f5a4b3c2d1e0f9a8b7c6d5e4.tsv"));
    assert_eq!(unnamed, vec![HEADER.to_string()]);
}

#[tokio::test]
async fn malformed_rows_become_warnings() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("answers");

    let report = extract_course("BerkeleyX-GG101x-1T2014", fixture_config(&out))
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 2);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.starts_with("Row 7: expected 11 fields, found 12")));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.starts_with("Row 5 (") && w.contains("state could not be decoded")));

    // the undecodable row is still written, with an empty answers field
    let self_one = read_lines(&out.join("Quick Check").join("Self Test.tsv"));
    assert_eq!(self_one.len(), 2);
    assert!(self_one[1].starts_with("5\t"));
    assert!(self_one[1].ends_with("\t{broken\t2014-02-07 12:00:00\t2014-02-07 12:01:00\t\t"));
}

#[tokio::test]
async fn report_and_index_describe_the_output() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("answers");

    extract_course("BerkeleyX-GG101x-1T2014", fixture_config(&out))
        .await
        .unwrap();

    let index = fs::read_to_string(out.join("_index.md")).unwrap();
    assert!(index.starts_with("# Ungraded Problems: BerkeleyX-GG101x-1T2014"));
    assert!(index.contains("## Warm Up"));
    assert!(index.contains("## Quick Check"));
    assert!(index.contains("- [Rock Types](Warm%20Up/Rock%20Types.tsv) (2 rows)"));
    assert!(index.find("## Warm Up").unwrap() < index.find("## Quick Check").unwrap());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(".ungraded").join("extraction_report.json")).unwrap())
            .unwrap();
    assert_eq!(report["course"], "BerkeleyX-GG101x-1T2014");
    assert_eq!(report["sections"][0]["name"], "Warm Up");
    assert_eq!(report["config_used"]["decrypt_command"], serde_json::Value::Null);
}

#[tokio::test]
async fn report_and_index_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("answers");
    let mut config = fixture_config(&out);
    config.output.create_index = false;
    config.output.generate_report = false;

    extract_course("BerkeleyX-GG101x-1T2014", config).await.unwrap();

    assert!(out.join("Warm Up").join("Rock Types.tsv").exists());
    assert!(!out.join("_index.md").exists());
    assert!(!out.join(".ungraded").join("extraction_report.json").exists());
}

#[tokio::test]
async fn dangling_child_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let structure = dir.path().join("course.json");
    fs::write(
        &structure,
        r#"{
            "seq": {"category": "sequential", "children": ["vert"], "metadata": {"display_name": "Practice"}},
            "vert": {"category": "vertical", "children": ["gone"], "metadata": {"display_name": "Warm Up"}}
        }"#,
    )
    .unwrap();

    let mut config = fixture_config(&dir.path().join("answers"));
    config.input.structure_file = Some(structure);

    let result = extract_course("Course", config).await;
    assert!(matches!(
        result,
        Err(UngradedError::DanglingReference { ref id, .. }) if id == "gone"
    ));
    assert!(!dir.path().join("answers").exists());
}

#[tokio::test]
async fn invalid_course_name_is_rejected_before_reading() {
    let dir = TempDir::new().unwrap();
    let result = extract_course("../elsewhere", fixture_config(&dir.path().join("answers"))).await;
    assert!(matches!(result, Err(UngradedError::InvalidCourseName { .. })));
}
