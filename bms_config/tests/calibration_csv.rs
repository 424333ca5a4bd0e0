use std::fs::File;
use std::io::Write;

use bms_config::{CellCalibrationRow, load_cell_calibration_csv, load_toml};
use rstest::rstest;
use tempfile::tempdir;

fn write_csv(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cells.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

#[rstest]
fn loads_rows_with_whitespace() {
    let (_dir, path) = write_csv("cell, scale, offset\n1, 0.001, 0.0\n2, 0.00102, -0.004\n");
    let rows = load_cell_calibration_csv(&path).unwrap();
    assert_eq!(
        rows,
        vec![
            CellCalibrationRow {
                cell: 1,
                scale: 0.001,
                offset: 0.0
            },
            CellCalibrationRow {
                cell: 2,
                scale: 0.00102,
                offset: -0.004
            },
        ]
    );
}

#[rstest]
#[case("raw,volts\n1,2\n", "must have headers 'cell,scale,offset'")]
#[case("cell,scale,offset\n0,0.001,0\n", "1-based")]
#[case("cell,scale,offset\n1,0,0\n", "scale must be finite and non-zero")]
#[case("cell,scale,offset\n1,0.001,0\n1,0.001,0\n", "appears twice")]
#[case("cell,scale,offset\n", "no rows")]
#[case("cell,scale,offset\nx,0.001,0\n", "invalid csv row 2")]
fn rejects_bad_files(#[case] contents: &str, #[case] needle: &str) {
    let (_dir, path) = write_csv(contents);
    let err = load_cell_calibration_csv(&path).expect_err("should fail");
    assert!(
        format!("{err}").to_lowercase().contains(&needle.to_lowercase()),
        "{err} does not mention {needle}"
    );
}

#[rstest]
fn missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.csv");
    let err = load_cell_calibration_csv(&path).expect_err("missing file");
    assert!(format!("{err}").contains("absent.csv"));
}

#[rstest]
fn calibration_rows_merge_into_overrides() {
    let mut cfg = load_toml(
        r#"
[pack]
n = 4

[i]
max = 100.0

[[cells]]
index = 2
balance = false
"#,
    )
    .unwrap();
    cfg.apply_cell_calibration(&[
        CellCalibrationRow {
            cell: 2,
            scale: 0.002,
            offset: 0.1,
        },
        CellCalibrationRow {
            cell: 4,
            scale: 0.003,
            offset: 0.0,
        },
    ]);
    let c2 = cfg.cell_override(2).unwrap();
    assert_eq!(c2.scale, Some(0.002));
    assert_eq!(c2.balance, Some(false));
    let c4 = cfg.cell_override(4).unwrap();
    assert_eq!(c4.scale, Some(0.003));
    cfg.validate().unwrap();
}
