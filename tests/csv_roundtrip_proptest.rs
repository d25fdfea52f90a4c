//! Property test for the `qc_metrics.csv` round-trip law: any row written
//! by `write_metrics_csv` reads back unchanged through `read_metrics_csv`.

use acquisition_control_core::persistence::{read_metrics_csv, write_metrics_csv};
use acquisition_control_core::FovMetricsRow;
use proptest::prelude::*;

fn row_strategy() -> impl Strategy<Value = FovMetricsRow> {
    (
        "[A-Za-z]{1,4}",
        0u32..500,
        -1.0e5f64..1.0e5,
        proptest::option::of(-1.0e5f64..1.0e5),
        proptest::option::of(-1.0e5f64..1.0e5),
        proptest::option::of(-1.0e5f64..1.0e5),
        proptest::option::of("[A-Za-z0-9 ]{1,20}"),
    )
        .prop_map(
            |(
                region_id,
                fov_index,
                z_position_um,
                focus_score,
                laser_af_displacement_um,
                z_diff_from_last_timepoint_um,
                error,
            )| FovMetricsRow {
                region_id,
                fov_index,
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                z_position_um,
                focus_score,
                laser_af_displacement_um,
                z_diff_from_last_timepoint_um,
                error,
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn csv_round_trip_preserves_every_field(rows in prop::collection::vec(row_strategy(), 0..20)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc_metrics.csv");
        write_metrics_csv(&rows, &path).unwrap();
        let read_back = read_metrics_csv(&path).unwrap();

        prop_assert_eq!(read_back.len(), rows.len());
        for (original, roundtripped) in rows.iter().zip(read_back.iter()) {
            prop_assert_eq!(&original.region_id, &roundtripped.region_id);
            prop_assert_eq!(original.fov_index, roundtripped.fov_index);
            prop_assert_eq!(original.z_position_um, roundtripped.z_position_um);
            prop_assert_eq!(original.focus_score, roundtripped.focus_score);
            prop_assert_eq!(
                original.laser_af_displacement_um,
                roundtripped.laser_af_displacement_um
            );
            prop_assert_eq!(
                original.z_diff_from_last_timepoint_um,
                roundtripped.z_diff_from_last_timepoint_um
            );
            prop_assert_eq!(&original.error, &roundtripped.error);
        }
    }
}
