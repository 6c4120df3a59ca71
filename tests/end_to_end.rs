use approx::assert_abs_diff_eq;
use mea_activation::analysis::pipeline::make_recording;
use mea_activation::analysis::{EventMatrix, ElectrodeLayout, PeakSet, Recording};
use mea_activation::{
    analyze, compute_consensus, detect_peaks, inpaint, map_to_grid, normalize_timings,
    AnalysisConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FS: f64 = 10_000.0;
const LEN: usize = 20_000;

// 55 channels discharge 8 times, the last 5 only 3 times. Column `c` lags column 0 by `c` ms.
fn recording() -> Recording {
    let mut rng = StdRng::seed_from_u64(2024);
    let layout = ElectrodeLayout::standard_8x8();
    let channels = layout
        .labels()
        .iter()
        .enumerate()
        .map(|(channel, &label)| {
            let column = (label / 10 - 1) as usize;
            let discharges = if channel < 55 { 8 } else { 3 };
            let mut samples: Vec<f64> = (0..LEN).map(|_| rng.gen_range(-1.0..1.0)).collect();
            for k in 0..discharges {
                let idx = 400 + k * 2_300 + column * 10;
                samples[idx] += 120.0;
                samples[idx + 1] += 40.0;
            }
            samples
        })
        .collect();
    make_recording(FS, channels)
}

#[test]
fn sixty_channel_recording_end_to_end() {
    let analysis = analyze(&recording(), &AnalysisConfig::default()).unwrap();
    assert_eq!(analysis.consensus.modal_count, Some(8));
    assert_eq!(analysis.consensus.active_count(), 55);
    assert!(analysis.consensus.active[..55].iter().all(|&a| a));
    assert_eq!(analysis.timings.num_events(), 8);
    assert_eq!(analysis.timings.num_channels(), 60);

    for map in analysis.heat_maps().unwrap() {
        assert_eq!(map.grid.missing_count(), 0);
        assert!(!map.report.is_degenerate());
        for (r, c) in [(0, 0), (0, 7), (7, 0), (7, 7), (4, 0)] {
            assert!(map.grid.get(r, c).unwrap().is_nan());
        }
        // the sweep is planar, so filled cells land on it too
        for ((r, c), v) in map.grid.values().indexed_iter() {
            if !map.grid.is_excluded(r, c) {
                assert_abs_diff_eq!(*v, c as f64, epsilon = 1e-6);
            }
        }
    }
}

#[test]
fn free_functions_compose() {
    let recording = recording();
    let peaks: Vec<PeakSet> = detect_peaks(&recording.channels, 4.0, 170).unwrap();
    let counts: Vec<usize> = peaks.iter().map(PeakSet::len).collect();
    assert_eq!(counts.iter().filter(|&&n| n == 8).count(), 55);
    assert_eq!(counts.iter().filter(|&&n| n == 3).count(), 5);

    let events = EventMatrix::from_peak_sets(&peaks, 8);
    let consensus = compute_consensus(&counts, &events).unwrap();
    assert_eq!(consensus.reference_event, Some(1));
    let timings = normalize_timings(&events, FS, &consensus.active).unwrap();
    assert_eq!(timings.num_events(), 8);

    let layout = recording.layout().unwrap();
    let row = timings.row(5).unwrap().to_vec();
    let grid = map_to_grid(&row, &layout);
    assert_eq!(grid.missing_count(), 5);
    let filled = inpaint(&grid);
    assert_eq!(filled.missing_count(), 0);
    assert_abs_diff_eq!(filled.get(3, 3).unwrap(), 3.0, epsilon = 1e-6);
}
