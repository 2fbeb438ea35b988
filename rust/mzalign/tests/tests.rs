use mzalign::filter::{
    FilterOutcome,
    ScoreResultFilter,
};
use mzalign::grouping::{
    DpMixtureBackend,
    GreedyGrouping,
    PosteriorGrouping,
    run_grouping,
};
use mzalign::matching::JoinMatcher;
use mzalign::scoring::RowScorer;
use mzalign::tolerance::within_tolerance;
use mzalign::{
    Aligner,
    AlignmentRow,
    CorrespondenceTable,
    FeatureInput,
    GraphEdgeConstructor,
    MassTolerance,
    ResultFilter,
    Sample,
    Tolerance,
};

fn sample(id: usize, features: &[(f64, f64)]) -> Sample {
    let inputs: Vec<FeatureInput> = features
        .iter()
        .map(|(mass, rt)| FeatureInput {
            mass: *mass,
            rt: *rt,
            intensity: 1000.0,
        })
        .collect();
    Sample::new(id, format!("sample_{}", id), &inputs).unwrap()
}

fn join_aligner(ppm: f64, rt: f64) -> Aligner<JoinMatcher> {
    let tolerance = Tolerance::new(MassTolerance::Ppm(ppm), rt);
    Aligner::new(JoinMatcher::new(RowScorer::new(tolerance, 0.5)), vec![])
}

struct RejectAligned;

impl ResultFilter for RejectAligned {
    fn name(&self) -> &'static str {
        "reject_aligned"
    }

    fn process(&self, table: &CorrespondenceTable) -> FilterOutcome {
        let (rejected, accepted) = table.rows().iter().cloned().partition(|r| r.len() > 1);
        FilterOutcome { accepted, rejected }
    }
}

#[test]
fn test_tolerance_symmetry() {
    let values = [0.0, 1.0, 99.9995, 100.0, 100.0005, 100.001, 523.2, 1e6];
    let windows = [0.0, 0.5, 5.0, 10.0];
    for a in values.iter() {
        for b in values.iter() {
            for w in windows.iter() {
                for ppm in [true, false] {
                    assert_eq!(
                        within_tolerance(*a, *b, *w, ppm),
                        within_tolerance(*b, *a, *w, ppm),
                        "asymmetric for {} {} {} {}",
                        a,
                        b,
                        w,
                        ppm
                    );
                }
                assert!(within_tolerance(*a, *a, *w, true));
            }
        }
    }
}

#[test]
fn test_scenario_a_close_features_share_a_row() {
    let samples = vec![sample(0, &[(100.0, 10.0)]), sample(1, &[(100.0005, 10.2)])];
    let mut aligner = join_aligner(5.0, 1.0);
    let table = aligner.align(&samples).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.rows()[0].len(), 2);
    assert!(table.rows()[0].features.iter().all(|f| f.aligned));
}

#[test]
fn test_scenario_b_tight_rt_keeps_singletons() {
    let samples = vec![sample(0, &[(100.0, 10.0)]), sample(1, &[(100.0005, 10.2)])];
    let mut aligner = join_aligner(5.0, 0.1);
    let table = aligner.align(&samples).unwrap();
    assert_eq!(table.len(), 2);
    assert!(table.rows().iter().all(|r| r.len() == 1));
}

#[test]
fn test_scenario_c_evenly_spaced_features() {
    let features: Vec<(f64, f64)> = (0..5).map(|i| (250.0, 10.0 * i as f64)).collect();
    let mut samples: Vec<Sample> = (0..3).map(|i| sample(i, &features)).collect();

    let mut grouping = GreedyGrouping::new(5.0, 1000);
    let groups = run_grouping(&mut grouping, &mut samples).unwrap();
    assert_eq!(groups.len(), 15);
    assert!(groups.iter().all(|g| g.len() == 1));

    let mut aligner = join_aligner(10.0, 1.0);
    let table = aligner.align(&samples).unwrap();
    assert_eq!(table.len(), 5);
    for row in table.rows() {
        assert_eq!(row.len(), 3);
        assert!(row.has_distinct_samples());
        let rts: Vec<f64> = row.features.iter().map(|f| f.rt).collect();
        assert!(rts.iter().all(|rt| *rt == rts[0]));
    }
}

#[test]
fn test_grouping_totality() {
    let mut samples = vec![
        sample(0, &[(100.0, 10.0), (101.0, 11.0), (102.0, 30.0), (103.0, 31.5)]),
        sample(1, &[(100.0, 50.0)]),
    ];
    let mut greedy = GreedyGrouping::new(2.0, 1000);
    run_grouping(&mut greedy, &mut samples).unwrap();
    for s in samples.iter() {
        assert!(s.is_grouped());
        assert!(s.coclustering().unwrap().has_unit_diagonal());
    }

    let backend = Box::new(DpMixtureBackend::new(1000));
    let mut posterior = PosteriorGrouping::new(backend, 2.0, 1.0, 40, 20, Some(7));
    run_grouping(&mut posterior, &mut samples).unwrap();
    for s in samples.iter() {
        assert!(s.is_grouped());
        let matrix = s.coclustering().unwrap();
        assert_eq!(matrix.dim(), s.len());
        assert!(matrix.has_unit_diagonal());
    }
}

#[test]
fn test_reject_explosion_scenario() {
    let samples: Vec<Sample> = (0..3)
        .map(|i| sample(i, &[(100.0, 10.0), (200.0, 20.0)]))
        .collect();
    let rows = vec![
        AlignmentRow::new(
            0,
            samples.iter().map(|s| s.features()[0]).collect(),
        ),
        AlignmentRow::new(1, vec![samples[0].features()[1]]),
        AlignmentRow::new(2, vec![samples[1].features()[1]]),
    ];
    let input = CorrespondenceTable::new("fixed", rows);
    let before = input.feature_keys();
    let previous_max = input.last_row_id().unwrap();

    let filter = RejectAligned;
    let output = mzalign::alignment::apply_filter(&filter, input);
    assert_eq!(output.len(), 5);
    assert_eq!(output.feature_count(), 5);
    assert_eq!(output.feature_keys(), before);
    assert!(output.rows().iter().all(|r| r.row_id != 0));

    let new_ids: Vec<usize> = output
        .rows()
        .iter()
        .map(|r| r.row_id)
        .filter(|id| *id > previous_max)
        .collect();
    assert_eq!(new_ids, vec![3, 4, 5]);
}

#[test]
fn test_filters_never_lose_features() {
    let samples = vec![
        sample(0, &[(100.0, 10.0), (200.0, 20.0), (300.0, 30.0)]),
        sample(1, &[(100.0005, 10.3), (200.002, 20.9), (300.0, 90.0)]),
        sample(2, &[(100.0001, 10.1), (200.001, 19.5)]),
    ];
    let tolerance = Tolerance::new(MassTolerance::Ppm(10.0), 2.0);
    let filters: Vec<Box<dyn ResultFilter>> = vec![
        Box::new(ScoreResultFilter::new(0.5)),
        Box::new(RejectAligned),
    ];
    let mut matched = join_aligner(10.0, 2.0);
    let before = matched.align(&samples).unwrap().feature_keys();

    let mut aligner = Aligner::new(JoinMatcher::new(RowScorer::new(tolerance, 0.5)), filters);
    let table = aligner.align(&samples).unwrap();
    assert_eq!(table.feature_keys(), before);
    assert!(table.rows().iter().all(|r| r.len() == 1));

    let mut ids: Vec<usize> = table.rows().iter().map(|r| r.row_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), table.len());
}

#[test]
fn test_graph_clique_completeness() {
    let samples: Vec<Sample> = (0..5)
        .map(|i| sample(i, &[(400.0, 60.0 + i as f64 * 0.1)]))
        .collect();
    let mut aligner = join_aligner(10.0, 1.0);
    let table = aligner.align(&samples).unwrap();
    assert_eq!(table.len(), 1);

    let graph = GraphEdgeConstructor::new(0.01, 1.0)
        .unwrap()
        .build(table.rows(), &samples);
    let k = table.rows()[0].len();
    assert_eq!(graph.edges().len(), k * (k - 1) / 2);
    assert!(graph.edges().iter().all(|e| e.source.sample_id != e.target.sample_id));
}
