use hdpalign::annotation::AnnotationRecord;
use hdpalign::{
    Compound,
    HdpMassRtClustering,
    HdpMatcher,
    InMemoryCompoundDb,
    MetaboliteKey,
};
use mzalign::filter::build_filters;
use mzalign::grouping::{
    build_grouping,
    run_grouping,
};
use mzalign::matching::{
    CorrespondenceFileMatcher,
    JoinMatcher,
};
use mzalign::scoring::RowScorer;
use mzalign::{
    Aligner,
    CorrespondenceGraph,
    CorrespondenceTable,
    FeatureKey,
    FeatureMatcher,
    GraphEdgeConstructor,
    Sample,
};
use serde::Serialize;
use std::fs::File;
use std::io::{
    BufReader,
    BufWriter,
};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::{
    Config,
    MethodConfig,
    OutputConfig,
};
use crate::errors::CliError;

pub const ALIGNMENT_FILE: &str = "alignment.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const ANNOTATIONS_FILE: &str = "annotations.json";
pub const HDP_SAMPLES_FILE: &str = "hdp_samples.json";

#[derive(Debug, Serialize)]
pub struct AnnotationsOutput {
    pub ionisation_products: Vec<AnnotationRecord<FeatureKey>>,
    pub isotopes: Vec<AnnotationRecord<FeatureKey>>,
    pub metabolite_features: Vec<AnnotationRecord<FeatureKey>>,
    pub metabolites: Vec<AnnotationRecord<MetaboliteKey>>,
}

impl AnnotationsOutput {
    fn from_model(model: &HdpMassRtClustering) -> Self {
        let processor = model.processor();
        Self {
            ionisation_products: processor.ionisation_product_annotations().records(),
            isotopes: processor.isotope_annotations().records(),
            metabolite_features: processor.metabolite_feature_annotations().records(),
            metabolites: processor.metabolite_annotations().records(),
        }
    }
}

/// Everything a run produces.
pub struct RunOutput {
    pub table: CorrespondenceTable,
    pub graph: CorrespondenceGraph,
    pub annotations: Option<AnnotationsOutput>,
}

fn write_json<T: Serialize>(data: &T, path: &Path) -> Result<(), CliError> {
    let file = File::create(path).map_err(|e| CliError::io(e, path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), data)?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn load_compounds(path: &Path) -> Result<InMemoryCompoundDb, CliError> {
    let file = File::open(path).map_err(|e| CliError::io(e, path))?;
    let compounds: Vec<Compound> = serde_json::from_reader(BufReader::new(file))?;
    info!("Loaded {} compounds from {}", compounds.len(), path.display());
    Ok(InMemoryCompoundDb::new(compounds))
}

fn align<M: FeatureMatcher>(
    matcher: M,
    config: &Config,
    samples: &[Sample],
) -> Result<Aligner<M>, CliError> {
    let filters = build_filters(&config.alignment.filters)?;
    let mut aligner = Aligner::new(matcher, filters);
    aligner.align(samples)?;
    Ok(aligner)
}

fn take_table<M: FeatureMatcher>(aligner: &Aligner<M>) -> Result<CorrespondenceTable, CliError> {
    aligner.result().cloned().ok_or_else(|| CliError::Config {
        source: "alignment finished without a result".to_string(),
    })
}

/// Groups, aligns and builds the graph of the given samples.
pub fn run(config: &Config, samples: &mut [Sample]) -> Result<RunOutput, CliError> {
    let alignment = &config.alignment;
    if alignment.use_group {
        let mut strategy =
            build_grouping(&alignment.grouping, alignment.sparse_threshold, None)?;
        let groups = run_grouping(strategy.as_mut(), samples)?;
        info!("Grouped features into {} groups", groups.len());
    }

    let (table, annotations) = match &config.method {
        MethodConfig::Join => {
            let scorer = RowScorer::new(alignment.tolerance, alignment.alpha);
            let mut matcher = JoinMatcher::new(scorer);
            if alignment.use_group {
                matcher = matcher.with_groups(alignment.group_alpha);
            }
            let aligner = align(matcher, config, samples)?;
            (take_table(&aligner)?, None)
        }
        MethodConfig::Correspondence { path } => {
            let aligner = align(CorrespondenceFileMatcher::new(path.clone()), config, samples)?;
            (take_table(&aligner)?, None)
        }
        MethodConfig::Hdp => {
            let mut matcher = HdpMatcher::new(alignment.hdp.clone());
            if let Some(path) = config.compound_db.as_ref() {
                matcher = matcher.with_identity_lookup(Arc::new(load_compounds(path)?));
            }
            if let Some(output) = config.output.as_ref().filter(|o| o.save_hdp_samples) {
                matcher = matcher.with_results_path(output.directory.join(HDP_SAMPLES_FILE));
            }
            let aligner = align(matcher, config, samples)?;
            let annotations = aligner.matcher().last_run().map(AnnotationsOutput::from_model);
            (take_table(&aligner)?, annotations)
        }
    };

    let graph = GraphEdgeConstructor::new(config.graph.dmz, config.graph.drt)?
        .build(table.rows(), samples);
    info!(
        "Alignment has {} rows ({} aligned), graph has {} vertices and {} edges",
        table.len(),
        table.aligned_rows().len(),
        graph.vertices().len(),
        graph.edges().len()
    );
    Ok(RunOutput {
        table,
        graph,
        annotations,
    })
}

pub fn write_outputs(output: &RunOutput, config: &OutputConfig) -> Result<(), CliError> {
    std::fs::create_dir_all(&config.directory).map_err(|e| CliError::io(e, &config.directory))?;
    write_json(&output.table, &config.directory.join(ALIGNMENT_FILE))?;
    write_json(&output.graph, &config.directory.join(GRAPH_FILE))?;
    if let Some(annotations) = output.annotations.as_ref() {
        write_json(annotations, &config.directory.join(ANNOTATIONS_FILE))?;
    }
    Ok(())
}
