//! Clustering backends used by the posterior grouping strategy.
//!
//! A backend receives one sample's features and the mixture parameters, and
//! returns a partition together with the averaged pairwise co-occurrence over
//! the retained posterior draws.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;
use std::io::{
    Read,
    Write,
};
use std::path::PathBuf;
use std::process::{
    Child,
    Command,
    ExitStatus,
    Stdio,
};
use std::thread::JoinHandle;
use std::time::{
    Duration,
    Instant,
};
use tracing::{
    debug,
    warn,
};

use crate::coclustering::CoClusteringMatrix;
use crate::errors::{
    AlignmentError,
    Result,
    Stage,
};
use crate::utils::stats::{
    normal_ln_pdf,
    sample_log_weights,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackendConfig {
    /// In-process Dirichlet process mixture sampler.
    #[default]
    #[serde(rename = "dp_mixture")]
    DpMixture,
    /// External program speaking JSON on stdin/stdout.
    #[serde(rename = "subprocess")]
    Subprocess {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Per-sample dataset sent to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingRequest {
    pub sample_name: String,
    pub masses: Vec<f64>,
    pub rts: Vec<f64>,
    pub intensities: Vec<f64>,
    pub rt_window: f64,
    pub alpha: f64,
    pub num_samples: usize,
    pub burn_in: usize,
    pub seed: Option<u64>,
}

impl GroupingRequest {
    pub fn len(&self) -> usize {
        self.rts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingResponse {
    /// Cluster of every feature in the final draw.
    pub assignments: Vec<u32>,
    /// Fraction of retained draws in which two features shared a cluster.
    pub coclustering: CoClusteringMatrix,
}

/// What external programs write to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireResponse {
    assignments: Vec<u32>,
    coclustering: Vec<Vec<f64>>,
}

pub trait GroupingBackend: Send {
    fn name(&self) -> &'static str;

    /// Clusters one sample. Any error is fatal for the run.
    fn cluster(&mut self, request: &GroupingRequest) -> Result<GroupingResponse>;

    /// Releases the session. Called once grouping is over, also after errors.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subprocess backend
// ---------------------------------------------------------------------------

/// Runs an external sampler once per sample.
///
/// The request is written as JSON to the program's stdin and a JSON object
/// `{"assignments": [...], "coclustering": [[...]]}` is expected on stdout.
/// With a timeout, the child is killed once it expires.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    sparse_threshold: usize,
    calls: usize,
}

/// Kills and reaps the child unless it was waited on.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn get(&mut self) -> Result<&mut Child> {
        self.child
            .as_mut()
            .ok_or_else(|| AlignmentError::backend(Stage::Grouping, "child already reaped"))
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

fn read_to_end_in_thread<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

impl SubprocessBackend {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        timeout: Option<Duration>,
        sparse_threshold: usize,
    ) -> Self {
        Self {
            program,
            args,
            timeout,
            sparse_threshold,
            calls: 0,
        }
    }

    fn fail(&self, msg: impl std::fmt::Display) -> AlignmentError {
        AlignmentError::backend(
            Stage::Grouping,
            format!("{}: {}", self.program.display(), msg),
        )
    }

    fn wait(&self, guard: &mut ChildGuard) -> Result<ExitStatus> {
        let child = guard.get()?;
        let Some(timeout) = self.timeout else {
            return child.wait().map_err(|e| self.fail(e));
        };
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait().map_err(|e| self.fail(e))? {
                Some(status) => return Ok(status),
                None => {
                    if Instant::now() >= deadline {
                        warn!(
                            "Grouping backend {} timed out after {:?}",
                            self.program.display(),
                            timeout
                        );
                        let _ = child.kill();
                        return Err(self.fail(format!("timed out after {:?}", timeout)));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}

impl GroupingBackend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn cluster(&mut self, request: &GroupingRequest) -> Result<GroupingResponse> {
        let payload = serde_json::to_vec(request)?;
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.fail(format!("unable to start: {}", e)))?;
        let mut guard = ChildGuard { child: Some(child) };
        self.calls += 1;

        let child = guard.get()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.fail("stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.fail("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.fail("stderr not captured"))?;

        let writer = std::thread::spawn(move || {
            let res = stdin.write_all(&payload);
            drop(stdin);
            res
        });
        let out_reader = read_to_end_in_thread(stdout);
        let err_reader = read_to_end_in_thread(stderr);

        let status = self.wait(&mut guard)?;
        guard.child = None;

        let write_result = writer
            .join()
            .map_err(|_| self.fail("stdin writer panicked"))?;
        let out = out_reader
            .join()
            .map_err(|_| self.fail("stdout reader panicked"))?;
        let err = err_reader
            .join()
            .map_err(|_| self.fail("stderr reader panicked"))?;

        if !status.success() {
            return Err(self.fail(format!(
                "exited with {}: {}",
                status,
                String::from_utf8_lossy(&err).trim()
            )));
        }
        if let Err(e) = write_result {
            return Err(self.fail(format!("unable to send request: {}", e)));
        }

        let wire: WireResponse = serde_json::from_slice(&out)
            .map_err(|e| self.fail(format!("invalid response: {}", e)))?;
        let coclustering =
            CoClusteringMatrix::from_dense_rows(&wire.coclustering, self.sparse_threshold)?;
        Ok(GroupingResponse {
            assignments: wire.assignments,
            coclustering,
        })
    }

    fn close(&mut self) -> Result<()> {
        debug!(
            "Closing subprocess backend {} after {} calls",
            self.program.display(),
            self.calls
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process Dirichlet process mixture
// ---------------------------------------------------------------------------

/// Collapsed Gibbs sampler for a Dirichlet process mixture of normals over
/// retention time.
///
/// Clusters have a known spread of `rt_window / 2` seconds and a normal prior
/// on their centre, centred on the mean retention time of the sample.
#[derive(Debug, Clone)]
pub struct DpMixtureBackend {
    sparse_threshold: usize,
}

#[derive(Debug, Clone, Default)]
struct DpCluster {
    count: usize,
    sum: f64,
}

impl DpMixtureBackend {
    pub fn new(sparse_threshold: usize) -> Self {
        Self { sparse_threshold }
    }
}

impl GroupingBackend for DpMixtureBackend {
    fn name(&self) -> &'static str {
        "dp_mixture"
    }

    fn cluster(&mut self, request: &GroupingRequest) -> Result<GroupingResponse> {
        let n = request.len();
        if n == 0 {
            return Ok(GroupingResponse {
                assignments: Vec::new(),
                coclustering: CoClusteringMatrix::new(0, self.sparse_threshold),
            });
        }
        let rts = &request.rts;
        let to_err = |e: crate::errors::DataProcessingError| AlignmentError::DataProcessing {
            stage: Stage::Grouping,
            error: e,
        };

        let mean = rts.iter().sum::<f64>() / n as f64;
        let var = rts.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        let prior_prec = 1.0 / (var + 1.0);
        let within_sd = request.rt_window / 2.0;
        let within_prec = 1.0 / (within_sd * within_sd);
        let new_pred_prec = 1.0 / (1.0 / prior_prec + 1.0 / within_prec);

        let mut rng = match request.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        // Start with every feature alone.
        let mut z: Vec<usize> = (0..n).collect();
        let mut clusters: Vec<DpCluster> = rts
            .iter()
            .map(|rt| DpCluster { count: 1, sum: *rt })
            .collect();
        let mut pair_counts: HashMap<(usize, usize), u32> = HashMap::new();
        let mut retained = 0u32;

        let mut log_weights = Vec::new();
        for s in 0..request.num_samples {
            for i in 0..n {
                let x = rts[i];
                let k = z[i];
                clusters[k].count -= 1;
                clusters[k].sum -= x;
                if clusters[k].count == 0 {
                    let last = clusters.len() - 1;
                    clusters.swap_remove(k);
                    if k != last {
                        z.iter_mut().filter(|c| **c == last).for_each(|c| *c = k);
                    }
                }

                log_weights.clear();
                for c in clusters.iter() {
                    let post_prec = prior_prec + c.count as f64 * within_prec;
                    let post_mean = (prior_prec * mean + within_prec * c.sum) / post_prec;
                    let pred_prec = 1.0 / (1.0 / post_prec + 1.0 / within_prec);
                    log_weights.push(
                        (c.count as f64).ln()
                            + normal_ln_pdf(x, post_mean, pred_prec).map_err(to_err)?,
                    );
                }
                log_weights.push(
                    request.alpha.ln() + normal_ln_pdf(x, mean, new_pred_prec).map_err(to_err)?,
                );

                let choice = sample_log_weights(&mut rng, &log_weights).ok_or_else(|| {
                    AlignmentError::backend(
                        Stage::Grouping,
                        format!("degenerate weights for feature {}", i),
                    )
                })?;
                if choice == clusters.len() {
                    clusters.push(DpCluster::default());
                }
                clusters[choice].count += 1;
                clusters[choice].sum += x;
                z[i] = choice;
            }

            if s >= request.burn_in {
                retained += 1;
                let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
                for (i, c) in z.iter().enumerate() {
                    members.entry(*c).or_default().push(i);
                }
                for group in members.values() {
                    for (pos, &a) in group.iter().enumerate() {
                        for &b in group[pos + 1..].iter() {
                            *pair_counts.entry((a, b)).or_default() += 1;
                        }
                    }
                }
            }
        }

        let mut coclustering = CoClusteringMatrix::new(n, self.sparse_threshold);
        if retained > 0 {
            for ((a, b), count) in pair_counts.into_iter() {
                coclustering.set(a, b, count as f64 / retained as f64)?;
            }
        }

        // Relabel the final partition as 1, 2, ... in order of first appearance.
        let mut labels: HashMap<usize, u32> = HashMap::new();
        let assignments = z
            .iter()
            .map(|c| {
                let next = labels.len() as u32 + 1;
                *labels.entry(*c).or_insert(next)
            })
            .collect();

        debug!(
            "DP mixture on '{}': {} clusters in the final draw, {} draws retained",
            request.sample_name,
            clusters.len(),
            retained
        );
        Ok(GroupingResponse {
            assignments,
            coclustering,
        })
    }
}
