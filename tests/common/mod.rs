//! In-process stand-ins for the clustering, alignment, tree, taxonomy and table tools, plus
//! synthetic reads. Everything is deterministic for a given seed.
#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use bio::io::fasta;
use rand::{rngs::StdRng, Rng, SeedableRng};

use openref_otus::{
    config::PipelineParameters,
    executor::CommandExecutor,
    otu_map::OtuMap,
    pipeline::layout::{file_stem, StageFiles},
    seqs,
    tools::{
        Aligner, AlignmentOutputs, OtuPicker, PickMode, PickOtusJob, TableBuilder, TaxonomyClassifier, Toolbox,
        TreeBuilder,
    },
};

pub const READ_LENGTH: usize = 100;
pub const FAKE_ALIGN_FAILURES_LABEL: &str = "fake_align_failures";

/// One call to the fake picker.
#[derive(Debug, Clone, PartialEq)]
pub struct PickCall {
    pub input: PathBuf,
    pub reference: Option<PathBuf>,
    pub otu_id_prefix: Option<String>,
    pub similarity: Option<f64>,
    pub output_dir: PathBuf,
}

pub type CallLog = Arc<Mutex<Vec<PickCall>>>;

fn identity(a: &[u8], b: &[u8]) -> f64 {
    let matches = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matches as f64 / a.len().max(b.len()) as f64
}

/// Closed-reference mode assigns each read to the first reference sequence within the identity
/// threshold; de novo mode clusters greedily around the first read of each cluster.
pub struct FakePicker {
    pub calls: CallLog,
}

impl OtuPicker for FakePicker {
    fn pick_otus(&self, exec: &CommandExecutor, job: &PickOtusJob<'_>) -> anyhow::Result<()> {
        let (reference, otu_id_prefix) = match job.mode {
            PickMode::ClosedReference { reference } => (Some(reference.to_path_buf()), None),
            PickMode::Denovo { otu_id_prefix } => (None, Some(otu_id_prefix.to_owned())),
        };

        self.calls.lock().unwrap().push(PickCall {
            input: job.input.to_path_buf(),
            reference: reference.clone(),
            otu_id_prefix: otu_id_prefix.clone(),
            similarity: job.similarity,
            output_dir: job.output_dir.to_path_buf(),
        });

        if exec.is_dry_run() {
            return Ok(());
        }

        let threshold = job.similarity.unwrap_or(0.97);
        let reads = seqs::read_records(job.input)?;

        let mut otus: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut failures = Vec::new();

        match (reference, otu_id_prefix) {
            (Some(reference), _) => {
                let refs = seqs::read_records(&reference)?;

                for read in &reads {
                    match refs.iter().find(|r| identity(r.seq(), read.seq()) >= threshold) {
                        Some(hit) => otus.entry(hit.id().to_owned()).or_default().push(read.id().to_owned()),
                        None => failures.push(read.id().to_owned()),
                    }
                }
            }
            (None, Some(prefix)) => {
                let mut centroids: Vec<(String, &fasta::Record)> = Vec::new();

                for read in &reads {
                    let otu_id = match centroids.iter().find(|(_, c)| identity(c.seq(), read.seq()) >= threshold) {
                        Some((otu_id, _)) => otu_id.clone(),
                        None => {
                            let otu_id = format!("{prefix}{}", centroids.len());
                            centroids.push((otu_id.clone(), read));
                            otu_id
                        }
                    };

                    otus.entry(otu_id).or_default().push(read.id().to_owned());
                }
            }
            (None, None) => unreachable!(),
        }

        let files = StageFiles::new(job.output_dir, job.input, self.clusters_format());
        let mut map = OtuMap::new();

        for (otu_id, members) in otus {
            map.insert(&otu_id, members)?;
        }

        map.write_to_path(&files.otu_map)?;
        seqs::write_id_list(&files.failures, failures.iter().map(String::as_str))?;
        fs::write(&files.clusters, format!("# {} clusters\n", map.len()))?;
        fs::write(&files.log, format!("input: {:?}\nthreshold: {threshold}\n", job.input))?;

        Ok(())
    }

    fn clusters_format(&self) -> &str {
        "uc"
    }
}

/// Fails the representatives whose OTU id is in `failing`.
pub struct FakeAligner {
    pub failing: HashSet<String>,
}

impl Aligner for FakeAligner {
    fn align(&self, exec: &CommandExecutor, seqs_path: &Path, output_dir: &Path) -> anyhow::Result<AlignmentOutputs> {
        let stem = file_stem(seqs_path);
        let outputs = AlignmentOutputs {
            aligned: output_dir.join(format!("{stem}_aligned.fasta")),
            failures: output_dir.join(format!("{stem}_failures.fasta")),
        };

        if exec.is_dry_run() {
            return Ok(outputs);
        }

        let mut aligned = seqs::writer(&outputs.aligned)?;
        let mut failed = seqs::writer(&outputs.failures)?;

        for record in seqs::read_records(seqs_path)? {
            if self.failing.contains(record.id()) {
                failed.write_record(&record)?;
            } else {
                aligned.write_record(&record)?;
            }
        }

        aligned.flush()?;
        failed.flush()?;
        Ok(outputs)
    }

    fn failures_label(&self) -> &str {
        FAKE_ALIGN_FAILURES_LABEL
    }
}

/// Writes a flat newick tree of the aligned ids.
pub struct FakeTreeBuilder;

impl TreeBuilder for FakeTreeBuilder {
    fn build_tree(&self, exec: &CommandExecutor, alignment: &Path, tree: &Path) -> anyhow::Result<()> {
        if exec.is_dry_run() {
            return Ok(());
        }

        let ids = seqs::read_ids(alignment)?;
        fs::write(tree, format!("({});\n", ids.join(",")))?;
        Ok(())
    }
}

pub struct FakeClassifier;

impl TaxonomyClassifier for FakeClassifier {
    fn classify(&self, exec: &CommandExecutor, seqs_path: &Path, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let assignments = output_dir.join(format!("{}_tax_assignments.txt", file_stem(seqs_path)));

        if exec.is_dry_run() {
            return Ok(assignments);
        }

        let mut out = fs::File::create(&assignments)?;

        for otu_id in seqs::read_ids(seqs_path)? {
            writeln!(out, "{otu_id}\tk__Bacteria;p__Synthetic\t1.00")?;
        }

        Ok(assignments)
    }
}

/// Writes `<otu id>\t<member count>[\t<taxonomy>]` per OTU.
pub struct TsvTableBuilder;

impl TableBuilder for TsvTableBuilder {
    fn build_table(
        &self,
        exec: &CommandExecutor,
        otu_map: &Path,
        taxonomy: Option<&Path>,
        table: &Path,
    ) -> anyhow::Result<()> {
        if exec.is_dry_run() {
            return Ok(());
        }

        let lineages: BTreeMap<String, String> = match taxonomy {
            Some(path) => fs::read_to_string(path)?
                .lines()
                .filter_map(|line| {
                    let mut fields = line.split('\t');
                    Some((fields.next()?.to_owned(), fields.next()?.to_owned()))
                })
                .collect(),
            None => BTreeMap::new(),
        };

        let map = OtuMap::from_path(otu_map)?;
        let mut out = fs::File::create(table).with_context(|| format!("Creating {table:?}"))?;

        for (otu_id, members) in map.iter() {
            match lineages.get(otu_id) {
                Some(lineage) => writeln!(out, "{otu_id}\t{}\t{lineage}", members.len())?,
                None => writeln!(out, "{otu_id}\t{}", members.len())?,
            }
        }

        Ok(())
    }
}

pub fn fake_toolbox(failing_alignments: &[&str]) -> (Toolbox, CallLog) {
    let calls = CallLog::default();

    let toolbox = Toolbox {
        picker: Box::new(FakePicker { calls: calls.clone() }),
        aligner: Box::new(FakeAligner {
            failing: failing_alignments.iter().map(|id| id.to_string()).collect(),
        }),
        tree_builder: Box::new(FakeTreeBuilder),
        classifier: Box::new(FakeClassifier),
        table_builder: Box::new(TsvTableBuilder),
    };

    (toolbox, calls)
}

/// Parameters for the synthetic data: no prefilter, every failure subsampled.
pub fn test_params(reference: &Path) -> PipelineParameters {
    let mut params = PipelineParameters::new(reference.to_path_buf());
    params.prefilter_identity = 0.0;
    params.subsample_percent = 1.0;
    params
}

pub struct Synthetic {
    rng: StdRng,
}

impl Synthetic {
    pub fn new(seed: u64) -> Self {
        Synthetic { rng: StdRng::seed_from_u64(seed) }
    }

    /// Random sequences, far apart from each other at any useful threshold.
    pub fn taxa(&mut self, count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|_| (0..READ_LENGTH).map(|_| b"ACGT"[self.rng.gen_range(0..4)]).collect())
            .collect()
    }

    /// `count` reads of `taxon` with at most one substitution each, named `<prefix>_<n>`.
    pub fn reads(&mut self, taxon: &[u8], prefix: &str, count: usize) -> Vec<fasta::Record> {
        (0..count)
            .map(|n| {
                let mut seq = taxon.to_vec();

                if self.rng.gen_bool(0.5) {
                    let pos = self.rng.gen_range(0..seq.len());
                    seq[pos] = match seq[pos] {
                        b'A' => b'C',
                        b'C' => b'G',
                        b'G' => b'T',
                        _ => b'A',
                    };
                }

                fasta::Record::with_attrs(&format!("{prefix}_{n}"), None, &seq)
            })
            .collect()
    }
}

pub fn write_fasta(path: &Path, records: &[fasta::Record]) {
    let mut writer = fasta::Writer::to_file(path).unwrap();

    for record in records {
        writer.write_record(record).unwrap();
    }

    writer.flush().unwrap();
}

/// Reference file with the taxa named `ref<n>`.
pub fn write_reference(path: &Path, taxa: &[Vec<u8>]) {
    let records: Vec<_> = taxa
        .iter()
        .enumerate()
        .map(|(n, seq)| fasta::Record::with_attrs(&format!("ref{n}"), None, seq))
        .collect();

    write_fasta(path, &records);
}

pub fn otu_map(path: &Path) -> OtuMap {
    OtuMap::from_path(path).unwrap()
}

/// 100 reads: 10 of each of 7 reference taxa (`known<t>_<n>`) and 10 of each of 3 novel taxa
/// (`novel<t>_<n>`). Returns the input and reference paths.
pub fn hundred_reads(dir: &Path, seed: u64) -> (PathBuf, PathBuf) {
    let mut synthetic = Synthetic::new(seed);
    let known = synthetic.taxa(7);
    let novel = synthetic.taxa(3);

    let mut reads = Vec::new();

    for (t, taxon) in known.iter().enumerate() {
        reads.extend(synthetic.reads(taxon, &format!("known{t}"), 10));
    }

    for (t, taxon) in novel.iter().enumerate() {
        reads.extend(synthetic.reads(taxon, &format!("novel{t}"), 10));
    }

    let input = dir.join("seqs.fna");
    let reference = dir.join("refseqs.fna");

    write_fasta(&input, &reads);
    write_reference(&reference, &known);

    (input, reference)
}
