use std::path::Path;

use anyhow::Context;
use bio::io::fasta;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::seqs;

/// Draws each sequence independently with probability `percent`, reproducibly for a given seed.
///
/// When at least one sequence is offered and nothing was drawn, one uniformly chosen sequence is
/// kept so the de novo step never starts from an empty input.
#[derive(Debug, Clone)]
pub struct Subsampler {
    percent: f64,
    rng: StdRng,
}

impl Subsampler {
    pub fn new(percent: f64, seed: u64) -> Self {
        Subsampler {
            percent,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample<I>(&mut self, records: I) -> Vec<fasta::Record>
    where
        I: IntoIterator<Item = fasta::Record>,
    {
        let mut sampled = Vec::new();
        // reservoir of size one, used only if nothing is drawn
        let mut fallback = None;

        for (i, record) in records.into_iter().enumerate() {
            let keep = self.rng.gen::<f64>() < self.percent;
            let replace_fallback = sampled.is_empty() && self.rng.gen_range(0..=i) == 0;

            if keep {
                sampled.push(record);
            } else if replace_fallback {
                fallback = Some(record);
            }
        }

        if sampled.is_empty() && self.percent > 0.0 {
            sampled.extend(fallback);
        }

        sampled
    }

    /// Subsamples the FASTA file `input` into `output`, returning the number of sequences kept.
    pub fn subsample_fasta(&mut self, input: &Path, output: &Path) -> anyhow::Result<usize> {
        let records = seqs::read_records(input)?;
        let sampled = self.sample(records);

        let mut writer = seqs::writer(output)?;

        for record in &sampled {
            writer
                .write_record(record)
                .with_context(|| format!("Writing subsampled sequences to {output:?}"))?;
        }

        writer.flush()?;
        Ok(sampled.len())
    }
}
