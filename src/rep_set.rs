use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use anyhow::{anyhow, Context};
use bio::io::fasta;

use crate::{config::RepSetMethod, otu_map::OtuMap, seqs};

/// One sequence per OTU, stored under the OTU id. The record description keeps the id of the
/// sequence that was picked.
#[derive(Debug, Clone, Default)]
pub struct RepresentativeSet {
    reps: BTreeMap<String, fasta::Record>,
}

impl RepresentativeSet {
    /// Picks a member of every OTU in `map` from the sequences in `seqs`, its first member or its
    /// longest one.
    pub fn pick(map: &OtuMap, seqs: &Path, method: RepSetMethod) -> anyhow::Result<Self> {
        let mut reps = BTreeMap::new();

        let wanted: HashSet<&str> = map
            .iter()
            .flat_map(|(_, members)| match method {
                RepSetMethod::First => &members[..members.len().min(1)],
                RepSetMethod::Longest => members,
            })
            .map(String::as_str)
            .collect();

        let mut found: HashMap<String, fasta::Record> = HashMap::with_capacity(wanted.len());

        for record in seqs::reader(seqs)?.records() {
            let record = record.with_context(|| format!("Reading {seqs:?}"))?;

            if wanted.contains(record.id()) {
                found.insert(record.id().to_owned(), record);
            }
        }

        for (otu_id, members) in map.iter() {
            let candidates = match method {
                RepSetMethod::First => &members[..members.len().min(1)],
                RepSetMethod::Longest => members,
            };

            let mut best: Option<&fasta::Record> = None;

            for seq_id in candidates {
                let record = found.get(seq_id).ok_or_else(|| {
                    anyhow!("Sequence {seq_id:?} of OTU {otu_id:?} not found in {seqs:?}")
                })?;

                if best.map_or(true, |best| record.seq().len() > best.seq().len()) {
                    best = Some(record);
                }
            }

            let best = best.ok_or_else(|| anyhow!("OTU {otu_id:?} has no members"))?;
            reps.insert(
                otu_id.to_owned(),
                fasta::Record::with_attrs(otu_id, Some(best.id()), best.seq()),
            );
        }

        Ok(RepresentativeSet { reps })
    }

    pub fn from_fasta(path: &Path) -> anyhow::Result<Self> {
        let reps = seqs::read_records(path)?
            .into_iter()
            .map(|record| (record.id().to_owned(), record))
            .collect();

        Ok(RepresentativeSet { reps })
    }

    /// Unites several sets; the first set providing an OTU id wins.
    pub fn union<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = RepresentativeSet>,
    {
        let mut reps = BTreeMap::new();

        for set in sets {
            for (otu_id, record) in set.reps {
                reps.entry(otu_id).or_insert(record);
            }
        }

        RepresentativeSet { reps }
    }

    /// The representatives of exactly the OTUs of `map`.
    pub fn select(&self, map: &OtuMap) -> anyhow::Result<Self> {
        let reps = map
            .otu_ids()
            .map(|otu_id| {
                self.reps
                    .get(otu_id)
                    .map(|record| (otu_id.to_owned(), record.clone()))
                    .ok_or_else(|| anyhow!("No representative sequence for OTU {otu_id:?}"))
            })
            .collect::<anyhow::Result<_>>()?;

        Ok(RepresentativeSet { reps })
    }

    pub fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.reps.retain(|otu_id, _| keep(otu_id));
    }

    pub fn get(&self, otu_id: &str) -> Option<&fasta::Record> {
        self.reps.get(otu_id)
    }

    pub fn len(&self) -> usize {
        self.reps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reps.is_empty()
    }

    pub fn otu_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.reps.keys().map(String::as_str)
    }

    pub fn write_fasta(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = seqs::writer(path)?;

        for record in self.reps.values() {
            writer
                .write_record(record)
                .with_context(|| format!("Writing representative sequences to {path:?}"))?;
        }

        writer.flush()?;
        Ok(())
    }
}
