use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use anyhow::Context;

use crate::error::MergeError;

/// OTU identifier to the ordered member sequence ids, written as one tab-separated line per OTU:
/// `otu_id<TAB>seq_id<TAB>seq_id...`.
///
/// Every sequence id belongs to at most one OTU.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtuMap {
    otus: BTreeMap<String, Vec<String>>,
}

impl OtuMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an OTU that is not in the map yet.
    pub fn insert(&mut self, otu_id: &str, members: Vec<String>) -> Result<(), MergeError> {
        if self.otus.contains_key(otu_id) {
            return Err(MergeError::DuplicateOtu(otu_id.to_owned()));
        }

        self.otus.insert(otu_id.to_owned(), members);
        Ok(())
    }

    pub fn read<R: io::Read>(reader: R) -> anyhow::Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut map = Self::new();
        let mut owners: HashMap<String, String> = HashMap::new();

        for record in csv_reader.records() {
            let record = record?;
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);

            let Some(otu_id) = record.get(0).filter(|id| !id.is_empty()) else {
                // blank lines carry no OTU
                if record.iter().all(str::is_empty) {
                    continue;
                }
                return Err(MergeError::MissingOtuId(line).into());
            };

            let mut members = Vec::with_capacity(record.len() - 1);

            for seq_id in record.iter().skip(1).filter(|id| !id.is_empty()) {
                if let Some(first_otu) = owners.insert(seq_id.to_owned(), otu_id.to_owned()) {
                    return Err(MergeError::DuplicateSequence {
                        seq_id: seq_id.to_owned(),
                        first_otu,
                        second_otu: otu_id.to_owned(),
                    }
                    .into());
                }

                members.push(seq_id.to_owned());
            }

            map.insert(otu_id, members)?;
        }

        Ok(map)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening OTU map {path:?}"))?;
        Self::read(file).with_context(|| format!("Reading OTU map {path:?}"))
    }

    pub fn write<W: io::Write>(&self, writer: W) -> io::Result<()> {
        let mut csv_writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);

        for (otu_id, members) in &self.otus {
            csv_writer.write_record(std::iter::once(otu_id).chain(members))?;
        }

        csv_writer.flush()
    }

    pub fn write_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("Creating OTU map {path:?}"))?;
        self.write(file).with_context(|| format!("Writing OTU map {path:?}"))
    }

    pub fn len(&self) -> usize {
        self.otus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.otus.is_empty()
    }

    pub fn num_sequences(&self) -> usize {
        self.otus.values().map(Vec::len).sum()
    }

    pub fn get(&self, otu_id: &str) -> Option<&[String]> {
        self.otus.get(otu_id).map(Vec::as_slice)
    }

    pub fn contains_otu(&self, otu_id: &str) -> bool {
        self.otus.contains_key(otu_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.otus.iter().map(|(otu_id, members)| (otu_id.as_str(), members.as_slice()))
    }

    pub fn otu_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.otus.keys().map(String::as_str)
    }

    pub fn seq_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.otus.values().flatten().map(String::as_str)
    }

    /// Concatenates the maps of the stages of one run. Each OTU id may come from one map only,
    /// and each sequence id from one OTU only.
    pub fn concat<'a, I>(maps: I) -> Result<OtuMap, MergeError>
    where
        I: IntoIterator<Item = &'a OtuMap>,
    {
        let maps: Vec<&OtuMap> = maps.into_iter().collect();
        let mut seen = HashSet::new();

        for otu_id in maps.iter().flat_map(|map| map.otus.keys()) {
            if !seen.insert(otu_id.as_str()) {
                return Err(MergeError::OtuIdCollision { otu_id: otu_id.clone() });
            }
        }

        Self::merge(maps)
    }

    /// Concatenates the maps of successive iterations.
    ///
    /// Members of an OTU id present in several maps are united (later iterations can hit OTUs
    /// minted by earlier ones); a sequence id present in more than one map is an error.
    pub fn merge<'a, I>(maps: I) -> Result<OtuMap, MergeError>
    where
        I: IntoIterator<Item = &'a OtuMap>,
    {
        let mut merged = OtuMap::new();
        let mut owners: HashMap<&'a str, &'a str> = HashMap::new();

        for map in maps {
            for (otu_id, members) in &map.otus {
                for seq_id in members {
                    if let Some(first_otu) = owners.insert(seq_id, otu_id) {
                        return Err(MergeError::DuplicateSequence {
                            seq_id: seq_id.clone(),
                            first_otu: first_otu.to_owned(),
                            second_otu: otu_id.clone(),
                        });
                    }
                }

                merged
                    .otus
                    .entry(otu_id.clone())
                    .or_default()
                    .extend(members.iter().cloned());
            }
        }

        Ok(merged)
    }

    /// Drops every OTU with fewer than `min_size` members, members included.
    pub fn filter_min_size(&self, min_size: usize) -> OtuMap {
        OtuMap {
            otus: self
                .otus
                .iter()
                .filter(|(_, members)| members.len() >= min_size)
                .map(|(otu_id, members)| (otu_id.clone(), members.clone()))
                .collect(),
        }
    }

    pub fn without_otus(&self, excluded: &HashSet<String>) -> OtuMap {
        OtuMap {
            otus: self
                .otus
                .iter()
                .filter(|(otu_id, _)| !excluded.contains(*otu_id))
                .map(|(otu_id, members)| (otu_id.clone(), members.clone()))
                .collect(),
        }
    }
}

/// Sequence ids that did not meet a stage's clustering criterion, one per line in
/// `*_failures.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSet {
    ids: Vec<String>,
}

impl FailureSet {
    pub fn read<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut ids = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let id = line.trim();

            if !id.is_empty() {
                ids.push(id.to_owned());
            }
        }

        Ok(FailureSet { ids })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening failures file {path:?}"))?;
        Self::read(BufReader::new(file)).with_context(|| format!("Reading failures file {path:?}"))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn to_set(&self) -> HashSet<String> {
        self.ids.iter().cloned().collect()
    }
}

/// How a stage's clustered and failed ids cover its input ids.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PartitionReport {
    /// Input ids neither clustered nor failed.
    pub unaccounted: Vec<String>,
    /// Ids both clustered and failed.
    pub overlapping: Vec<String>,
    /// Clustered or failed ids that were not in the input.
    pub unknown: Vec<String>,
}

impl PartitionReport {
    pub fn check(input_ids: &[String], map: &OtuMap, failures: &FailureSet) -> Self {
        let clustered: HashSet<&str> = map.seq_ids().collect();
        let failed: HashSet<&str> = failures.ids.iter().map(String::as_str).collect();
        let input: HashSet<&str> = input_ids.iter().map(String::as_str).collect();

        let mut report = PartitionReport::default();

        for id in input_ids {
            let (in_map, in_failures) = (clustered.contains(id.as_str()), failed.contains(id.as_str()));

            if in_map && in_failures {
                report.overlapping.push(id.clone());
            } else if !in_map && !in_failures {
                report.unaccounted.push(id.clone());
            }
        }

        report.unknown = clustered
            .iter()
            .chain(&failed)
            .filter(|id| !input.contains(**id))
            .map(|id| id.to_string())
            .collect();
        report.unknown.sort();

        report
    }

    pub fn is_partition(&self) -> bool {
        self.unaccounted.is_empty() && self.overlapping.is_empty() && self.unknown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(lines: &str) -> OtuMap {
        OtuMap::read(lines.as_bytes()).unwrap()
    }

    fn sized_map(sizes: &[(&str, usize)]) -> OtuMap {
        let mut otu_map = OtuMap::new();
        for (otu_id, size) in sizes {
            let members = (0..*size).map(|i| format!("{otu_id}_s{i}")).collect();
            otu_map.insert(otu_id, members).unwrap();
        }
        otu_map
    }

    #[test]
    fn reads_and_writes_tab_separated_lines() {
        let otu_map = map("r1\ts1\ts2\n\nNew.ReferenceOTU0\ts3\n");

        assert_eq!(otu_map.len(), 2);
        assert_eq!(otu_map.num_sequences(), 3);
        assert_eq!(otu_map.get("r1").unwrap(), ["s1", "s2"]);

        let mut out = Vec::new();
        otu_map.write(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "New.ReferenceOTU0\ts3\nr1\ts1\ts2\n");
    }

    #[test]
    fn sequence_in_two_otus_is_rejected_on_read() {
        let err = OtuMap::read("r1\ts1\nr2\ts1\n".as_bytes()).unwrap_err();
        assert!(matches!(err.downcast_ref::<MergeError>(), Some(MergeError::DuplicateSequence { .. })));
    }

    #[test]
    fn merge_rejects_sequence_clustered_twice() {
        let step1 = map("r1\ts1\ts2\n");
        let step3 = map("New.ReferenceOTU0\ts3\ts2\n");

        match OtuMap::merge([&step1, &step3]) {
            Err(MergeError::DuplicateSequence { seq_id, first_otu, second_otu }) => {
                assert_eq!(seq_id, "s2");
                assert_eq!(first_otu, "r1");
                assert_eq!(second_otu, "New.ReferenceOTU0");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn merge_is_order_independent_for_disjoint_maps() {
        let step1 = map("r1\ts1\ts2\nr2\ts3\n");
        let step3 = map("New.ReferenceOTU0\ts4\ts5\n");
        let step4 = map("New.CleanUp.ReferenceOTU0\ts6\n");

        let forward = OtuMap::merge([&step1, &step3, &step4]).unwrap();
        let backward = OtuMap::merge([&step4, &step3, &step1]).unwrap();
        let shuffled = OtuMap::merge([&step3, &step1, &step4]).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
        assert_eq!(forward.num_sequences(), 6);
    }

    #[test]
    fn concat_rejects_otu_id_from_two_stages() {
        let step1 = map("New.ReferenceOTU0\ts1\ts2\n");
        let step3 = map("New.ReferenceOTU0\ts3\nNew.ReferenceOTU1\ts4\n");

        match OtuMap::concat([&step1, &step3]) {
            Err(MergeError::OtuIdCollision { otu_id }) => assert_eq!(otu_id, "New.ReferenceOTU0"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn concat_keeps_disjoint_stage_maps() {
        let step1 = map("r1\ts1\ts2\n");
        let step3 = map("New.ReferenceOTU0\ts3\n");

        assert_eq!(OtuMap::concat([&step1, &step3]).unwrap(), OtuMap::merge([&step1, &step3]).unwrap());
    }

    #[test]
    fn merge_unites_shared_otu_ids() {
        let batch0 = map("r1\ts1\n");
        let batch1 = map("r1\tt1\tt2\n");

        let merged = OtuMap::merge([&batch0, &batch1]).unwrap();
        assert_eq!(merged.get("r1").unwrap(), ["s1", "t1", "t2"]);
    }

    #[test]
    fn min_size_filter_drops_small_otus() {
        let otu_map = sized_map(&[
            ("a", 12), ("b", 3), ("c", 10), ("d", 9), ("e", 40), ("f", 1), ("g", 11), ("h", 15),
        ]);

        let filtered = otu_map.filter_min_size(10);

        assert_eq!(filtered.otu_ids().collect::<Vec<_>>(), ["a", "c", "e", "g", "h"]);
        for (otu_id, members) in filtered.iter() {
            assert_eq!(members, otu_map.get(otu_id).unwrap());
        }
        assert!(filtered.seq_ids().all(|id| !id.starts_with("b_") && !id.starts_with("d_") && !id.starts_with("f_")));
    }

    #[test]
    fn min_size_filter_is_idempotent() {
        let otu_map = sized_map(&[("a", 1), ("b", 2), ("c", 5)]);

        for min_size in 1..=6 {
            let once = otu_map.filter_min_size(min_size);
            assert_eq!(once.filter_min_size(min_size), once);
        }
    }

    #[test]
    fn partition_report() {
        let input: Vec<String> = ["s1", "s2", "s3", "s4"].iter().map(|s| s.to_string()).collect();
        let otu_map = map("r1\ts1\ts2\n");

        let failures = FailureSet::read("s3\ns4\n".as_bytes()).unwrap();
        assert!(PartitionReport::check(&input, &otu_map, &failures).is_partition());

        let failures = FailureSet::read("s2\ns3\nx9\n".as_bytes()).unwrap();
        let report = PartitionReport::check(&input, &otu_map, &failures);
        assert_eq!(report.overlapping, ["s2"]);
        assert_eq!(report.unaccounted, ["s4"]);
        assert_eq!(report.unknown, ["x9"]);
    }
}
