//! FASTA plumbing shared by the stages. Sequence identifiers are the first whitespace-delimited
//! token of the header line, the same convention the clustering tools use in their OTU maps.

use std::{collections::HashSet, fs::File, io::{BufWriter, Write}, path::Path};

use anyhow::Context;
use bio::io::fasta;

pub fn reader(path: &Path) -> anyhow::Result<fasta::Reader<std::io::BufReader<File>>> {
    fasta::Reader::from_file(path).with_context(|| format!("Opening FASTA file {path:?}"))
}

pub fn writer(path: &Path) -> anyhow::Result<fasta::Writer<File>> {
    fasta::Writer::to_file(path).with_context(|| format!("Creating FASTA file {path:?}"))
}

pub fn read_records(path: &Path) -> anyhow::Result<Vec<fasta::Record>> {
    reader(path)?
        .records()
        .map(|record| record.with_context(|| format!("Reading FASTA file {path:?}")))
        .collect()
}

pub fn read_ids(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut ids = Vec::new();

    for record in reader(path)?.records() {
        let record = record.with_context(|| format!("Reading FASTA file {path:?}"))?;
        ids.push(record.id().to_owned());
    }

    Ok(ids)
}

pub fn count_records(path: &Path) -> anyhow::Result<usize> {
    let mut count = 0;

    for record in reader(path)?.records() {
        record.with_context(|| format!("Reading FASTA file {path:?}"))?;
        count += 1;
    }

    Ok(count)
}

/// Copies the records of `input` whose id is (`keep = true`) or is not (`keep = false`) in `ids`.
/// Returns the number of records written.
pub fn filter_fasta(input: &Path, output: &Path, ids: &HashSet<String>, keep: bool) -> anyhow::Result<usize> {
    let mut out = writer(output)?;
    let mut written = 0;

    for record in reader(input)?.records() {
        let record = record.with_context(|| format!("Reading FASTA file {input:?}"))?;

        if ids.contains(record.id()) == keep {
            out.write_record(&record)?;
            written += 1;
        }
    }

    out.flush()?;
    Ok(written)
}

/// Writes every record of `inputs`, in order, to `output`.
pub fn concat_fasta(inputs: &[&Path], output: &Path) -> anyhow::Result<usize> {
    let mut out = writer(output)?;
    let mut written = 0;

    for input in inputs {
        for record in reader(input)?.records() {
            out.write_record(&record.with_context(|| format!("Reading FASTA file {input:?}"))?)?;
            written += 1;
        }
    }

    out.flush()?;
    Ok(written)
}

/// One identifier per line, the format of `*_failures.txt`.
pub fn write_id_list<'a, I>(path: &Path, ids: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = BufWriter::new(File::create(path).with_context(|| format!("Creating {path:?}"))?);

    for id in ids {
        writeln!(out, "{id}")?;
    }

    out.flush()?;
    Ok(())
}
