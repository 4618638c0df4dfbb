use crate::io::file::read_file_to_string;
use crate::{make_error, make_report};
use eyre::{Report, WrapErr};
use std::io::Write;
use std::path::Path;

/// One raw record of sequence text, before alphabet decoding.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct FastaRecord {
  pub seq_name: String,
  pub seq: String,
  pub index: usize,
}

/// Reads a sequence file, guessing the format from the first non-whitespace
/// byte: `>` means FASTA, anything else is treated as PHYLIP-like.
pub fn read_sequence_file(filepath: impl AsRef<Path>) -> Result<Vec<FastaRecord>, Report> {
  let filepath = filepath.as_ref();
  let contents = read_file_to_string(filepath)?;
  read_sequence_str(&contents).wrap_err_with(|| format!("When parsing sequence file {filepath:?}"))
}

pub fn read_sequence_str(contents: &str) -> Result<Vec<FastaRecord>, Report> {
  match contents.trim_start().chars().next() {
    None => make_error!("Sequence file is empty"),
    Some('>') => read_fasta_str(contents),
    Some(_) => read_phylip_str(contents),
  }
}

pub fn read_fasta_str(contents: &str) -> Result<Vec<FastaRecord>, Report> {
  let mut records = Vec::new();
  let mut current: Option<FastaRecord> = None;

  for line in contents.lines() {
    let line = line.trim_end();
    if let Some(name) = line.strip_prefix('>') {
      if let Some(record) = current.take() {
        records.push(record);
      }
      current = Some(FastaRecord {
        seq_name: name.trim().to_owned(),
        seq: String::new(),
        index: records.len(),
      });
    } else if let Some(record) = current.as_mut() {
      record.seq.extend(line.trim().chars().map(|c| c.to_ascii_uppercase()));
    } else if !line.trim().is_empty() {
      return make_error!("Expected character '>' at record start.");
    }
  }
  if let Some(record) = current.take() {
    records.push(record);
  }

  if records.is_empty() {
    return make_error!("No sequences found in FASTA input");
  }
  Ok(records)
}

/// PHYLIP-like: a header line `n_sequences length`, then one `name sequence`
/// pair per line (interleaved continuation lines are appended in order).
pub fn read_phylip_str(contents: &str) -> Result<Vec<FastaRecord>, Report> {
  let mut lines = contents.lines().filter(|l| !l.trim().is_empty());

  let header = lines.next().ok_or_else(|| make_report!("PHYLIP input is empty"))?;
  let mut header_fields = header.split_whitespace();
  let n_seqs: usize = header_fields
    .next()
    .and_then(|s| s.parse().ok())
    .ok_or_else(|| make_report!("PHYLIP header must start with the number of sequences, got: '{header}'"))?;
  let length: usize = header_fields
    .next()
    .and_then(|s| s.parse().ok())
    .ok_or_else(|| make_report!("PHYLIP header must contain the sequence length, got: '{header}'"))?;

  let mut records: Vec<FastaRecord> = Vec::with_capacity(n_seqs);
  for (i, line) in lines.enumerate() {
    if i < n_seqs {
      let mut fields = line.trim().splitn(2, char::is_whitespace);
      let name = fields
        .next()
        .ok_or_else(|| make_report!("PHYLIP line {} has no sequence name", i + 2))?;
      let seq: String = fields.next().unwrap_or("").split_whitespace().collect();
      records.push(FastaRecord {
        seq_name: name.to_owned(),
        seq: seq.to_ascii_uppercase(),
        index: i,
      });
    } else {
      // interleaved continuation block
      let target = i % n_seqs;
      let seq: String = line.split_whitespace().collect();
      records[target].seq.extend(seq.to_ascii_uppercase().chars());
    }
  }

  if records.len() != n_seqs {
    return make_error!("PHYLIP header promised {n_seqs} sequences but {} were found", records.len());
  }
  for record in &records {
    if record.seq.chars().count() != length {
      return make_error!(
        "PHYLIP sequence '{}' has length {} but the header promised {length}",
        record.seq_name,
        record.seq.chars().count()
      );
    }
  }
  Ok(records)
}

pub struct FastaWriter<W: Write> {
  writer: W,
}

impl<W: Write> FastaWriter<W> {
  pub const fn new(writer: W) -> Self {
    Self { writer }
  }

  pub fn write(&mut self, seq_name: &str, seq: &str) -> Result<(), Report> {
    write!(self.writer, ">{seq_name}\n{seq}\n")?;
    Ok(())
  }

  pub fn flush(&mut self) -> Result<(), Report> {
    self.writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  fn reads_fasta_with_multiline_sequences() -> Result<(), Report> {
    let records = read_sequence_str(">s1\nACGT\nacgt\n>s2\nTTTT\n")?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].seq, "ACGTACGT");
    assert_eq!(records[1].seq_name, "s2");
    assert_eq!(records[1].index, 1);
    Ok(())
  }

  #[rstest]
  fn sniffs_phylip_by_first_byte() -> Result<(), Report> {
    let records = read_sequence_str("2 8\ns1 ACGT\ns2 TTTT\nACGT\nAAAA\n")?;
    assert_eq!(records[0].seq, "ACGTACGT");
    assert_eq!(records[1].seq, "TTTTAAAA");
    Ok(())
  }

  #[rstest]
  fn rejects_length_mismatch() {
    assert!(read_sequence_str("2 4\ns1 ACGT\ns2 TT\n").is_err());
  }
}
