use eyre::{Report, WrapErr};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub fn open_file_or_stdin(filepath: &impl AsRef<Path>) -> Result<Box<dyn std::io::BufRead>, Report> {
  let filepath = filepath.as_ref();
  let file = File::open(filepath).wrap_err_with(|| format!("When opening file: {filepath:?}"))?;
  Ok(Box::new(BufReader::with_capacity(32 * 1024, file)))
}

pub fn read_file_to_string(filepath: impl AsRef<Path>) -> Result<String, Report> {
  let filepath = filepath.as_ref();
  let mut file = File::open(filepath).wrap_err_with(|| format!("When opening file: {filepath:?}"))?;
  let mut contents = String::new();
  file
    .read_to_string(&mut contents)
    .wrap_err_with(|| format!("When reading file: {filepath:?}"))?;
  Ok(contents)
}

pub fn create_file(filepath: impl AsRef<Path>) -> Result<Box<dyn Write>, Report> {
  let filepath = filepath.as_ref();
  if let Some(parent_dir) = filepath.parent() {
    std::fs::create_dir_all(parent_dir).wrap_err_with(|| format!("When creating directory {parent_dir:?}"))?;
  }
  let file = File::create(filepath).wrap_err_with(|| format!("When creating file: {filepath:?}"))?;
  Ok(Box::new(BufWriter::with_capacity(32 * 1024, file)))
}
