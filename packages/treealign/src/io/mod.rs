pub mod fasta;
pub mod file;
pub mod nwk;
