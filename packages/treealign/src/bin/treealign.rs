use clap::Parser;
use eyre::Report;
use log::LevelFilter;
use treealign::run::{run, TreealignArgs};
use treealign::utils::global_init::{global_init, setup_logger};

fn main() -> Result<(), Report> {
  global_init();
  setup_logger(LevelFilter::Info);

  let args = TreealignArgs::parse();
  run(&args)
}
