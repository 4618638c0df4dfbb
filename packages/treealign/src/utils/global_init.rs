use chrono::Local;
use env_logger::Env;
use log::{Level, LevelFilter, Record};
use owo_colors::OwoColorize;
use std::io::Write;

fn log_level_str(record: &Record) -> String {
  let mut level_str = record.level().to_string();
  level_str.truncate(1);
  level_str
}

fn color_log_level(record: &Record) -> String {
  let level_str = match record.level() {
    Level::Error => log_level_str(record).red().to_string(),
    Level::Warn => log_level_str(record).yellow().to_string(),
    Level::Info => log_level_str(record).cyan().dimmed().to_string(),
    Level::Debug => log_level_str(record).green().dimmed().to_string(),
    Level::Trace => log_level_str(record).dimmed().to_string(),
  };
  format!("{:}{level_str}{:}", "[".dimmed(), "]".dimmed())
}

pub fn setup_logger(filter_level: LevelFilter) {
  env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
    .filter_level(filter_level)
    .format(|buf, record| {
      let date = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").dimmed().to_string();
      let level = color_log_level(record);
      let args = record.args();
      writeln!(buf, "{date} {level:} {args}")?;
      Ok(())
    })
    .try_init()
    .ok();
}

pub fn global_init() {
  color_eyre::install().ok();
}
