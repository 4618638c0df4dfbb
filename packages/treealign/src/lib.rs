pub mod alignment;
pub mod alphabet;
pub mod constants;
pub mod dp;
pub mod hmm;
pub mod imodel;
pub mod io;
pub mod likelihood;
pub mod matcache;
pub mod mcmc;
pub mod model;
pub mod parameters;
pub mod proposals;
pub mod run;
pub mod seq;
pub mod smodel;
pub mod subindex;
pub mod tree;
pub mod utils;

#[cfg(test)]
mod tests {
  use crate::utils::global_init::global_init;
  use ctor::ctor;

  #[ctor]
  fn init() {
    global_init();
  }
}
