pub mod rs07;
