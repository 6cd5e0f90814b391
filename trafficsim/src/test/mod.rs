pub use trafficsim_lib::utils::io::tmp_dir;

mod e2e;
