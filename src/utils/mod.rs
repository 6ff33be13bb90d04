pub mod pattern;
pub mod startup_banner;
