pub mod burn_ext;
pub mod converter;
pub mod ctc;
pub mod error;
pub mod evaluate;
pub mod parse_config;
pub mod worker;
