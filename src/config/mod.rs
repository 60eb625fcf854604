//! Confdict loading: the file parser and the value coercion helpers.

pub mod helpers;
pub mod parser;

pub use helpers::{
    expand_home, extract_conf, extract_conf_with, init_cache_folder, parse_bool, parse_datetime,
    parse_host_port, parse_list, parse_time_interval,
};
pub use parser::{parse_config_file, parse_config_str};
