pub mod compare;
pub mod daily_export;
pub mod mass_config;
pub mod pw_gen;
pub mod speed_audit;
