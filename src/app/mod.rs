pub mod ports;
pub mod normalize_use_case;
pub mod quality_gate_use_case;
pub mod run_use_case;
