pub mod raw_table_adapter;
pub mod dataset_output_adapter;
pub mod quality_report_output_adapter;
