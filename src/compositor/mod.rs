pub mod background_model;
pub mod box_filter;
pub mod color;
pub mod edge_blend;
pub mod gaussian;
pub mod guided_filter;
pub mod lighting;
pub mod mask;
pub mod morphology;
pub mod regions;
pub mod spill;
pub mod summed_area_table;
pub mod thresholds;
